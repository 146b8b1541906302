//! Strategic decision client
//!
//! Performs one planning request for one actor and returns either a parsed
//! action or an explicit "no result". Expected failures (rate limits, empty
//! payloads, provider errors, malformed output, budget denial) never surface
//! as errors; they end up in [`CallMetadata`].
//!
//! Order of operations:
//! 1. route the actor to a provider/model
//! 2. budget preflight
//! 3. concurrency permit + RPM window
//! 4. call, then walk the retry/fallback policy table on failure
//! 5. report every attempt to the budget ledger without waiting on it

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::anthropic::AnthropicProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAIProvider;
use super::parser::{parse_action, ParseDiagnostics, ParsedAction};
use super::policy::{AttemptState, RetryPolicy, Step};
use super::router::{LLMRouter, RouteSelection, Target};
use super::{Completion, CompletionRequest, FailureKind, LLMError, LLMProvider, Message};
use crate::budget::{report_call, Admission, BudgetLedger, CallRecord};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::rate_limiter::RateLimiter;

/// One planning request
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub actor_id: String,
    /// Routing key (the actor's model assignment)
    pub routing_key: String,
    /// Guarded system instructions
    pub system: String,
    /// World-context text
    pub context: String,
    pub max_tokens: u32,
    /// Route through the cheap route regardless of the key
    pub force_cheap: bool,
}

/// What happened during one decision, for logs and the event payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Provider of the last call made (or the one that would have been called)
    pub provider: String,
    pub model: String,
    pub success: bool,
    pub fallback_used: bool,
    pub alternate_model_used: bool,
    /// Provider calls actually issued
    pub attempts: u32,
    /// Wall time of the whole decision
    pub latency_ms: u64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseDiagnostics>,
}

/// Result of [`DecisionClient::decide`]
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    /// `None` is the explicit no-result signal
    pub action: Option<ParsedAction>,
    pub meta: CallMetadata,
}

/// Anything that can turn a planning request into an outcome
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &DecisionRequest, cancel: &CancellationToken) -> DecisionOutcome;
}

/// Knobs for the client that do not change at runtime
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub policy: RetryPolicy,
    pub request_timeout: Duration,
    pub record_timeout: Duration,
}

/// Routes, throttles and retries planning calls
pub struct DecisionClient {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    router: LLMRouter,
    limiter: Arc<RateLimiter>,
    ledger: Arc<dyn BudgetLedger>,
    clock: SharedClock,
    settings: ClientSettings,
}

enum CallFailure {
    Provider(LLMError),
    Cancelled,
}

impl DecisionClient {
    pub fn new(
        providers: Vec<Arc<dyn LLMProvider>>,
        router: LLMRouter,
        limiter: Arc<RateLimiter>,
        ledger: Arc<dyn BudgetLedger>,
        clock: SharedClock,
        settings: ClientSettings,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            providers,
            router,
            limiter,
            ledger,
            clock,
            settings,
        }
    }

    /// Providers, router and retry knobs from the `[llm]` and `[budget]` sections
    pub fn from_config(
        config: &Config,
        limiter: Arc<RateLimiter>,
        ledger: Arc<dyn BudgetLedger>,
        clock: SharedClock,
    ) -> Self {
        let llm = &config.llm;
        let timeout = Duration::from_secs(llm.request_timeout_secs);
        let providers: Vec<Arc<dyn LLMProvider>> = vec![
            Arc::new(OpenAIProvider::new(llm.openai.clone(), timeout)),
            Arc::new(AnthropicProvider::new(llm.anthropic.clone(), timeout)),
            Arc::new(OllamaProvider::new(llm.ollama.clone(), timeout)),
        ];

        Self::new(
            providers,
            LLMRouter::new(Arc::new(llm.clone())),
            limiter,
            ledger,
            clock,
            ClientSettings {
                policy: RetryPolicy::new(llm.max_attempts, llm.backoff_base_ms, llm.backoff_max_ms),
                request_timeout: timeout,
                record_timeout: Duration::from_millis(config.budget.record_timeout_ms),
            },
        )
    }

    /// Run one planning request to completion or exhaustion
    pub async fn decide(
        &self,
        request: &DecisionRequest,
        cancel: &CancellationToken,
    ) -> DecisionOutcome {
        let started = Instant::now();
        let mut meta = CallMetadata::default();

        let Some(selection) =
            self.router
                .select(&request.actor_id, &request.routing_key, request.force_cheap)
        else {
            meta.last_error = Some("no route configured".to_string());
            return finish(None, meta, started);
        };

        meta.provider = selection.primary.provider.clone();
        meta.model = selection.primary.model.clone();

        if let Admission::Denied(reason) = self
            .ledger
            .preflight(&selection.primary.provider, &selection.primary.model)
            .await
        {
            info!(actor_id = %request.actor_id, reason = %reason, "Planning call denied by budget");
            meta.denied_reason = Some(reason);
            return finish(None, meta, started);
        }

        let action = self.run(request, &selection, cancel, &mut meta).await;
        finish(action, meta, started)
    }

    async fn run(
        &self,
        request: &DecisionRequest,
        selection: &RouteSelection,
        cancel: &CancellationToken,
        meta: &mut CallMetadata,
    ) -> Option<ParsedAction> {
        let messages = vec![
            Message::system(request.system.clone()),
            Message::user(request.context.clone()),
        ];

        let mut state = AttemptState {
            alternate_available: selection.alternate_model.is_some(),
            fallback_available: selection.fallback.is_some(),
            ..Default::default()
        };
        let mut target = selection.primary.clone();

        loop {
            if cancel.is_cancelled() {
                meta.last_error = Some("cancelled".to_string());
                return None;
            }

            meta.provider = target.provider.clone();
            meta.model = target.model.clone();

            let call_started = Instant::now();
            let result = self
                .call_once(&target, &messages, request.max_tokens, cancel)
                .await;
            let latency_ms = call_started.elapsed().as_millis() as u64;

            let error = match result {
                Err(CallFailure::Cancelled) => {
                    meta.last_error = Some("cancelled".to_string());
                    return None;
                }
                Ok(completion) => {
                    meta.attempts += 1;
                    let cost = self.cost_of(&target.provider, &completion);
                    self.report(request, &target, state.on_fallback, latency_ms, Some(&completion), cost, None);

                    meta.success = true;
                    meta.prompt_tokens += completion.prompt_tokens;
                    meta.completion_tokens += completion.completion_tokens;
                    meta.cost_usd += cost;

                    let mut parsed = parse_action(&completion.text);
                    parsed.diagnostics.truncated |= completion.hit_token_limit();
                    debug!(
                        actor_id = %request.actor_id,
                        provider = %target.provider,
                        model = %target.model,
                        parse_success = parsed.diagnostics.success,
                        truncated = parsed.diagnostics.truncated,
                        parse_attempts = parsed.diagnostics.attempts,
                        "Planner response parsed"
                    );
                    meta.parse = Some(parsed.diagnostics.clone());
                    return Some(parsed);
                }
                Err(CallFailure::Provider(error)) => error,
            };

            meta.attempts += 1;
            if !state.on_fallback {
                state.primary_attempts += 1;
            }
            let kind = error.kind();
            meta.last_error = Some(error.to_string());
            meta.last_failure = Some(kind);
            self.report(request, &target, state.on_fallback, latency_ms, None, 0.0, Some(kind));

            let (step, rule) = self.settings.policy.decide(kind, &state);
            warn!(
                actor_id = %request.actor_id,
                provider = %target.provider,
                model = %target.model,
                attempt = meta.attempts,
                failure = %kind,
                rule,
                error = %error,
                "Planning call failed"
            );

            match step {
                Step::AlternateModel => {
                    // Rule only fires when an alternate exists
                    let Some(alternate) = selection.alternate_model.clone() else {
                        return None;
                    };
                    state.alternate_tried = true;
                    meta.alternate_model_used = true;
                    target = Target::new(&selection.primary.provider, alternate);
                }
                Step::Fallback => {
                    let Some(fallback) = selection.fallback.clone() else {
                        return None;
                    };
                    state.fallback_used = true;
                    state.on_fallback = true;
                    meta.fallback_used = true;

                    if let Admission::Denied(reason) =
                        self.ledger.preflight(&fallback.provider, &fallback.model).await
                    {
                        info!(actor_id = %request.actor_id, reason = %reason, "Fallback call denied by budget");
                        meta.denied_reason = Some(reason);
                        return None;
                    }
                    target = fallback;
                }
                Step::Backoff(delay) => {
                    target = selection.primary.clone();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            meta.last_error = Some("cancelled".to_string());
                            return None;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::GiveUp => return None,
            }
        }
    }

    /// Permit, RPM window and the call itself, all abandoned on cancellation
    async fn call_once(
        &self,
        target: &Target,
        messages: &[Message],
        max_tokens: u32,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallFailure> {
        let Some(provider) = self.providers.get(&target.provider) else {
            return Err(CallFailure::Provider(LLMError::NotConfigured(
                target.provider.clone(),
            )));
        };

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
            permit = self.limiter.acquire(&target.provider) => {
                permit.map_err(|e| CallFailure::Provider(LLMError::ProviderUnavailable(e.to_string())))?
            }
        };

        // Cancellation may have arrived while queued for the permit
        if cancel.is_cancelled() {
            return Err(CallFailure::Cancelled);
        }

        let request = CompletionRequest {
            model: target.model.clone(),
            messages: messages.to_vec(),
            max_tokens,
        };

        match tokio::time::timeout(self.settings.request_timeout, provider.complete(&request)).await {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(e)) => Err(CallFailure::Provider(e)),
            Err(_) => Err(CallFailure::Provider(LLMError::Timeout)),
        }
    }

    fn cost_of(&self, provider: &str, completion: &Completion) -> f64 {
        self.providers
            .get(provider)
            .map(|p| p.estimated_cost(completion.prompt_tokens, completion.completion_tokens))
            .unwrap_or(0.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        request: &DecisionRequest,
        target: &Target,
        on_fallback: bool,
        latency_ms: u64,
        completion: Option<&Completion>,
        cost_usd: f64,
        failure: Option<FailureKind>,
    ) {
        let record = CallRecord {
            actor_id: request.actor_id.clone(),
            provider: target.provider.clone(),
            model: target.model.clone(),
            prompt_tokens: completion.map(|c| c.prompt_tokens).unwrap_or(0),
            completion_tokens: completion.map(|c| c.completion_tokens).unwrap_or(0),
            cost_usd,
            success: completion.is_some(),
            fallback_used: on_fallback,
            latency_ms,
            error_kind: failure.map(|k| k.as_str().to_string()),
            at: self.clock.now(),
        };
        report_call(self.ledger.clone(), record, self.settings.record_timeout);
    }
}

#[async_trait]
impl Planner for DecisionClient {
    async fn plan(&self, request: &DecisionRequest, cancel: &CancellationToken) -> DecisionOutcome {
        self.decide(request, cancel).await
    }
}

fn finish(action: Option<ParsedAction>, mut meta: CallMetadata, started: Instant) -> DecisionOutcome {
    meta.latency_ms = started.elapsed().as_millis() as u64;
    DecisionOutcome { action, meta }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider that replays a script of results
    struct Scripted {
        name: &'static str,
        script: Mutex<Vec<super::super::Result<Completion>>>,
        calls: AtomicUsize,
        models: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(name: &'static str, script: Vec<super::super::Result<Completion>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
                models: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn is_local(&self) -> bool {
            false
        }
        fn estimated_cost(&self, prompt: u32, completion: u32) -> f64 {
            (prompt + completion) as f64 / 1000.0
        }
        async fn complete(&self, request: &CompletionRequest) -> super::super::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.models.lock().unwrap().push(request.model.clone());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(LLMError::EmptyResponse))
        }
    }

    struct Ledger {
        deny: bool,
        preflights: AtomicUsize,
    }

    #[async_trait]
    impl BudgetLedger for Ledger {
        async fn preflight(&self, _provider: &str, _model: &str) -> Admission {
            self.preflights.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                Admission::Denied("cap".into())
            } else {
                Admission::Allowed
            }
        }
        async fn record(&self, _call: &CallRecord) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ok(text: &str) -> super::super::Result<Completion> {
        Ok(Completion {
            text: text.to_string(),
            prompt_tokens: 100,
            completion_tokens: 20,
            finish_reason: Some("stop".into()),
        })
    }

    fn client(providers: Vec<Arc<dyn LLMProvider>>, deny: bool) -> DecisionClient {
        let config = Config::default_config();
        DecisionClient::new(
            providers,
            LLMRouter::new(Arc::new(config.llm)),
            Arc::new(RateLimiter::new()),
            Arc::new(Ledger {
                deny,
                preflights: AtomicUsize::new(0),
            }),
            Arc::new(SystemClock),
            ClientSettings {
                policy: RetryPolicy::new(3, 10, 40),
                request_timeout: Duration::from_secs(5),
                record_timeout: Duration::from_millis(100),
            },
        )
    }

    fn request() -> DecisionRequest {
        DecisionRequest {
            actor_id: "a1".into(),
            routing_key: "default".into(),
            system: "sys".into(),
            context: "ctx".into(),
            max_tokens: 100,
            force_cheap: false,
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let openai = Scripted::new("openai", vec![ok(r#"{"action":"rest"}"#)]);
        let client = client(vec![openai.clone() as Arc<dyn LLMProvider>], false);

        let outcome = client.decide(&request(), &CancellationToken::new()).await;
        let parsed = outcome.action.unwrap();
        assert_eq!(parsed.action, sdk::types::Action::Rest);
        assert!(outcome.meta.success);
        assert_eq!(outcome.meta.attempts, 1);
        assert!(!outcome.meta.fallback_used);
        assert!((outcome.meta.cost_usd - 0.12).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_then_alternate_model() {
        let openai = Scripted::new(
            "openai",
            vec![Err(LLMError::EmptyResponse), ok(r#"{"action":"idle"}"#)],
        );
        let client = client(vec![openai.clone() as Arc<dyn LLMProvider>], false);

        let outcome = client.decide(&request(), &CancellationToken::new()).await;
        assert!(outcome.action.is_some());
        assert!(outcome.meta.alternate_model_used);
        assert!(!outcome.meta.fallback_used);
        let models = openai.models.lock().unwrap().clone();
        assert_eq!(models, vec!["gpt-4o-mini".to_string(), "gpt-4.1-mini".to_string()]);
    }

    #[tokio::test]
    async fn test_rate_limit_falls_back_once() {
        let openai = Scripted::new("openai", vec![Err(LLMError::RateLimitExceeded)]);
        let anthropic = Scripted::new("anthropic", vec![ok(r#"{"action":"rest"}"#)]);
        let client = client(
            vec![
                openai.clone() as Arc<dyn LLMProvider>,
                anthropic.clone() as Arc<dyn LLMProvider>,
            ],
            false,
        );

        let outcome = client.decide(&request(), &CancellationToken::new()).await;
        assert!(outcome.action.is_some());
        assert!(outcome.meta.fallback_used);
        assert_eq!(outcome.meta.provider, "anthropic");
        assert_eq!(openai.calls.load(Ordering::SeqCst), 1);
        assert_eq!(anthropic.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let openai = Scripted::new(
            "openai",
            vec![
                Err(LLMError::Timeout),
                Err(LLMError::Timeout),
                Err(LLMError::Timeout),
                Err(LLMError::Timeout),
            ],
        );
        let client = client(vec![openai.clone() as Arc<dyn LLMProvider>], false);

        let outcome = client.decide(&request(), &CancellationToken::new()).await;
        assert!(outcome.action.is_none());
        assert!(!outcome.meta.success);
        assert_eq!(openai.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.meta.last_failure, Some(FailureKind::Transient));
    }

    #[tokio::test]
    async fn test_budget_denial_makes_no_calls() {
        let openai = Scripted::new("openai", vec![ok("{}")]);
        let client = client(vec![openai.clone() as Arc<dyn LLMProvider>], true);

        let outcome = client.decide(&request(), &CancellationToken::new()).await;
        assert!(outcome.action.is_none());
        assert_eq!(outcome.meta.denied_reason.as_deref(), Some("cap"));
        assert_eq!(openai.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.meta.attempts, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let openai = Scripted::new("openai", vec![ok(r#"{"action":"rest"}"#)]);
        let client = client(vec![openai.clone() as Arc<dyn LLMProvider>], false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = client.decide(&request(), &cancel).await;
        assert!(outcome.action.is_none());
        assert_eq!(openai.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_provider_gives_up() {
        // Primary route points at openai, which is not registered
        let client = client(vec![], false);
        let outcome = client.decide(&request(), &CancellationToken::new()).await;
        assert!(outcome.action.is_none());
        assert_eq!(outcome.meta.last_failure, Some(FailureKind::Fatal));
    }
}
