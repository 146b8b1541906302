//! Loop supervisor
//!
//! One long-lived tokio task per active actor. Each iteration runs at most one
//! turn through [`AgentCore`] and then sleeps a jittered interval. Turn errors
//! and panics are logged as `processing_error` events and the loop carries on;
//! only a dead (or deleted) actor or cancellation ends a loop.
//!
//! Runtime flags: `paused` makes every loop idle without taking turns,
//! `active = false` stops [`Supervisor::start`] from spawning new loops.

use futures::FutureExt;
use rand::Rng;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentCore, TurnOutcome};
use crate::config::runtime::RuntimeConfig;
use crate::config::SchedulerConfig;
use sdk::types::ActorStatus;

/// Loop timing that is fixed for the supervisor's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub turn_jitter: Duration,
    pub startup_stagger: Duration,
    pub shutdown_grace: Duration,
}

impl SupervisorSettings {
    pub fn from_config(scheduler: &SchedulerConfig) -> Self {
        Self {
            turn_jitter: Duration::from_secs(scheduler.turn_jitter_secs),
            startup_stagger: Duration::from_secs(scheduler.startup_stagger_secs),
            shutdown_grace: Duration::from_secs(scheduler.shutdown_grace_secs),
        }
    }
}

/// A running loop and the generation it was spawned with
struct LoopEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, LoopEntry>>>;

/// Owns every actor loop
pub struct Supervisor {
    core: Arc<AgentCore>,
    runtime: Arc<RuntimeConfig>,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    loops: Registry,
    generations: AtomicU64,
}

impl Supervisor {
    pub fn new(core: Arc<AgentCore>, runtime: Arc<RuntimeConfig>, settings: SupervisorSettings) -> Self {
        Self {
            core,
            runtime,
            settings,
            cancel: CancellationToken::new(),
            loops: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Token cancelled by [`Supervisor::stop`]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start loops for every active actor in the store
    pub async fn start_all(&self) -> anyhow::Result<usize> {
        let actors = self.core.store().list_actors().await?;
        let ids = actors
            .into_iter()
            .filter(|a| a.status == ActorStatus::Active)
            .map(|a| a.id)
            .collect();
        Ok(self.start(ids).await)
    }

    /// Spawn one loop per actor id not already running
    ///
    /// Each loop first sleeps a random delay up to the startup stagger.
    /// Returns the number of loops spawned.
    pub async fn start(&self, actor_ids: Vec<String>) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }
        if !self.runtime.current().await.active {
            info!("Scheduler inactive, not starting actor loops");
            return 0;
        }

        let mut loops = match self.loops.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loops.retain(|_, entry| !entry.handle.is_finished());

        let mut started = 0;
        for actor_id in actor_ids {
            if loops.contains_key(&actor_id) {
                continue;
            }
            let generation = self.generations.fetch_add(1, Ordering::Relaxed);
            let handle = tokio::spawn(actor_loop(
                actor_id.clone(),
                generation,
                self.core.clone(),
                self.runtime.clone(),
                self.settings,
                self.cancel.child_token(),
                self.loops.clone(),
            ));
            loops.insert(actor_id, LoopEntry { generation, handle });
            started += 1;
        }

        info!(started, running = loops.len(), "Actor loops started");
        started
    }

    /// Ids of actors whose loop is still running
    pub fn running(&self) -> Vec<String> {
        let loops = match self.loops.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ids: Vec<String> = loops
            .iter()
            .filter(|(_, entry)| !entry.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancel every loop and wait for in-flight turns
    ///
    /// Loops still running after the shutdown grace are aborted.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut loops = match self.loops.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            loops.drain().map(|(id, entry)| (id, entry.handle)).collect()
        };
        if handles.is_empty() {
            return;
        }

        info!(loops = handles.len(), "Stopping actor loops");
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_grace;

        for (actor_id, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(actor_id = %actor_id, error = %e, "Actor loop ended abnormally"),
                Err(_) => {
                    warn!(actor_id = %actor_id, "Actor loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        info!("All actor loops stopped");
    }
}

async fn actor_loop(
    actor_id: String,
    generation: u64,
    core: Arc<AgentCore>,
    runtime: Arc<RuntimeConfig>,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    registry: Registry,
) {
    let stagger = random_up_to(settings.startup_stagger);
    debug!(actor_id = %actor_id, stagger_ms = stagger.as_millis() as u64, "Actor loop waiting for first turn");
    if !sleep_or_cancel(stagger, &cancel).await {
        deregister(&registry, &actor_id, generation);
        return;
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let tunables = runtime.current().await;
        let interval = Duration::from_secs(tunables.turn_interval_secs);

        if tunables.paused {
            if !sleep_or_cancel(interval, &cancel).await {
                break;
            }
            continue;
        }

        let turn = AssertUnwindSafe(core.run_turn(&actor_id, &cancel))
            .catch_unwind()
            .await;

        match turn {
            Ok(Ok(TurnOutcome::Deregister)) => {
                info!(actor_id = %actor_id, "Actor is dead or gone, deregistering loop");
                break;
            }
            Ok(Ok(TurnOutcome::Cancelled)) => break,
            Ok(Ok(outcome)) => debug!(actor_id = %actor_id, ?outcome, "Turn finished"),
            Ok(Err(e)) => {
                error!(actor_id = %actor_id, error = %format!("{:#}", e), "Turn failed");
                core.record_processing_error(&actor_id, &format!("{:#}", e), core.clock().now())
                    .await;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(actor_id = %actor_id, panic = %message, "Turn panicked");
                core.record_processing_error(&actor_id, &format!("panic: {}", message), core.clock().now())
                    .await;
            }
        }

        if !sleep_or_cancel(jittered(interval, settings.turn_jitter), &cancel).await {
            break;
        }
    }

    deregister(&registry, &actor_id, generation);
    debug!(actor_id = %actor_id, "Actor loop exited");
}

/// Drop the registry entry for `actor_id` if it still belongs to `generation`
fn deregister(registry: &Registry, actor_id: &str, generation: u64) {
    let mut loops = match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if loops.get(actor_id).map(|e| e.generation) == Some(generation) {
        loops.remove(actor_id);
    }
}

/// `false` when cancelled before the sleep finished
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn random_up_to(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// `interval` plus or minus up to `jitter`, never negative
pub fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as i64;
    if jitter_ms == 0 {
        return interval;
    }
    let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
    let total = interval.as_millis() as i64 + offset;
    Duration::from_millis(total.max(0) as u64)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
