//! Actor loop supervision with real timers and a SQLite store

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cadence_engine::agent::state::ResourceLevels;
use cadence_engine::agent::{AgentCore, TurnSettings};
use cadence_engine::clock::{Clock, SystemClock};
use cadence_engine::config::runtime::{RuntimeConfig, StaticSource, Tunables};
use cadence_engine::config::Config;
use cadence_engine::db::Database;
use cadence_engine::llm::client::{DecisionOutcome, DecisionRequest, Planner};
use cadence_engine::llm::parser::parse_action;
use cadence_engine::pipeline::StructuralPipeline;
use cadence_engine::supervisor::{Supervisor, SupervisorSettings};
use sdk::types::{Actor, ActorStatus, Personality};

enum Behavior {
    Rest,
    Panic,
}

struct TestPlanner {
    behavior: Behavior,
    calls: AtomicUsize,
}

#[async_trait]
impl Planner for TestPlanner {
    async fn plan(&self, _request: &DecisionRequest, _cancel: &CancellationToken) -> DecisionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Rest => DecisionOutcome {
                action: Some(parse_action(r#"{"action":"rest"}"#)),
                meta: Default::default(),
            },
            Behavior::Panic => panic!("planner exploded"),
        }
    }
}

struct Setup {
    _dir: TempDir,
    db: Database,
    planner: Arc<TestPlanner>,
    supervisor: Supervisor,
}

fn fast_tunables(config: &Config) -> Tunables {
    let mut tunables = config.tunables();
    tunables.turn_interval_secs = 1;
    tunables
}

fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        turn_jitter: Duration::ZERO,
        startup_stagger: Duration::ZERO,
        shutdown_grace: Duration::from_secs(2),
    }
}

async fn setup(behavior: Behavior, runtime: Option<Arc<RuntimeConfig>>) -> Setup {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("loops.db")).await.unwrap();
    let config = Config::default_config();
    let clock = Arc::new(SystemClock);
    let runtime =
        runtime.unwrap_or_else(|| Arc::new(RuntimeConfig::fixed(fast_tunables(&config))));
    let planner = Arc::new(TestPlanner {
        behavior,
        calls: AtomicUsize::new(0),
    });

    let core = AgentCore::new(
        Arc::new(db.clone()),
        Arc::new(StructuralPipeline::new(db.pool().clone(), clock.clone())),
        planner.clone(),
        runtime.clone(),
        clock,
        TurnSettings::from_config(&config.scheduler, &config.memory),
    )
    .unwrap();

    Setup {
        _dir: dir,
        db,
        planner,
        supervisor: Supervisor::new(Arc::new(core), runtime, fast_settings()),
    }
}

async fn add_actor(db: &Database, id: &str, status: ActorStatus) {
    db.insert_actor(&Actor {
        id: id.into(),
        name: id.into(),
        status,
        model_route: "default".into(),
        personality: Personality::Neutral,
        last_active_at: None,
    })
    .await
    .unwrap();
    db.set_resources(
        id,
        ResourceLevels {
            food: 10.0,
            energy: 10.0,
            materials: 10.0,
        },
        SystemClock.now(),
    )
    .await
    .unwrap();
}

async fn wait_until<F: Fn() -> bool>(check: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

#[tokio::test]
async fn test_start_all_runs_active_actors_only() {
    let s = setup(Behavior::Rest, None).await;
    add_actor(&s.db, "a1", ActorStatus::Active).await;
    add_actor(&s.db, "a2", ActorStatus::Active).await;
    add_actor(&s.db, "sleepy", ActorStatus::Dormant).await;

    assert_eq!(s.supervisor.start_all().await.unwrap(), 2);
    assert_eq!(s.supervisor.running(), vec!["a1".to_string(), "a2".to_string()]);

    // Already running loops are not duplicated
    assert_eq!(s.supervisor.start_all().await.unwrap(), 0);

    let planner = s.planner.clone();
    assert!(wait_until(|| planner.calls.load(Ordering::SeqCst) >= 2, Duration::from_secs(3)).await);

    s.supervisor.stop().await;
    assert!(s.supervisor.running().is_empty());
}

#[tokio::test]
async fn test_dead_actor_deregisters() {
    let s = setup(Behavior::Rest, None).await;
    add_actor(&s.db, "a1", ActorStatus::Active).await;
    s.db.set_actor_status("a1", ActorStatus::Dead).await.unwrap();

    assert_eq!(s.supervisor.start(vec!["a1".to_string()]).await, 1);
    let supervisor = &s.supervisor;
    assert!(wait_until(|| supervisor.running().is_empty(), Duration::from_secs(3)).await);
    assert_eq!(s.planner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panicking_turn_is_logged_and_loop_survives() {
    let s = setup(Behavior::Panic, None).await;
    add_actor(&s.db, "a1", ActorStatus::Active).await;

    s.supervisor.start_all().await.unwrap();

    let planner = s.planner.clone();
    assert!(wait_until(|| planner.calls.load(Ordering::SeqCst) >= 2, Duration::from_secs(4)).await);
    assert_eq!(s.supervisor.running(), vec!["a1".to_string()]);

    let errors: Vec<_> = s
        .db
        .recent_events("a1", 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == "processing_error")
        .collect();
    assert!(!errors.is_empty());
    assert!(errors[0].payload["error"]
        .as_str()
        .unwrap()
        .contains("planner exploded"));

    s.supervisor.stop().await;
}

#[tokio::test]
async fn test_paused_loops_take_no_turns() {
    let config = Config::default_config();
    let source = StaticSource::new();
    source.set("paused", "true");
    let runtime = Arc::new(RuntimeConfig::new(
        fast_tunables(&config),
        Arc::new(source.clone()),
        Duration::from_millis(10),
    ));
    let s = setup(Behavior::Rest, Some(runtime)).await;
    add_actor(&s.db, "a1", ActorStatus::Active).await;

    s.supervisor.start_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(s.planner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(s.supervisor.running(), vec!["a1".to_string()]);

    source.remove("paused");
    let planner = s.planner.clone();
    assert!(wait_until(|| planner.calls.load(Ordering::SeqCst) >= 1, Duration::from_secs(3)).await);

    s.supervisor.stop().await;
}

#[tokio::test]
async fn test_inactive_scheduler_starts_nothing() {
    let mut tunables = fast_tunables(&Config::default_config());
    tunables.active = false;
    let s = setup(Behavior::Rest, Some(Arc::new(RuntimeConfig::fixed(tunables)))).await;
    add_actor(&s.db, "a1", ActorStatus::Active).await;

    assert_eq!(s.supervisor.start_all().await.unwrap(), 0);
    assert!(s.supervisor.running().is_empty());
}

#[tokio::test]
async fn test_no_new_loops_after_stop() {
    let s = setup(Behavior::Rest, None).await;
    add_actor(&s.db, "a1", ActorStatus::Active).await;

    s.supervisor.start_all().await.unwrap();
    s.supervisor.stop().await;

    assert!(s.supervisor.token().is_cancelled());
    assert_eq!(s.supervisor.start(vec!["a1".to_string()]).await, 0);
    assert!(s.supervisor.running().is_empty());
}
