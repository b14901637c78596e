use std::sync::Arc;
use std::time::Duration;

use phoneclaw_lib::agent_engine::run::StreamItem;
use phoneclaw_lib::config::TimingConfig;
use phoneclaw_lib::executor::simulated::SimulatedDevice;
use phoneclaw_lib::llm::providers::scripted::ScriptedProvider;
use phoneclaw_lib::llm::registry::{ProviderRegistry, Role};
use phoneclaw_lib::{AgentEngine, AppConfig, EventKind, PhoneClawError, RunRequest};

fn engine_with(registry: ProviderRegistry, delay_ms: u64) -> AgentEngine {
    let mut config = AppConfig::default();
    config.timing = TimingConfig::instant();
    config.run.simulate_delay_ms = delay_ms;
    AgentEngine::new(config, Arc::new(registry), Arc::new(SimulatedDevice::new()))
}

fn simulated(request: RunRequest) -> RunRequest {
    RunRequest {
        simulate: Some(true),
        ..request
    }
}

#[tokio::test]
async fn simulated_direct_run_streams_to_end() {
    let engine = engine_with(ProviderRegistry::empty(), 0);
    let request = RunRequest {
        simulate_steps: Some(3),
        ..simulated(RunRequest::direct("open settings"))
    };
    let run_id = engine.start(request).await.unwrap();

    let events = engine.stream(Some(run_id.as_str())).await.unwrap().collect_events().await;
    let types: Vec<_> = events.iter().map(|e| e.type_name()).collect();
    assert_eq!(types, vec!["log", "start", "step", "step", "step", "end"]);
    match &events.last().unwrap().kind {
        EventKind::End { message } => assert_eq!(message, "Simulated run completed"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(engine.active_run().await.is_none());
}

#[tokio::test]
async fn second_start_is_refused_while_running() {
    let engine = engine_with(ProviderRegistry::empty(), 200);
    engine
        .start(simulated(RunRequest::direct("first")))
        .await
        .unwrap();
    let second = engine.start(simulated(RunRequest::direct("second"))).await;
    assert!(matches!(second, Err(PhoneClawError::RunInProgress)));
    assert!(engine.stop().await);
}

#[tokio::test]
async fn busy_engine_refuses_before_resolving_models() {
    let engine = engine_with(ProviderRegistry::empty(), 200);
    engine
        .start(simulated(RunRequest::direct("first")))
        .await
        .unwrap();
    let second = engine.start(RunRequest::monitor("needs models")).await;
    assert!(matches!(second, Err(PhoneClawError::RunInProgress)));
    assert!(engine.stop().await);
}

#[tokio::test]
async fn stop_ends_with_stopped() {
    let engine = engine_with(ProviderRegistry::empty(), 100);
    let request = RunRequest {
        simulate_steps: Some(50),
        ..simulated(RunRequest::direct("scroll forever"))
    };
    engine.start(request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.stop().await);

    let events = engine.stream(None).await.unwrap().collect_events().await;
    match &events.last().unwrap().kind {
        EventKind::End { message } => assert_eq!(message, "Stopped"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(events.iter().filter(|e| e.type_name() == "step").count() < 50);
    assert!(!engine.stop().await);
}

#[tokio::test]
async fn idle_stream_yields_keep_alive() {
    let engine = engine_with(ProviderRegistry::empty(), 300);
    engine
        .start(simulated(RunRequest::direct("slow")))
        .await
        .unwrap();
    let mut stream = engine
        .stream(None)
        .await
        .unwrap()
        .with_idle_interval(Duration::from_millis(20));

    let mut saw_keep_alive = false;
    while let Some(item) = stream.next_item().await {
        if matches!(item, StreamItem::KeepAlive) {
            saw_keep_alive = true;
            break;
        }
    }
    assert!(saw_keep_alive);
    engine.stop().await;
}

#[tokio::test]
async fn simulated_monitor_runs_three_rounds() {
    let engine = engine_with(ProviderRegistry::empty(), 0);
    let request = RunRequest {
        max_rounds: Some(10),
        executor_max_steps: Some(2),
        simulate_monitor: Some(true),
        ..simulated(RunRequest::monitor("check the weather"))
    };
    engine.start(request).await.unwrap();

    let events = engine.stream(None).await.unwrap().collect_events().await;
    assert_eq!(events[0].type_name(), "monitor_start");
    let delegated: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::MonitorDelegate { round, task } => Some((*round, task.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(delegated.len(), 3);
    assert_eq!(
        delegated[0],
        (1, "[simulate monitor] round 1: check the weather".to_string())
    );
    assert_eq!(events.iter().filter(|e| e.type_name() == "step").count(), 6);
    match &events.last().unwrap().kind {
        EventKind::End { message } => assert_eq!(message, "end: simulate monitor completed"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn monitor_run_with_scripted_models_finishes() {
    let registry = ProviderRegistry::empty()
        .with_provider(
            Role::Monitor,
            Arc::new(ScriptedProvider::new(["Open Settings", "end: settings opened"])),
        )
        .with_provider(
            Role::Executor,
            Arc::new(ScriptedProvider::new([
                "do(action=\"Launch\", app=\"Settings\")",
                "finish(message=\"opened\")",
            ])),
        );
    let engine = engine_with(registry, 0);
    engine
        .start(RunRequest::monitor("open settings"))
        .await
        .unwrap();

    let events = engine.stream(None).await.unwrap().collect_events().await;
    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    match &terminal[0].kind {
        EventKind::End { message } => assert_eq!(message, "settings opened"),
        other => panic!("unexpected {other:?}"),
    }
    match &events[0].kind {
        EventKind::MonitorStart { model, executor_model, .. } => {
            assert_eq!(model, "scripted");
            assert_eq!(executor_model, "scripted");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn stream_for_unknown_run_is_not_found() {
    let engine = engine_with(ProviderRegistry::empty(), 0);
    assert!(matches!(
        engine.stream(None).await,
        Err(PhoneClawError::RunNotFound(_))
    ));
    engine
        .start(simulated(RunRequest::direct("x")))
        .await
        .unwrap();
    assert!(matches!(
        engine.stream(Some("nope")).await,
        Err(PhoneClawError::RunNotFound(_))
    ));
}
