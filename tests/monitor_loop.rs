use std::sync::Arc;

use phoneclaw_lib::agent_engine::burst::{AgentFactory, BurstRunner, PhoneAgentFactory};
use phoneclaw_lib::agent_engine::events::{Event, EventKind};
use phoneclaw_lib::agent_engine::monitor::MonitorLoop;
use phoneclaw_lib::agent_engine::phone_agent::StepModelSettings;
use phoneclaw_lib::agent_engine::run::{EventStream, RunContext};
use phoneclaw_lib::agent_engine::state::{RunOutcome, RunRequest};
use phoneclaw_lib::config::{RunConfig, RunSettings, TimingConfig};
use phoneclaw_lib::executor::simulated::{DeviceCall, SimulatedDevice};
use phoneclaw_lib::llm::providers::scripted::{ScriptedProvider, ScriptedReply};

struct Harness {
    run: Arc<RunContext>,
    device: Arc<SimulatedDevice>,
    monitor: Arc<ScriptedProvider>,
    executor: Arc<ScriptedProvider>,
}

impl Harness {
    fn new(monitor: ScriptedProvider, executor: ScriptedProvider) -> Self {
        Self {
            run: Arc::new(RunContext::new()),
            device: Arc::new(SimulatedDevice::new()),
            monitor: Arc::new(monitor),
            executor: Arc::new(executor),
        }
    }

    fn settings(&self, max_rounds: u32, executor_max_steps: u32) -> RunSettings {
        let defaults = RunConfig {
            lang: "en".into(),
            max_rounds,
            executor_max_steps,
            ..RunConfig::default()
        };
        RunSettings::resolve(&defaults, &RunRequest::monitor("turn on wifi"))
    }

    async fn drive(&self, settings: RunSettings) -> RunOutcome {
        let factory: Arc<dyn AgentFactory> = Arc::new(PhoneAgentFactory::new(
            self.executor.clone(),
            self.device.clone(),
            TimingConfig::instant(),
            StepModelSettings {
                lang: "en".into(),
                max_tokens: 500,
                temperature: 0.0,
            },
        ));
        let burst = BurstRunner::new(self.run.clone(), factory, self.device.clone(), "en", 0.0);
        MonitorLoop::new(
            self.run.clone(),
            self.monitor.clone(),
            burst,
            self.device.clone(),
            settings,
        )
        .run()
        .await
    }

    async fn events(&self) -> Vec<Event> {
        self.run.finish();
        EventStream::new(self.run.clone()).collect_events().await
    }
}

fn count(events: &[Event], kind: &str) -> usize {
    events.iter().filter(|e| e.type_name() == kind).count()
}

#[tokio::test]
async fn single_round_then_synthesized_end() {
    let h = Harness::new(
        ScriptedProvider::new(["Open Settings and tap [Wi-Fi]"]),
        ScriptedProvider::new(["<think>back</think><answer>do(action=\"Back\")</answer>"]),
    );
    let outcome = h.drive(h.settings(1, 2)).await;
    assert_eq!(
        outcome,
        RunOutcome::Finished {
            message: "end: reached max_rounds=1".into()
        }
    );
    assert_eq!(h.monitor.call_count(), 1);
    assert_eq!(h.device.calls(), vec![DeviceCall::Back, DeviceCall::Back]);

    let events = h.events().await;
    assert_eq!(count(&events, "monitor_decision"), 1);
    assert_eq!(count(&events, "monitor_delegate"), 1);
    assert_eq!(count(&events, "step"), 2);
    assert_eq!(count(&events, "burst_end"), 1);
}

#[tokio::test]
async fn end_marker_finishes_without_a_burst() {
    let h = Harness::new(
        ScriptedProvider::new(["end: wifi is already on"]),
        ScriptedProvider::new(["finish(message=\"unused\")"]),
    );
    let outcome = h.drive(h.settings(5, 3)).await;
    assert_eq!(
        outcome,
        RunOutcome::Finished {
            message: "wifi is already on".into()
        }
    );
    assert_eq!(h.executor.call_count(), 0);
    assert!(h.device.calls().is_empty());
}

#[tokio::test]
async fn observation_is_fed_back_to_the_monitor() {
    let h = Harness::new(
        ScriptedProvider::new(["Open Settings", "finish(message=\"done\")"]),
        ScriptedProvider::new(["do(action=\"Launch\", app=\"Settings\")", "finish(message=\"opened\")"]),
    );
    let outcome = h.drive(h.settings(5, 3)).await;
    assert_eq!(
        outcome,
        RunOutcome::Finished {
            message: "done".into()
        }
    );

    let requests = h.monitor.requests();
    assert_eq!(requests.len(), 2);
    let observation = requests[1].last().unwrap().content.text();
    assert!(observation.starts_with("Observation (round 1): "));
    assert!(observation.contains("\"current_app\":\"Settings\""));
    assert!(observation.contains("\"message\":\"opened\""));
}

#[tokio::test]
async fn takeover_cancels_mid_burst_and_stops_the_loop() {
    let h = Harness::new(
        ScriptedProvider::new(["Log in to the account"]),
        ScriptedProvider::new(["do(action=\"Take_over\", message=\"needs password\")"]),
    );
    let outcome = h.drive(h.settings(5, 3)).await;
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(h.executor.call_count(), 1);
    assert_eq!(h.monitor.call_count(), 1);

    let events = h.events().await;
    assert_eq!(count(&events, "takeover"), 1);
    assert_eq!(count(&events, "step"), 1);
}

#[tokio::test]
async fn cancelled_run_makes_no_model_call() {
    let h = Harness::new(
        ScriptedProvider::new(["Open Settings"]),
        ScriptedProvider::new(["do(action=\"Back\")"]),
    );
    h.run.cancel();
    assert_eq!(h.drive(h.settings(5, 3)).await, RunOutcome::Stopped);
    assert_eq!(h.monitor.call_count(), 0);
}

#[tokio::test]
async fn rejected_screenshot_downgrades_to_text() {
    let h = Harness::new(
        ScriptedProvider::new(["end: done"]).rejecting_images(),
        ScriptedProvider::new(["do(action=\"Back\")"]),
    );
    let mut settings = h.settings(5, 3);
    settings.monitor_use_screenshot = true;
    let outcome = h.drive(settings).await;
    assert_eq!(
        outcome,
        RunOutcome::Finished {
            message: "done".into()
        }
    );

    let requests = h.monitor.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].iter().any(|m| m.has_image()));
    assert!(requests[1].iter().all(|m| !m.has_image()));

    let events = h.events().await;
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::Log { message, .. } if message == "[monitor] vision request failed, retry text-only"
    )));
}

#[tokio::test]
async fn empty_delegate_task_fails_the_run() {
    let h = Harness::new(
        ScriptedProvider::new(["do(action=\"Delegate\", task=\"\")"]),
        ScriptedProvider::new(["do(action=\"Back\")"]),
    );
    match h.drive(h.settings(5, 3)).await {
        RunOutcome::Failed { message, .. } => assert_eq!(message, "monitor Delegate missing task"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn burst_error_fails_the_run_with_trace() {
    let h = Harness::new(
        ScriptedProvider::new(["Open Settings"]),
        ScriptedProvider::new(vec![ScriptedReply::Error("503: overloaded".into())]),
    );
    match h.drive(h.settings(5, 3)).await {
        RunOutcome::Failed { message, trace } => {
            assert!(message.starts_with("executor burst failed: "));
            assert!(message.contains("503: overloaded"));
            assert!(trace.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn device_action_from_monitor_is_delegated_as_text() {
    let h = Harness::new(
        ScriptedProvider::new(["do(action=\"Home\")", "end: ok"]),
        ScriptedProvider::new(["finish(message=\"went home\")"]),
    );
    h.drive(h.settings(5, 3)).await;
    let events = h.events().await;
    let delegated = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::MonitorDelegate { task, .. } => Some(task.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(delegated, "do(action=\"Home\")");
}
