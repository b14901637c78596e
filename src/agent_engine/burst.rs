use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::agent_engine::events::{EventKind, LogLevel, Scope};
use crate::agent_engine::phone_agent::{
    PhoneAgent, SimulatedAgent, StepModelSettings, SteppingAgent,
};
use crate::agent_engine::run::RunContext;
use crate::agent_engine::state::{Observation, RunOutcome, Step};
use crate::config::TimingConfig;
use crate::errors::PhoneClawResult;
use crate::executor::device::{ConfirmationHandler, DeviceBackend, TakeoverHandler};
use crate::executor::dispatcher::ActionDispatcher;
use crate::llm::provider::LlmProvider;

/// Collaborators handed to the dispatcher of one burst.
#[derive(Clone)]
pub struct BurstHooks {
    pub confirmation: Arc<dyn ConfirmationHandler>,
    pub takeover: Arc<dyn TakeoverHandler>,
    /// Interrupts in-flight waits when the run is stopped.
    pub cancel: CancellationToken,
}

impl BurstHooks {
    /// Unattended hooks: confirmations are denied and reported as
    /// `confirm_required`, takeovers are reported and cancel the run.
    pub fn unattended(run: Arc<RunContext>, round: Option<usize>) -> Self {
        let scope = round.map(|_| Scope::Executor);
        let cancel = run.cancellation_token();
        let confirm_run = run.clone();
        let confirmation = move |message: &str| {
            tracing::warn!(run_id = %confirm_run.id(), round, prompt = message, "confirmation auto-denied");
            confirm_run.emit(EventKind::ConfirmRequired {
                scope,
                round,
                message: message.to_string(),
                decision: "denied".into(),
            });
            false
        };
        let takeover = move |message: &str| {
            tracing::warn!(run_id = %run.id(), round, reason = message, "takeover requested, cancelling run");
            run.emit(EventKind::Takeover {
                scope,
                round,
                message: message.to_string(),
            });
            run.cancel();
        };
        Self {
            confirmation: Arc::new(confirmation),
            takeover: Arc::new(takeover),
            cancel,
        }
    }
}

/// Builds a fresh stepping agent for every burst.
pub trait AgentFactory: Send + Sync {
    fn create(&self, hooks: BurstHooks) -> PhoneClawResult<Box<dyn SteppingAgent>>;

    fn model(&self) -> &str;

    fn api_key_set(&self) -> bool {
        false
    }
}

pub struct PhoneAgentFactory {
    provider: Arc<dyn LlmProvider>,
    device: Arc<dyn DeviceBackend>,
    timing: TimingConfig,
    settings: StepModelSettings,
}

impl PhoneAgentFactory {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        device: Arc<dyn DeviceBackend>,
        timing: TimingConfig,
        settings: StepModelSettings,
    ) -> Self {
        Self {
            provider,
            device,
            timing,
            settings,
        }
    }
}

impl AgentFactory for PhoneAgentFactory {
    fn create(&self, hooks: BurstHooks) -> PhoneClawResult<Box<dyn SteppingAgent>> {
        let dispatcher = ActionDispatcher::new(self.device.clone(), self.timing.clone())
            .with_confirmation(hooks.confirmation)
            .with_takeover(hooks.takeover)
            .with_cancellation(hooks.cancel);
        Ok(Box::new(PhoneAgent::new(
            self.provider.clone(),
            dispatcher,
            self.settings.clone(),
        )))
    }

    fn model(&self) -> &str {
        self.provider.model()
    }

    fn api_key_set(&self) -> bool {
        self.provider.api_key_set()
    }
}

/// Synthetic agents for simulate mode. `steps` only matters for direct runs;
/// inside a burst the step cap decides.
pub struct SimulatedAgentFactory {
    steps: usize,
    delay: Duration,
    finish_last: bool,
}

impl SimulatedAgentFactory {
    pub fn direct(steps: usize, delay: Duration) -> Self {
        Self {
            steps,
            delay,
            finish_last: true,
        }
    }

    pub fn executor(delay: Duration) -> Self {
        Self {
            steps: usize::MAX,
            delay,
            finish_last: false,
        }
    }
}

impl AgentFactory for SimulatedAgentFactory {
    fn create(&self, _hooks: BurstHooks) -> PhoneClawResult<Box<dyn SteppingAgent>> {
        if self.finish_last {
            Ok(Box::new(SimulatedAgent::new(self.steps, true, self.delay)))
        } else {
            Ok(Box::new(SimulatedAgent::for_executor(self.steps, self.delay)))
        }
    }

    fn model(&self) -> &str {
        "simulate"
    }
}

/// Runs one delegated subtask as a capped burst of executor steps.
pub struct BurstRunner {
    run: Arc<RunContext>,
    factory: Arc<dyn AgentFactory>,
    device: Arc<dyn DeviceBackend>,
    lang: String,
    temperature: f64,
}

impl BurstRunner {
    pub fn new(
        run: Arc<RunContext>,
        factory: Arc<dyn AgentFactory>,
        device: Arc<dyn DeviceBackend>,
        lang: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            run,
            factory,
            device,
            lang: lang.into(),
            temperature,
        }
    }

    /// Steps with the task first, then without input, until finished,
    /// cancelled or `max_steps` is reached.
    pub async fn run(&self, round: usize, task: &str, max_steps: u32) -> PhoneClawResult<Observation> {
        let scope = Some(Scope::Executor);
        self.run.emit(EventKind::Start {
            scope,
            round: Some(round),
            run_id: self.run.id().to_string(),
            task: task.to_string(),
            max_steps,
            model: self.factory.model().to_string(),
            lang: self.lang.clone(),
            temperature: self.temperature,
            api_key_set: self.factory.api_key_set(),
        });

        let mut agent = self
            .factory
            .create(BurstHooks::unattended(self.run.clone(), Some(round)))?;
        let mut steps: Vec<Step> = Vec::new();
        let mut finished = false;

        for idx in 0..max_steps as usize {
            if self.run.is_cancelled() {
                tracing::info!(round, step = idx, "burst stopped by cancellation");
                break;
            }
            let input = if idx == 0 { Some(task) } else { None };
            let outcome = agent.step(input).await?;
            let step = Step::from_outcome(idx, &outcome);
            self.run.emit(EventKind::Step {
                scope,
                round: Some(round),
                step: step.step,
                thinking: step.thinking.clone(),
                action: step.action.clone(),
                success: step.success,
                finished: step.finished,
                message: step.message.clone(),
            });
            steps.push(step);
            if outcome.finished() {
                finished = true;
                break;
            }
        }

        let current_app = current_app(self.device.as_ref()).await;
        let last = steps.last();
        let message = last.and_then(|s| s.message.clone()).unwrap_or_default();
        let summary = if !message.is_empty() {
            message.clone()
        } else if finished {
            "finished".to_string()
        } else {
            "burst limit reached".to_string()
        };
        tracing::info!(round, steps = steps.len(), finished, app = %current_app, "burst ended");
        self.run.emit(EventKind::BurstEnd {
            scope,
            round,
            message: summary,
        });

        Ok(Observation {
            round,
            task: task.to_string(),
            finished,
            success: last.is_some_and(|s| s.success),
            message,
            current_app,
            steps,
        })
    }
}

/// Foreground app, or an empty string when the device cannot tell.
pub async fn current_app(device: &dyn DeviceBackend) -> String {
    match device.get_current_app().await {
        Ok(app) => app,
        Err(e) => {
            tracing::debug!(error = %e, "current app unavailable");
            String::new()
        }
    }
}

/// Direct mode: a single agent works on the goal for up to `max_steps`.
pub struct DirectRunner {
    run: Arc<RunContext>,
    factory: Arc<dyn AgentFactory>,
    lang: String,
    temperature: f64,
}

impl DirectRunner {
    pub fn new(
        run: Arc<RunContext>,
        factory: Arc<dyn AgentFactory>,
        lang: impl Into<String>,
        temperature: f64,
    ) -> Self {
        Self {
            run,
            factory,
            lang: lang.into(),
            temperature,
        }
    }

    pub async fn run(&self, task: &str, max_steps: u32) -> RunOutcome {
        self.run.emit(EventKind::Start {
            scope: None,
            round: None,
            run_id: self.run.id().to_string(),
            task: task.to_string(),
            max_steps,
            model: self.factory.model().to_string(),
            lang: self.lang.clone(),
            temperature: self.temperature,
            api_key_set: self.factory.api_key_set(),
        });

        let mut agent = match self.factory.create(BurstHooks::unattended(self.run.clone(), None)) {
            Ok(agent) => agent,
            Err(e) => {
                return RunOutcome::Failed {
                    message: e.to_string(),
                    trace: Some(e.trace()),
                }
            }
        };

        let mut last_message: Option<String> = None;
        for idx in 0..max_steps as usize {
            if self.run.is_cancelled() {
                self.run.log(LogLevel::Warn, "run cancelled");
                return RunOutcome::Stopped;
            }
            let input = if idx == 0 { Some(task) } else { None };
            let outcome = match agent.step(input).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    return RunOutcome::Failed {
                        message: e.to_string(),
                        trace: Some(e.trace()),
                    }
                }
            };
            self.run.emit(EventKind::Step {
                scope: None,
                round: None,
                step: idx,
                thinking: outcome.thinking.clone(),
                action: outcome.action.clone(),
                success: outcome.result.success,
                finished: outcome.finished(),
                message: outcome.result.message.clone(),
            });
            last_message = outcome.result.message.clone().filter(|m| !m.is_empty());
            if outcome.finished() {
                return RunOutcome::Finished {
                    message: last_message.unwrap_or_else(|| "Task completed".into()),
                };
            }
        }

        if self.run.is_cancelled() {
            self.run.log(LogLevel::Warn, "run cancelled");
            return RunOutcome::Stopped;
        }
        match last_message {
            Some(message) => RunOutcome::Finished { message },
            None => RunOutcome::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::events::Event;
    use crate::agent_engine::run::EventStream;
    use crate::executor::simulated::SimulatedDevice;
    use crate::llm::providers::scripted::ScriptedProvider;

    fn phone_factory(replies: &[&str], device: Arc<SimulatedDevice>) -> Arc<dyn AgentFactory> {
        Arc::new(PhoneAgentFactory::new(
            Arc::new(ScriptedProvider::new(replies.iter().copied())),
            device,
            TimingConfig::instant(),
            StepModelSettings {
                lang: "en".into(),
                max_tokens: 500,
                temperature: 0.0,
            },
        ))
    }

    async fn drain(run: &Arc<RunContext>) -> Vec<Event> {
        run.finish();
        EventStream::new(run.clone()).collect_events().await
    }

    #[tokio::test]
    async fn burst_stops_at_step_cap() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        device.set_current_app("Settings");
        let runner = BurstRunner::new(
            run.clone(),
            phone_factory(&["do(action=\"Back\")"], device.clone()),
            device,
            "en",
            0.0,
        );

        let obs = runner.run(1, "go back", 2).await.unwrap();
        assert_eq!(obs.steps.len(), 2);
        assert!(!obs.finished);
        assert_eq!(obs.message, "");
        assert_eq!(obs.current_app, "Settings");

        let events = drain(&run).await;
        let types: Vec<_> = events.iter().map(Event::type_name).collect();
        assert_eq!(types, vec!["start", "step", "step", "burst_end"]);
        match &events[3].kind {
            EventKind::BurstEnd { message, .. } => assert_eq!(message, "burst limit reached"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn observation_message_comes_from_the_last_step_only() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let runner = BurstRunner::new(
            run.clone(),
            phone_factory(&["do(action=\"Teleport\")", "do(action=\"Back\")"], device.clone()),
            device,
            "en",
            0.0,
        );
        let obs = runner.run(1, "go somewhere", 2).await.unwrap();
        assert_eq!(obs.steps[0].message.as_deref(), Some("Unknown action: Teleport"));
        assert_eq!(obs.message, "");
        assert!(obs.success);
    }

    #[tokio::test]
    async fn burst_ends_early_on_finish() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let runner = BurstRunner::new(
            run.clone(),
            phone_factory(&["finish(message=\"wifi is on\")"], device.clone()),
            device,
            "en",
            0.0,
        );
        let obs = runner.run(2, "check wifi", 3).await.unwrap();
        assert!(obs.finished && obs.success);
        assert_eq!(obs.steps.len(), 1);
        assert_eq!(obs.message, "wifi is on");
    }

    #[tokio::test]
    async fn sensitive_tap_is_denied_and_reported() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let runner = BurstRunner::new(
            run.clone(),
            phone_factory(
                &["do(action=\"Tap\", element=[500, 500], message=\"pay now\")"],
                device.clone(),
            ),
            device.clone(),
            "en",
            0.0,
        );
        let obs = runner.run(1, "pay", 3).await.unwrap();
        assert!(obs.finished && !obs.success);
        assert!(device.calls().is_empty());

        let events = drain(&run).await;
        let confirm = events
            .iter()
            .find(|e| e.type_name() == "confirm_required")
            .unwrap();
        match &confirm.kind {
            EventKind::ConfirmRequired { decision, round, .. } => {
                assert_eq!(decision, "denied");
                assert_eq!(*round, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn takeover_cancels_the_run() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let runner = BurstRunner::new(
            run.clone(),
            phone_factory(&["do(action=\"Take_over\", message=\"login\")"], device.clone()),
            device,
            "en",
            0.0,
        );
        let obs = runner.run(1, "log in", 3).await.unwrap();
        assert_eq!(obs.steps.len(), 1);
        assert!(run.is_cancelled());
        assert!(drain(&run).await.iter().any(|e| e.type_name() == "takeover"));
    }

    #[tokio::test]
    async fn direct_simulated_run_finishes() {
        let run = Arc::new(RunContext::new());
        let factory = Arc::new(SimulatedAgentFactory::direct(3, Duration::ZERO));
        let outcome = DirectRunner::new(run.clone(), factory, "cn", 0.0)
            .run("open settings", 10)
            .await;
        assert_eq!(
            outcome,
            RunOutcome::Finished {
                message: "ok".into()
            }
        );
        let steps = drain(&run)
            .await
            .iter()
            .filter(|e| e.type_name() == "step")
            .count();
        assert_eq!(steps, 3);
    }

    #[tokio::test]
    async fn direct_run_ignores_messages_from_earlier_steps() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let factory = phone_factory(&["do(action=\"Teleport\")", "do(action=\"Back\")"], device);
        let outcome = DirectRunner::new(run.clone(), factory, "en", 0.0)
            .run("wander", 3)
            .await;
        assert_eq!(outcome, RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn direct_run_at_step_cap_reports_final_message() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let factory = phone_factory(&["do(action=\"Back\")", "do(action=\"Teleport\")"], device);
        let outcome = DirectRunner::new(run.clone(), factory, "en", 0.0)
            .run("wander", 2)
            .await;
        assert_eq!(
            outcome,
            RunOutcome::Finished {
                message: "Unknown action: Teleport".into()
            }
        );
    }

    #[tokio::test]
    async fn stopping_interrupts_a_long_wait() {
        let run = Arc::new(RunContext::new());
        let device = Arc::new(SimulatedDevice::new());
        let runner = BurstRunner::new(
            run.clone(),
            phone_factory(&["do(action=\"Wait\", duration=\"200 seconds\")"], device.clone()),
            device,
            "en",
            0.0,
        );
        let stopper = run.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });
        let obs = tokio::time::timeout(Duration::from_secs(5), runner.run(1, "wait", 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(obs.steps.len(), 1);
    }

    #[tokio::test]
    async fn direct_run_observes_cancellation() {
        let run = Arc::new(RunContext::new());
        run.cancel();
        let factory = Arc::new(SimulatedAgentFactory::direct(3, Duration::ZERO));
        let outcome = DirectRunner::new(run.clone(), factory, "cn", 0.0)
            .run("open settings", 10)
            .await;
        assert_eq!(outcome, RunOutcome::Stopped);
    }
}
