use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::agent_engine::burst::{
    AgentFactory, BurstRunner, DirectRunner, PhoneAgentFactory, SimulatedAgentFactory,
};
use crate::agent_engine::events::{EventKind, LogLevel};
use crate::agent_engine::monitor::{run_simulated_monitor, MonitorLoop};
use crate::agent_engine::phone_agent::StepModelSettings;
use crate::agent_engine::run::{EventStream, RunContext, RunRegistry};
use crate::agent_engine::state::{RunMode, RunOutcome, RunRequest};
use crate::config::{layer_temperature, AppConfig, RunSettings};
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::device::DeviceBackend;
use crate::llm::provider::LlmProvider;
use crate::llm::registry::{ProviderRegistry, Role};

/// Owns configuration, collaborators and the single active run.
pub struct AgentEngine {
    config: AppConfig,
    runs: RunRegistry,
    providers: Arc<ProviderRegistry>,
    device: Arc<dyn DeviceBackend>,
}

/// Everything a run needs, resolved before its task is spawned.
struct RunPlan {
    settings: RunSettings,
    executor: Arc<dyn AgentFactory>,
    monitor: Option<Arc<dyn LlmProvider>>,
    image_max_side: u32,
}

impl AgentEngine {
    pub fn new(
        config: AppConfig,
        providers: Arc<ProviderRegistry>,
        device: Arc<dyn DeviceBackend>,
    ) -> Self {
        Self {
            config,
            runs: RunRegistry::new(),
            providers,
            device,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Starts a run on its own task and returns its id. Refused with
    /// `RunInProgress` while another run is active.
    pub async fn start(&self, request: RunRequest) -> PhoneClawResult<String> {
        if self.active_run().await.is_some() {
            return Err(PhoneClawError::RunInProgress);
        }
        let plan = self.plan(&request)?;
        let device = self.device.clone();
        let run = self
            .runs
            .spawn(move |run| async move {
                let worker = drive(run.clone(), plan, device);
                let outcome = match AssertUnwindSafe(worker).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!(run_id = %run.id(), "run worker panicked");
                        RunOutcome::Failed {
                            message: "run worker panicked".into(),
                            trace: None,
                        }
                    }
                };
                close(&run, outcome);
            })
            .await?;
        Ok(run.id().to_string())
    }

    /// Requests cancellation; observed at the next round or step boundary.
    pub async fn stop(&self) -> bool {
        self.runs.stop().await
    }

    pub async fn stream(&self, run_id: Option<&str>) -> PhoneClawResult<EventStream> {
        self.runs.stream(run_id).await
    }

    /// The current run, if one was started and is not done yet.
    pub async fn active_run(&self) -> Option<Arc<RunContext>> {
        self.runs.current().await.filter(|run| !run.is_done())
    }

    fn plan(&self, request: &RunRequest) -> PhoneClawResult<RunPlan> {
        let mut settings = RunSettings::resolve(&self.config.run, request);

        let executor: Arc<dyn AgentFactory> = if settings.simulate {
            match settings.mode {
                RunMode::Direct => Arc::new(SimulatedAgentFactory::direct(
                    settings.simulate_steps as usize,
                    settings.simulate_delay,
                )),
                RunMode::Monitor => Arc::new(SimulatedAgentFactory::executor(settings.simulate_delay)),
            }
        } else {
            let binding = self.providers.for_role(Role::Executor)?;
            settings.executor_temperature = layer_temperature(
                request.executor_temperature.or(request.temperature),
                binding.temperature,
                settings.executor_temperature,
            );
            Arc::new(PhoneAgentFactory::new(
                binding.provider,
                self.device.clone(),
                self.config.timing.clone(),
                StepModelSettings {
                    lang: settings.lang.clone(),
                    max_tokens: settings.executor_max_tokens,
                    temperature: settings.executor_temperature,
                },
            ))
        };

        let monitor = if settings.mode == RunMode::Monitor && !settings.simulate_monitor {
            let binding = self.providers.for_role(Role::Monitor)?;
            settings.monitor_temperature = layer_temperature(
                request.monitor_temperature.or(request.temperature),
                binding.temperature,
                settings.monitor_temperature,
            );
            Some(binding.provider)
        } else {
            None
        };

        Ok(RunPlan {
            settings,
            executor,
            monitor,
            image_max_side: self.config.timing.image_max_side,
        })
    }
}

async fn drive(run: Arc<RunContext>, plan: RunPlan, device: Arc<dyn DeviceBackend>) -> RunOutcome {
    let RunPlan {
        settings,
        executor,
        monitor,
        image_max_side,
    } = plan;

    if settings.goal.is_empty() {
        let message = match settings.mode {
            RunMode::Direct => "task is required",
            RunMode::Monitor => "goal is required",
        };
        return RunOutcome::Failed {
            message: message.into(),
            trace: None,
        };
    }

    match settings.mode {
        RunMode::Direct => {
            let (max_steps, simulated) = if settings.simulate {
                run.log(
                    LogLevel::Info,
                    format!(
                        "Simulate mode enabled: steps={}, delay_ms={}",
                        settings.simulate_steps,
                        settings.simulate_delay.as_millis()
                    ),
                );
                (settings.simulate_steps, true)
            } else {
                (settings.max_steps, false)
            };
            let outcome = DirectRunner::new(
                run.clone(),
                executor,
                settings.lang.clone(),
                settings.executor_temperature,
            )
            .run(&settings.goal, max_steps)
            .await;
            match outcome {
                RunOutcome::Finished { .. } if simulated => RunOutcome::Finished {
                    message: "Simulated run completed".into(),
                },
                other => other,
            }
        }
        RunMode::Monitor => {
            run.emit(EventKind::MonitorStart {
                goal: settings.goal.clone(),
                lang: settings.lang.clone(),
                model: monitor
                    .as_ref()
                    .map(|p| p.model().to_string())
                    .unwrap_or_else(|| "simulate".into()),
                executor_model: executor.model().to_string(),
                monitor_temperature: settings.monitor_temperature,
                executor_temperature: settings.executor_temperature,
                executor_max_steps: settings.executor_max_steps,
                max_rounds: settings.max_rounds,
                monitor_use_screenshot: settings.monitor_use_screenshot,
            });
            let burst = BurstRunner::new(
                run.clone(),
                executor,
                device.clone(),
                settings.lang.clone(),
                settings.executor_temperature,
            );
            match monitor {
                Some(provider) => {
                    MonitorLoop::new(run.clone(), provider, burst, device, settings)
                        .with_image_max_side(image_max_side)
                        .run()
                        .await
                }
                None => run_simulated_monitor(&run, &burst, &settings).await,
            }
        }
    }
}

/// Emits the single terminal event of a run.
fn close(run: &RunContext, outcome: RunOutcome) {
    match outcome {
        RunOutcome::Finished { message } => {
            tracing::info!(run_id = %run.id(), message = %message, "run ended");
            run.emit(EventKind::End { message });
        }
        RunOutcome::Stopped => {
            tracing::info!(run_id = %run.id(), "run stopped");
            run.emit(EventKind::End {
                message: "Stopped".into(),
            });
        }
        RunOutcome::Failed { message, trace } => {
            tracing::error!(run_id = %run.id(), error = %message, "run failed");
            run.emit(EventKind::Error { message, trace });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::simulated::SimulatedDevice;
    use crate::llm::providers::scripted::ScriptedProvider;

    fn engine(registry: ProviderRegistry) -> AgentEngine {
        let mut config = AppConfig::default();
        config.timing = crate::config::TimingConfig::instant();
        config.run.simulate_delay_ms = 0;
        AgentEngine::new(config, Arc::new(registry), Arc::new(SimulatedDevice::new()))
    }

    #[tokio::test]
    async fn empty_goal_ends_with_error() {
        let engine = engine(ProviderRegistry::empty());
        let request = RunRequest {
            simulate: Some(true),
            ..RunRequest::direct("   ")
        };
        engine.start(request).await.unwrap();
        let events = engine.stream(None).await.unwrap().collect_events().await;
        match &events.last().unwrap().kind {
            EventKind::Error { message, .. } => assert_eq!(message, "task is required"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_provider_refuses_to_start() {
        let engine = engine(ProviderRegistry::empty());
        assert!(engine.start(RunRequest::direct("open settings")).await.is_err());
        assert!(engine.active_run().await.is_none());
    }

    #[tokio::test]
    async fn role_temperature_layers_under_request() {
        let provider = Arc::new(ScriptedProvider::new(["finish(message=\"ok\")"]));
        let engine = engine(ProviderRegistry::empty().with_provider(Role::Executor, provider));
        let request = RunRequest {
            executor_temperature: Some(0.7),
            ..RunRequest::direct("open settings")
        };
        let plan = engine.plan(&request).unwrap();
        assert_eq!(plan.settings.executor_temperature, 0.7);
        assert!(plan.monitor.is_none());
    }
}
