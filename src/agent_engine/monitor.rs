use std::sync::Arc;

use crate::action::recovery::extract_tolerant;
use crate::action::{parse_action, Action, ActionKind};
use crate::agent_engine::burst::{current_app, BurstRunner};
use crate::agent_engine::events::{EventKind, LogLevel};
use crate::agent_engine::history::ConversationContext;
use crate::agent_engine::prompts;
use crate::agent_engine::run::RunContext;
use crate::agent_engine::state::{MonitorState, RunOutcome};
use crate::config::RunSettings;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::device::DeviceBackend;
use crate::llm::provider::LlmProvider;
use crate::llm::types::Completion;

/// Decodes a monitor reply that the action parser rejected.
///
/// `end:` (any case) finishes with the rest of the line; a `finish(` call that
/// did not parse finishes with the whole text; `task=` is pulled out
/// tolerantly; anything else is taken as the subtask itself.
pub fn parse_relaxed(text: &str) -> Action {
    let text = text.trim();
    if let Some(rest) = strip_end_marker(text) {
        let message = rest.trim();
        return Action::finish(if message.is_empty() { text } else { message });
    }
    if text.contains("finish(") {
        return Action::finish(text);
    }
    if text.contains("task=") {
        if let Some(task) = extract_tolerant(text, "task") {
            return Action::delegate(task.trim());
        }
    }
    Action::delegate(text)
}

fn strip_end_marker(text: &str) -> Option<&str> {
    ["end:", "end\u{ff1a}"].into_iter().find_map(|marker| {
        text.get(..marker.len())
            .filter(|head| head.eq_ignore_ascii_case(marker))
            .map(|_| &text[marker.len()..])
    })
}

/// Supervisory loop: one reasoning call per round, each followed by a burst.
pub struct MonitorLoop {
    run: Arc<RunContext>,
    provider: Arc<dyn LlmProvider>,
    burst: BurstRunner,
    device: Arc<dyn DeviceBackend>,
    settings: RunSettings,
    context: ConversationContext,
    use_screenshot: bool,
    image_max_side: u32,
}

impl MonitorLoop {
    /// `settings.monitor_temperature` is used as is; callers layer role
    /// overrides in beforehand.
    pub fn new(
        run: Arc<RunContext>,
        provider: Arc<dyn LlmProvider>,
        burst: BurstRunner,
        device: Arc<dyn DeviceBackend>,
        settings: RunSettings,
    ) -> Self {
        let system = settings
            .monitor_prompt
            .clone()
            .unwrap_or_else(|| prompts::monitor_prompt(&settings.lang).to_string());
        let use_screenshot = settings.monitor_use_screenshot;
        Self {
            run,
            provider,
            burst,
            device,
            context: ConversationContext::new(system),
            settings,
            use_screenshot,
            image_max_side: 0,
        }
    }

    /// Longest side of screenshots sent to the monitor; 0 sends them as captured.
    pub fn with_image_max_side(mut self, max_side: u32) -> Self {
        self.image_max_side = max_side;
        self
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub async fn run(mut self) -> RunOutcome {
        let goal = prompts::goal_message(&self.settings.lang, &self.settings.goal);
        self.push_observation(goal).await;

        let mut state = MonitorState::AwaitingDecision { round: 1 };
        loop {
            state = match state {
                MonitorState::AwaitingDecision { round } => self.decide(round).await,
                MonitorState::Delegating { round, task } => self.delegate(round, task).await,
                MonitorState::Terminated(outcome) => return outcome,
            };
        }
    }

    async fn decide(&mut self, round: usize) -> MonitorState {
        if self.run.is_cancelled() {
            return MonitorState::Terminated(RunOutcome::Stopped);
        }
        let max_rounds = self.settings.max_rounds as usize;
        if round > max_rounds {
            return MonitorState::Terminated(RunOutcome::Finished {
                message: format!("end: reached max_rounds={max_rounds}"),
            });
        }

        let completion = match self.request().await {
            Ok(completion) => completion,
            Err(e) => return MonitorState::Terminated(failure("monitor request failed", &e)),
        };
        if completion.truncated() {
            self.run.log(
                LogLevel::Warn,
                format!("[monitor] round {round} reply truncated (finish_reason=length)"),
            );
        }
        let raw = completion.text.trim().to_string();
        self.run.emit(EventKind::MonitorDecision {
            round,
            raw: raw.clone(),
            finish_reason: completion.finish_reason.clone(),
        });
        self.context.push_assistant(raw.clone());

        let action = parse_action(&raw).unwrap_or_else(|e| {
            tracing::debug!(round, error = %e, "monitor reply not a call, relaxed decode");
            parse_relaxed(&raw)
        });
        let task = match action {
            Action::Finish { message } => {
                let message = if message.trim().is_empty() {
                    "end".to_string()
                } else {
                    message
                };
                tracing::info!(round, message = %message, "monitor finished");
                return MonitorState::Terminated(RunOutcome::Finished { message });
            }
            other if other.kind() == Some(ActionKind::Delegate) => {
                other.str_field("task").unwrap_or_default().trim().to_string()
            }
            other => {
                tracing::debug!(round, action = other.name(), "device action from monitor, delegating raw text");
                raw.clone()
            }
        };

        if task.is_empty() {
            return MonitorState::Terminated(RunOutcome::Failed {
                message: "monitor Delegate missing task".into(),
                trace: None,
            });
        }
        tracing::info!(round, task = %task, "monitor delegating");
        self.run.emit(EventKind::MonitorDelegate {
            round,
            task: task.clone(),
        });
        MonitorState::Delegating { round, task }
    }

    async fn delegate(&mut self, round: usize, task: String) -> MonitorState {
        let observation = match self
            .burst
            .run(round, &task, self.settings.executor_max_steps)
            .await
        {
            Ok(observation) => observation,
            Err(e) => return MonitorState::Terminated(failure("executor burst failed", &e)),
        };
        self.push_observation(observation.render()).await;
        MonitorState::AwaitingDecision { round: round + 1 }
    }

    /// Appends a user turn, with a fresh screenshot when augmentation is on.
    async fn push_observation(&mut self, text: String) {
        if !self.use_screenshot {
            self.context.push_user(text);
            return;
        }
        match self.device.get_screenshot().await {
            Ok(shot) => {
                let shot = shot.bounded(self.image_max_side);
                let app = current_app(self.device.as_ref()).await;
                self.context
                    .push_user_with_image(format!("{text}\n\nCurrentApp: {app}"), Some(&shot));
            }
            Err(e) => {
                tracing::warn!(error = %e, "monitor screenshot failed, sending text only");
                self.context.push_user_with_image(text, None);
            }
        }
    }

    /// One reasoning call. A failure while images are attached turns
    /// screenshots off for the rest of the run and retries once without them.
    async fn request(&mut self) -> PhoneClawResult<Completion> {
        let max_tokens = self.settings.monitor_max_tokens;
        let temperature = self.settings.monitor_temperature;
        match self
            .provider
            .complete(self.context.messages(), max_tokens, temperature)
            .await
        {
            Ok(completion) => Ok(completion),
            Err(e) if self.use_screenshot => {
                tracing::warn!(error = %e, "vision request rejected");
                self.run
                    .log(LogLevel::Warn, "[monitor] vision request failed, retry text-only");
                self.use_screenshot = false;
                self.context.strip_images();
                self.provider
                    .complete(self.context.messages(), max_tokens, temperature)
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

/// Monitor stand-in that delegates a fixed script without calling a model.
pub async fn run_simulated_monitor(
    run: &RunContext,
    burst: &BurstRunner,
    settings: &RunSettings,
) -> RunOutcome {
    run.log(LogLevel::Info, "[monitor] Simulate monitor enabled (no LLM call)");
    let rounds = settings.max_rounds.min(3) as usize;
    for round in 1..=rounds {
        if run.is_cancelled() {
            return RunOutcome::Stopped;
        }
        let task = format!("[simulate monitor] round {round}: {}", settings.goal);
        run.emit(EventKind::MonitorDelegate {
            round,
            task: task.clone(),
        });
        if let Err(e) = burst.run(round, &task, settings.executor_max_steps).await {
            return failure("executor burst failed", &e);
        }
    }
    if run.is_cancelled() {
        return RunOutcome::Stopped;
    }
    RunOutcome::Finished {
        message: "end: simulate monitor completed".into(),
    }
}

/// Run failure carrying the rendered cause chain.
pub fn failure(context: &str, error: &PhoneClawError) -> RunOutcome {
    RunOutcome::Failed {
        message: format!("{context}: {error}"),
        trace: Some(error.trace()),
    }
}
