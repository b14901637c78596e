use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::action::{parse_action, Action, ActionResult, FieldValue};
use crate::agent_engine::history::ConversationContext;
use crate::agent_engine::prompts;
use crate::agent_engine::state::StepOutcome;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::dispatcher::ActionDispatcher;
use crate::llm::provider::LlmProvider;
use crate::perception::screenshot::Screenshot;

/// Produces one executed action per call. The first call carries the task;
/// later calls continue it.
#[async_trait]
pub trait SteppingAgent: Send {
    async fn step(&mut self, task: Option<&str>) -> PhoneClawResult<StepOutcome>;
}

/// Per-agent model settings.
#[derive(Debug, Clone)]
pub struct StepModelSettings {
    pub lang: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Screenshot → model → parse → dispatch, one action per step.
pub struct PhoneAgent {
    provider: Arc<dyn LlmProvider>,
    dispatcher: ActionDispatcher,
    settings: StepModelSettings,
    context: ConversationContext,
    steps: usize,
}

impl PhoneAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        dispatcher: ActionDispatcher,
        settings: StepModelSettings,
    ) -> Self {
        let context = ConversationContext::new(prompts::executor_prompt(&settings.lang));
        Self {
            provider,
            dispatcher,
            settings,
            context,
            steps: 0,
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    async fn capture(&self) -> (Screenshot, String) {
        let device = self.dispatcher.device();
        let shot = match device.get_screenshot().await {
            Ok(shot) => shot.bounded(self.dispatcher.timing().image_max_side),
            Err(e) => {
                tracing::warn!(error = %e, "screenshot failed, using fallback");
                Screenshot::fallback(false)
            }
        };
        let current_app = device.get_current_app().await.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "current app unavailable");
            String::new()
        });
        (shot, current_app)
    }
}

#[async_trait]
impl SteppingAgent for PhoneAgent {
    async fn step(&mut self, task: Option<&str>) -> PhoneClawResult<StepOutcome> {
        let first = !self.context.has_turns();
        let task = task.map(str::trim).filter(|t| !t.is_empty());
        if first && task.is_none() {
            return Err(PhoneClawError::Agent("the first step needs a task".into()));
        }

        let (shot, current_app) = self.capture().await;
        let screen = prompts::screen_info(&current_app);
        let text = match task {
            Some(task) if first => format!("{task}\n\n{screen}"),
            _ => screen,
        };
        self.context.push_user_with_image(text, Some(&shot));

        let completion = self
            .provider
            .complete(
                self.context.messages(),
                self.settings.max_tokens,
                self.settings.temperature,
            )
            .await?;
        let (thinking, answer) = split_response(&completion.text);

        let action = match parse_action(&answer) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, answer = %answer, "unparsable step, finishing");
                Action::finish(answer.clone())
            }
        };

        self.context.strip_images();
        self.context
            .push_assistant(format!("<think>{thinking}</think><answer>{answer}</answer>"));

        let result = self
            .dispatcher
            .execute(&action, shot.width, shot.height)
            .await;
        self.steps += 1;
        tracing::info!(
            step = self.steps,
            action = action.name(),
            success = result.success,
            finished = result.should_finish,
            "executor step"
        );

        Ok(StepOutcome {
            thinking,
            action: Some(action),
            result,
        })
    }
}

/// Splits a model reply into (thinking, action text).
///
/// The action starts at `finish(message=`, else `do(action=`, else inside
/// `<answer>`; with none of them the whole reply is the action.
pub fn split_response(content: &str) -> (String, String) {
    let content = content.trim();
    for marker in ["finish(message=", "do(action="] {
        if let Some(idx) = content.find(marker) {
            let thinking = strip_tags(&content[..idx]);
            let answer = content[idx..].replace("</answer>", "");
            return (thinking, answer.trim().to_string());
        }
    }
    if let Some((before, after)) = content.split_once("<answer>") {
        let answer = after.replace("</answer>", "");
        return (strip_tags(before), answer.trim().to_string());
    }
    (String::new(), content.to_string())
}

fn strip_tags(text: &str) -> String {
    text.replace("<think>", "")
        .replace("</think>", "")
        .replace("<answer>", "")
        .trim()
        .to_string()
}

/// Stand-in agent for simulate mode: emits synthetic actions without a model
/// or a device.
pub struct SimulatedAgent {
    total: usize,
    index: usize,
    finish_last: bool,
    delay: Duration,
    label: &'static str,
}

impl SimulatedAgent {
    /// `finish_last` marks the final step as finished, as a direct run would.
    pub fn new(total: usize, finish_last: bool, delay: Duration) -> Self {
        Self {
            total: total.max(1),
            index: 0,
            finish_last,
            delay,
            label: "step",
        }
    }

    pub fn for_executor(total: usize, delay: Duration) -> Self {
        Self {
            label: "executor step",
            ..Self::new(total, false, delay)
        }
    }
}

#[async_trait]
impl SteppingAgent for SimulatedAgent {
    async fn step(&mut self, _task: Option<&str>) -> PhoneClawResult<StepOutcome> {
        let index = self.index;
        self.index += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let action = if index == 0 && self.finish_last {
            let mut fields = std::collections::BTreeMap::new();
            fields.insert("app".to_string(), FieldValue::from("Settings"));
            Action::Do {
                name: "Launch".into(),
                fields,
            }
        } else {
            let mut fields = std::collections::BTreeMap::new();
            fields.insert(
                "element".to_string(),
                FieldValue::List(vec![FieldValue::Int(500), FieldValue::Int(500)]),
            );
            Action::Do {
                name: "Tap".into(),
                fields,
            }
        };

        let finished = self.finish_last && self.index >= self.total;
        let result = ActionResult {
            should_finish: finished,
            ..ActionResult::ok_with("ok")
        };
        Ok(StepOutcome {
            thinking: format!("[simulate] {} {index}", self.label),
            action: Some(action),
            result,
        })
    }
}
