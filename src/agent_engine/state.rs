use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionResult};

/// How a run is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// The stepping agent works on the goal alone, up to `max_steps`.
    #[default]
    Direct,
    /// The monitor model decomposes the goal and delegates short bursts.
    #[serde(alias = "supervisor")]
    Monitor,
}

/// Start request as received from the transport. Every `None` falls back to config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunRequest {
    pub mode: RunMode,
    #[serde(alias = "task")]
    pub goal: String,
    pub lang: Option<String>,
    pub max_steps: Option<u32>,
    pub max_rounds: Option<u32>,
    pub executor_max_steps: Option<u32>,
    pub monitor_max_tokens: Option<u32>,
    /// Shared default for both temperatures.
    pub temperature: Option<f64>,
    pub monitor_temperature: Option<f64>,
    pub executor_temperature: Option<f64>,
    pub monitor_use_screenshot: Option<bool>,
    pub monitor_prompt: Option<String>,
    pub simulate: Option<bool>,
    pub simulate_monitor: Option<bool>,
    pub simulate_steps: Option<u32>,
}

impl RunRequest {
    pub fn direct(task: impl Into<String>) -> Self {
        Self {
            mode: RunMode::Direct,
            goal: task.into(),
            ..Self::default()
        }
    }

    pub fn monitor(goal: impl Into<String>) -> Self {
        Self {
            mode: RunMode::Monitor,
            goal: goal.into(),
            ..Self::default()
        }
    }
}

/// What the stepping agent reports for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub thinking: String,
    pub action: Option<Action>,
    pub result: ActionResult,
}

impl StepOutcome {
    pub fn finished(&self) -> bool {
        self.result.should_finish
    }
}

/// One executed step inside a burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step: usize,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub thinking: String,
    pub action: Option<Action>,
    pub success: bool,
    pub finished: bool,
    pub message: Option<String>,
}

impl Step {
    pub fn from_outcome(step: usize, outcome: &StepOutcome) -> Self {
        Self {
            step,
            thinking: outcome.thinking.clone(),
            action: outcome.action.clone(),
            success: outcome.result.success,
            finished: outcome.finished(),
            message: outcome.result.message.clone(),
        }
    }
}

/// Summary of one burst, fed back to the monitor model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub round: usize,
    pub task: String,
    pub finished: bool,
    pub success: bool,
    pub message: String,
    pub current_app: String,
    pub steps: Vec<Step>,
}

impl Observation {
    /// Text block appended to the monitor conversation. Thinking is dropped to
    /// keep the context small.
    pub fn render(&self) -> String {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .map(|s| {
                serde_json::json!({
                    "step": s.step,
                    "action": s.action.as_ref().map(|a| a.to_string()),
                    "success": s.success,
                    "finished": s.finished,
                    "message": s.message,
                })
            })
            .collect();
        let body = serde_json::json!({
            "round": self.round,
            "task": self.task,
            "finished": self.finished,
            "success": self.success,
            "message": self.message,
            "current_app": self.current_app,
            "steps": steps,
        });
        format!("Observation (round {}): {}", self.round, body)
    }
}

/// Monitor loop states.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorState {
    AwaitingDecision { round: usize },
    Delegating { round: usize, task: String },
    Terminated(RunOutcome),
}

/// How a run ended. Exactly one is produced per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Finished { message: String },
    Stopped,
    Failed { message: String, trace: Option<String> },
}
