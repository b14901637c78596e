use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Which loop emitted an event. Absent for run-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Executor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A progress event as streamed to external observers: `{"type": ..., "ts": ..., ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn now(kind: EventKind) -> Self {
        Self {
            ts: Utc::now(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// `end` and `error` close a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::End { .. } | EventKind::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Start {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        scope: Option<Scope>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        round: Option<usize>,
        run_id: String,
        task: String,
        max_steps: u32,
        model: String,
        lang: String,
        temperature: f64,
        api_key_set: bool,
    },
    Step {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        scope: Option<Scope>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        round: Option<usize>,
        step: usize,
        thinking: String,
        action: Option<Action>,
        success: bool,
        finished: bool,
        message: Option<String>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    ConfirmRequired {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        scope: Option<Scope>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        round: Option<usize>,
        message: String,
        decision: String,
    },
    Takeover {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        scope: Option<Scope>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        round: Option<usize>,
        message: String,
    },
    MonitorStart {
        goal: String,
        lang: String,
        model: String,
        executor_model: String,
        monitor_temperature: f64,
        executor_temperature: f64,
        executor_max_steps: u32,
        max_rounds: u32,
        monitor_use_screenshot: bool,
    },
    MonitorDecision {
        round: usize,
        raw: String,
        finish_reason: String,
    },
    MonitorDelegate {
        round: usize,
        task: String,
    },
    BurstEnd {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        scope: Option<Scope>,
        round: usize,
        message: String,
    },
    End {
        message: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        trace: Option<String>,
    },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Start { .. } => "start",
            EventKind::Step { .. } => "step",
            EventKind::Log { .. } => "log",
            EventKind::ConfirmRequired { .. } => "confirm_required",
            EventKind::Takeover { .. } => "takeover",
            EventKind::MonitorStart { .. } => "monitor_start",
            EventKind::MonitorDecision { .. } => "monitor_decision",
            EventKind::MonitorDelegate { .. } => "monitor_delegate",
            EventKind::BurstEnd { .. } => "burst_end",
            EventKind::End { .. } => "end",
            EventKind::Error { .. } => "error",
        }
    }
}
