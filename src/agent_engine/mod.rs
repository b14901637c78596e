//! Run orchestration: the monitor loop, executor bursts and the event channel
//! that reports on them.

pub mod burst;
pub mod engine;
pub mod events;
pub mod history;
pub mod monitor;
pub mod phone_agent;
pub mod prompts;
pub mod run;
pub mod state;

pub use engine::AgentEngine;
pub use events::{Event, EventKind};
pub use run::{EventStream, RunContext, RunRegistry, StreamItem};
pub use state::{RunMode, RunOutcome, RunRequest};
