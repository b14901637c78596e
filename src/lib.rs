pub mod action;
pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;

pub use crate::action::{parse_action, Action, ActionKind, ActionResult};
pub use crate::agent_engine::{AgentEngine, Event, EventKind, EventStream, RunMode, RunRequest};
pub use crate::config::AppConfig;
pub use crate::errors::{PhoneClawError, PhoneClawResult};

use crate::executor::device::DeviceBackend;
use crate::llm::registry::ProviderRegistry;

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the default
/// `info` directive. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Loads `.env` if present.
pub fn load_env() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), ".env loaded"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to read .env"),
    }
}

/// Builds an engine from `config.toml` for the given device. Without a config
/// file the engine starts with defaults and an empty model registry, which
/// still serves simulated runs.
pub fn engine_from_env(device: Arc<dyn DeviceBackend>) -> AgentEngine {
    load_env();
    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config; using defaults");
            AppConfig::default()
        }
    };
    let registry = ProviderRegistry::from_config(&config);
    tracing::info!(providers = ?registry.list_names(), "provider registry ready");
    AgentEngine::new(config, Arc::new(registry), device)
}
