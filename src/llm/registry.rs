use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;

/// Which loop a model serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Decides what to delegate next.
    Monitor,
    /// Emits one device action per step.
    Executor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Monitor => "monitor",
            Role::Executor => "executor",
        }
    }
}

/// A provider resolved for a role, with the temperature pinned in config, if any.
#[derive(Clone)]
pub struct RoleBinding {
    pub provider: Arc<dyn LlmProvider>,
    pub temperature: Option<f64>,
}

/// Resolves roles to providers from `[llm]` config. Injected bindings win
/// over config, which is how simulation and tests swap in scripted models.
pub struct ProviderRegistry {
    llm_config: LlmConfig,
    overrides: HashMap<Role, RoleBinding>,
}

impl ProviderRegistry {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            llm_config: config.llm.clone(),
            overrides: HashMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            llm_config: LlmConfig::default(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, role: Role, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(role, provider);
        self
    }

    pub fn register(&mut self, role: Role, provider: Arc<dyn LlmProvider>) {
        tracing::debug!(role = role.as_str(), provider = provider.name(), "provider bound");
        self.overrides.insert(
            role,
            RoleBinding {
                provider,
                temperature: None,
            },
        );
    }

    pub fn list_names(&self) -> Vec<String> {
        self.llm_config.providers.keys().cloned().collect()
    }

    /// Role resolution order:
    /// 1. a binding registered in code
    /// 2. `[llm.roles.<role>]`
    /// 3. the active provider with its default model and temperature
    pub fn for_role(&self, role: Role) -> PhoneClawResult<RoleBinding> {
        if let Some(binding) = self.overrides.get(&role) {
            return Ok(binding.clone());
        }

        let role_entry = match role {
            Role::Monitor => self.llm_config.roles.monitor.as_ref(),
            Role::Executor => self.llm_config.roles.executor.as_ref(),
        };
        if let Some(entry) = role_entry {
            return self.build(role, entry);
        }

        let active = &self.llm_config.active_provider;
        let provider = self.llm_config.providers.get(active).ok_or_else(|| {
            PhoneClawError::Config(format!(
                "no [llm.roles.{}] entry and active provider '{active}' is not configured",
                role.as_str()
            ))
        })?;
        tracing::debug!(
            role = role.as_str(),
            provider = %active,
            model = %provider.model,
            "role not configured, using active provider fallback"
        );
        self.build(
            role,
            &RoleEntry {
                provider: active.clone(),
                model: provider.model.clone(),
                temperature: None,
            },
        )
    }

    fn build(&self, role: Role, entry: &RoleEntry) -> PhoneClawResult<RoleBinding> {
        let provider = self.llm_config.providers.get(&entry.provider).ok_or_else(|| {
            PhoneClawError::Config(format!(
                "Role '{}' references unknown provider '{}'",
                role.as_str(),
                entry.provider
            ))
        })?;
        let api_key = std::env::var(format!("PHONECLAW_{}_API_KEY", entry.provider.to_uppercase()))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| provider.api_key.clone())
            .unwrap_or_default();
        let temperature = entry.temperature.or(provider.temperature);
        tracing::debug!(
            role = role.as_str(),
            provider = %entry.provider,
            model = %entry.model,
            temperature = ?temperature,
            "resolved role config"
        );
        let client = OpenAiCompatibleProvider::new(
            entry.provider.clone(),
            &provider.api_base,
            api_key,
            entry.model.clone(),
            Duration::from_secs(provider.timeout_secs.max(1)),
        )?;
        Ok(RoleBinding {
            provider: Arc::new(client),
            temperature,
        })
    }
}
