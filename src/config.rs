use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{RunMode, RunRequest};
use crate::errors::{PhoneClawError, PhoneClawResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint, e.g. `http://127.0.0.1:8000/v1/chat/completions`.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    /// Pins a temperature for every role served by this provider.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Optional API key stored in config.toml (falls back to env var PHONECLAW_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Supervisory model: decides what to delegate next.
    pub monitor: Option<RoleEntry>,
    /// Stepping model: emits one `do(...)` / `finish(...)` per step.
    pub executor: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_timeout_secs() -> u64 {
    60
}

/// Defaults for a run; a `RunRequest` may override each of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub lang: String,
    /// Step cap for direct mode.
    pub max_steps: u32,
    pub max_rounds: u32,
    /// Burst size in monitor mode.
    pub executor_max_steps: u32,
    pub monitor_max_tokens: u32,
    pub executor_max_tokens: u32,
    pub monitor_temperature: f64,
    pub executor_temperature: f64,
    pub monitor_use_screenshot: bool,
    pub monitor_prompt: Option<String>,
    pub simulate: bool,
    pub simulate_monitor: bool,
    pub simulate_steps: Option<u32>,
    pub simulate_delay_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lang: "cn".into(),
            max_steps: 100,
            max_rounds: 30,
            executor_max_steps: 3,
            monitor_max_tokens: 800,
            executor_max_tokens: 3000,
            monitor_temperature: 0.0,
            executor_temperature: 0.0,
            monitor_use_screenshot: false,
            monitor_prompt: None,
            simulate: false,
            simulate_monitor: false,
            simulate_steps: None,
            simulate_delay_ms: 200,
        }
    }
}

/// Pauses around device operations, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub keyboard_switch_delay: f64,
    pub text_clear_delay: f64,
    pub text_input_delay: f64,
    pub keyboard_restore_delay: f64,
    /// Screenshots are downscaled to this longest side before reaching the model.
    /// 0 disables downscaling.
    pub image_max_side: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            keyboard_switch_delay: 1.0,
            text_clear_delay: 1.0,
            text_input_delay: 1.0,
            keyboard_restore_delay: 1.0,
            image_max_side: 1600,
        }
    }
}

impl TimingConfig {
    /// No pauses at all; used by simulation and tests.
    pub fn instant() -> Self {
        Self {
            keyboard_switch_delay: 0.0,
            text_clear_delay: 0.0,
            text_input_delay: 0.0,
            keyboard_restore_delay: 0.0,
            image_max_side: 0,
        }
    }
}

/// Seconds → `Duration`, treating negative or non-finite input as zero.
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

pub fn clamp_float(value: Option<f64>, default: f64, min: f64, max: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.clamp(min, max),
        _ => default,
    }
}

/// Temperature precedence: request override, then a value pinned on the
/// role's model, then the run default.
pub fn layer_temperature(request: Option<f64>, role: Option<f64>, run_default: f64) -> f64 {
    clamp_float(request.or(role), run_default, 0.0, 2.0)
}

/// Effective settings of one run: config defaults with request overrides, clamped.
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub mode: RunMode,
    pub goal: String,
    pub lang: String,
    pub max_steps: u32,
    pub max_rounds: u32,
    pub executor_max_steps: u32,
    pub monitor_max_tokens: u32,
    pub executor_max_tokens: u32,
    pub monitor_temperature: f64,
    pub executor_temperature: f64,
    pub monitor_use_screenshot: bool,
    pub monitor_prompt: Option<String>,
    pub simulate: bool,
    pub simulate_monitor: bool,
    pub simulate_steps: u32,
    pub simulate_delay: Duration,
}

impl RunSettings {
    pub fn resolve(defaults: &RunConfig, request: &RunRequest) -> Self {
        let max_steps = request.max_steps.unwrap_or(defaults.max_steps).max(1);
        let executor_max_steps = request
            .executor_max_steps
            .unwrap_or(defaults.executor_max_steps)
            .clamp(1, 10);
        let monitor_prompt = request
            .monitor_prompt
            .clone()
            .or_else(|| defaults.monitor_prompt.clone())
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        let lang = request
            .lang
            .clone()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| defaults.lang.clone());

        Self {
            mode: request.mode,
            goal: request.goal.trim().to_string(),
            lang,
            max_steps,
            max_rounds: request.max_rounds.unwrap_or(defaults.max_rounds).max(1),
            executor_max_steps,
            monitor_max_tokens: request
                .monitor_max_tokens
                .unwrap_or(defaults.monitor_max_tokens)
                .clamp(50, 4000),
            executor_max_tokens: defaults.executor_max_tokens.max(50),
            monitor_temperature: clamp_float(
                request.monitor_temperature.or(request.temperature),
                clamp_float(Some(defaults.monitor_temperature), 0.0, 0.0, 2.0),
                0.0,
                2.0,
            ),
            executor_temperature: clamp_float(
                request.executor_temperature.or(request.temperature),
                clamp_float(Some(defaults.executor_temperature), 0.0, 0.0, 2.0),
                0.0,
                2.0,
            ),
            monitor_use_screenshot: request
                .monitor_use_screenshot
                .unwrap_or(defaults.monitor_use_screenshot),
            monitor_prompt,
            simulate: request.simulate.unwrap_or(defaults.simulate),
            simulate_monitor: request.simulate_monitor.unwrap_or(defaults.simulate_monitor),
            simulate_steps: request
                .simulate_steps
                .or(defaults.simulate_steps)
                .unwrap_or_else(|| max_steps.min(8))
                .max(1),
            simulate_delay: Duration::from_millis(defaults.simulate_delay_ms),
        }
    }
}

/// `abcd...wxyz` for logging; empty when no real key is configured.
pub fn mask_api_key(api_key: &str) -> String {
    let key = api_key.trim();
    if key.is_empty() || key.eq_ignore_ascii_case("EMPTY") {
        return String::new();
    }
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn resolve_config_path() -> PhoneClawResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("phoneclaw").join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(PhoneClawError::Config(
        "config.toml not found next to executable, in working directory or in the user config dir"
            .into(),
    ))
}

pub fn load_config() -> PhoneClawResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> PhoneClawResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut config: AppConfig = toml::from_str(&content)?;
    apply_env_overrides(&mut config);
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> PhoneClawResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

/// `PHONECLAW_*` environment variables win over the file.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(lang) = std::env::var("PHONECLAW_LANG") {
        if !lang.trim().is_empty() {
            config.run.lang = lang.trim().to_string();
        }
    }
    if let Some(v) = env_parse::<u32>("PHONECLAW_MAX_STEPS") {
        config.run.max_steps = v;
    }
    if let Some(v) = env_parse::<u32>("PHONECLAW_MAX_ROUNDS") {
        config.run.max_rounds = v;
    }
    if let Some(v) = env_parse::<f64>("PHONECLAW_TEMPERATURE") {
        config.run.monitor_temperature = v;
        config.run.executor_temperature = v;
    }
    if let Some(v) = env_parse::<u32>("PHONECLAW_IMAGE_MAX_SIDE") {
        config.timing.image_max_side = v;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
