use thiserror::Error;

use crate::action::{FieldError, ParseError};

#[derive(Debug, Error)]
pub enum PhoneClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Field error: {0}")]
    Field(#[from] FieldError),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("A run is already in progress")]
    RunInProgress,

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PhoneClawError {
    /// Renders the error and its `source()` chain, one cause per line.
    /// Used as the `trace` payload of `error` events.
    pub fn trace(&self) -> String {
        let mut out = format!("{self:?}");
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

impl serde::Serialize for PhoneClawError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PhoneClawResult<T> = Result<T, PhoneClawError>;
