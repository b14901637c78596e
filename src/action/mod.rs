//! The action language: `do(action="Tap", element=[500, 500])` / `finish(message="...")`.
//!
//! Model output is decoded into an [`Action`] by [`parse_action`], which tries the
//! strict structural parser first and falls back to regex recovery.

pub mod apps;
pub mod coords;
pub mod parser;
pub mod recovery;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use coords::normalize_point;
pub use parser::{isolate_call_expression, normalize_punctuation, parse_action, parse_strict};

/// A literal argument value inside a call expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric coercion: numbers as-is, strings when they parse as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Python-style truthiness, used for flags such as `clear_first`.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Bool(b) => *b,
            FieldValue::Int(i) => *i != 0,
            FieldValue::Float(f) => *f != 0.0,
            FieldValue::Str(s) => !s.is_empty(),
            FieldValue::List(items) => !items.is_empty(),
        }
    }

    /// String rendering used when a field is read as text (`text=123` types "123").
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "None"),
            FieldValue::Bool(true) => write!(f, "True"),
            FieldValue::Bool(false) => write!(f, "False"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x:?}"),
            FieldValue::Str(s) => write!(f, "{s:?}"),
            FieldValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

/// A decoded model command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Do {
        name: String,
        fields: BTreeMap<String, FieldValue>,
    },
    Finish {
        message: String,
    },
}

impl Action {
    pub fn finish(message: impl Into<String>) -> Self {
        Action::Finish {
            message: message.into(),
        }
    }

    pub fn delegate(task: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("task".to_string(), FieldValue::Str(task.into()));
        Action::Do {
            name: ActionKind::Delegate.name().to_string(),
            fields,
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }

    /// Action name for `Do`, `"finish"` for `Finish`.
    pub fn name(&self) -> &str {
        match self {
            Action::Do { name, .. } => name,
            Action::Finish { .. } => "finish",
        }
    }

    pub fn kind(&self) -> Option<ActionKind> {
        match self {
            Action::Do { name, .. } => ActionKind::from_name(name),
            Action::Finish { .. } => None,
        }
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        match self {
            Action::Do { fields, .. } => fields.get(key),
            Action::Finish { .. } => None,
        }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(FieldValue::as_str)
    }
}

impl fmt::Display for Action {
    /// Renders back into the call-expression syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Finish { message } => write!(f, "finish(message={message:?})"),
            Action::Do { name, fields } => {
                write!(f, "do(action={name:?}")?;
                for (key, value) in fields {
                    write!(f, ", {key}={value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// The closed set of `do(...)` action names understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Launch,
    Tap,
    DoubleTap,
    LongPress,
    Swipe,
    Type,
    TypeName,
    Paste,
    PasteStream,
    Back,
    Home,
    Wait,
    TakeOver,
    Note,
    CallApi,
    Interact,
    /// Monitor-only: hands a subtask to the executor.
    Delegate,
}

impl ActionKind {
    pub const ALL: [ActionKind; 17] = [
        ActionKind::Launch,
        ActionKind::Tap,
        ActionKind::DoubleTap,
        ActionKind::LongPress,
        ActionKind::Swipe,
        ActionKind::Type,
        ActionKind::TypeName,
        ActionKind::Paste,
        ActionKind::PasteStream,
        ActionKind::Back,
        ActionKind::Home,
        ActionKind::Wait,
        ActionKind::TakeOver,
        ActionKind::Note,
        ActionKind::CallApi,
        ActionKind::Interact,
        ActionKind::Delegate,
    ];

    /// Wire name as emitted by the model.
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Launch => "Launch",
            ActionKind::Tap => "Tap",
            ActionKind::DoubleTap => "Double Tap",
            ActionKind::LongPress => "Long Press",
            ActionKind::Swipe => "Swipe",
            ActionKind::Type => "Type",
            ActionKind::TypeName => "Type_Name",
            ActionKind::Paste => "Paste",
            ActionKind::PasteStream => "Paste_Stream",
            ActionKind::Back => "Back",
            ActionKind::Home => "Home",
            ActionKind::Wait => "Wait",
            ActionKind::TakeOver => "Take_over",
            ActionKind::Note => "Note",
            ActionKind::CallApi => "Call_API",
            ActionKind::Interact => "Interact",
            ActionKind::Delegate => "Delegate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

/// Outcome of dispatching one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub should_finish: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            should_finish: false,
            message: None,
            requires_confirmation: false,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: Some(message.into()),
            requires_confirmation: false,
        }
    }

    pub fn finished(message: Option<String>) -> Self {
        Self {
            success: true,
            should_finish: true,
            message,
            requires_confirmation: false,
        }
    }
}

/// Why a piece of model text could not be decoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty action")]
    Empty,

    #[error("syntax error at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: String },

    #[error("unexpected function: {0}")]
    UnknownCallHead(String),

    #[error("positional arguments are not supported")]
    PositionalArgument,

    #[error("failed to parse action: {text}")]
    Unrecognized { text: String },
}

/// A recognized command whose fields are missing or malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
}
