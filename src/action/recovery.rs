//! Regex recovery for model output the strict parser rejects.
//!
//! Handles extra narration, unescaped quotes inside values and missing fields that
//! can be inferred. Only the fields each action actually needs are extracted.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::action::apps::infer_app_name;
use crate::action::{Action, ActionKind, FieldValue};

const QUOTE_CLASS: &str = "[\"'“”‘’]";

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("recovery pattern is a valid regex"))
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(
        &RE,
        &format!(r#"action\s*=\s*{q}([^"'“”‘’]+){q}"#, q = QUOTE_CLASS),
    )
}

fn app_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(
        &RE,
        &format!(r#"app\s*=\s*{q}([^"'“”‘’]+){q}"#, q = QUOTE_CLASS),
    )
}

fn point_re(field: &'static str) -> &'static Regex {
    static ELEMENT: OnceLock<Regex> = OnceLock::new();
    static START: OnceLock<Regex> = OnceLock::new();
    static END: OnceLock<Regex> = OnceLock::new();
    let cell = match field {
        "start" => &START,
        "end" => &END,
        _ => &ELEMENT,
    };
    compiled(
        cell,
        &format!(
            r"\b{field}\s*=\s*\[\s*(\d{{1,4}}(?:\.\d+)?)\s*[,，]\s*(\d{{1,4}}(?:\.\d+)?)\s*\]"
        ),
    )
}

fn quoted_re(field: &'static str) -> &'static Regex {
    static MESSAGE: OnceLock<Regex> = OnceLock::new();
    static INSTRUCTION: OnceLock<Regex> = OnceLock::new();
    static DURATION: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = match field {
        "instruction" => (&INSTRUCTION, r#"(?s)instruction\s*=\s*["'](.*?)["']"#),
        "duration" => (&DURATION, r#"duration\s*=\s*["']([^"']+)["']"#),
        _ => (&MESSAGE, r#"(?s)message\s*=\s*["'](.*?)["']"#),
    };
    compiled(cell, pattern)
}

/// Attempts to salvage an action from text that failed strict parsing.
pub fn recover(text: &str) -> Option<Action> {
    let text = text.trim();

    if text.starts_with("finish") && text.contains("finish(") {
        let message = extract_tolerant(text, "message").unwrap_or_else(|| text.to_string());
        return Some(Action::Finish { message });
    }

    if !text.starts_with("do") || !text.contains("do(") {
        return None;
    }

    let name = action_re().captures(text)?.get(1)?.as_str().to_string();
    let kind = ActionKind::from_name(&name)?;
    let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();

    match kind {
        ActionKind::Launch => {
            let app = app_re()
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .or_else(|| infer_app_name(text).map(str::to_string))?;
            fields.insert("app".into(), FieldValue::Str(app));
        }
        ActionKind::Back | ActionKind::Home => {}
        ActionKind::Wait => {
            if let Some(duration) = capture_quoted(text, "duration") {
                fields.insert("duration".into(), FieldValue::Str(duration));
            }
        }
        ActionKind::Tap | ActionKind::DoubleTap | ActionKind::LongPress => {
            fields.insert("element".into(), capture_point(text, "element")?);
            // Only Tap treats `message` as a confirmation trigger.
            if kind == ActionKind::Tap {
                if let Some(message) = capture_quoted(text, "message") {
                    fields.insert("message".into(), FieldValue::Str(message));
                }
            }
        }
        ActionKind::Swipe => {
            let start = capture_point(text, "start")?;
            let end = capture_point(text, "end")?;
            fields.insert("start".into(), start);
            fields.insert("end".into(), end);
        }
        ActionKind::Delegate => {
            let task = extract_tolerant(text, "task")?;
            fields.insert("task".into(), FieldValue::Str(task));
        }
        ActionKind::Type | ActionKind::TypeName | ActionKind::Paste | ActionKind::PasteStream => {
            let value = extract_tolerant(text, "text")?;
            fields.insert("text".into(), FieldValue::Str(value));
        }
        ActionKind::TakeOver | ActionKind::Note | ActionKind::CallApi | ActionKind::Interact => {
            for key in ["message", "instruction"] {
                if let Some(value) = capture_quoted(text, key) {
                    fields.insert(key.into(), FieldValue::Str(value));
                }
            }
        }
    }

    tracing::debug!(action = %name, fields = fields.len(), "action recovered by regex fallback");
    Some(Action::Do { name, fields })
}

fn capture_quoted(text: &str, field: &'static str) -> Option<String> {
    quoted_re(field)
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn capture_point(text: &str, field: &'static str) -> Option<FieldValue> {
    let caps = point_re(field).captures(text)?;
    let coord = |i: usize| -> Option<FieldValue> {
        let raw = caps.get(i)?.as_str();
        if raw.contains('.') {
            raw.parse::<f64>().ok().map(FieldValue::Float)
        } else {
            raw.parse::<i64>().ok().map(FieldValue::Int)
        }
    };
    Some(FieldValue::List(vec![coord(1)?, coord(2)?]))
}

/// Everything after `key=` up to the closing parenthesis, with one layer of
/// wrapping quotes removed.
pub fn extract_tolerant(text: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=");
    let idx = text.find(&needle)?;
    let mut value = text[idx + needle.len()..].trim();
    if let Some(stripped) = value.strip_suffix(')') {
        value = stripped.trim_end();
    }
    Some(strip_wrapping_quotes(value))
}

/// Removes an opening quote and its closing partner from the same quote family.
///
/// If the value does not end with a closing quote, it is cut at the last quote of
/// that family, keeping any nested quotes of other families intact.
pub fn strip_wrapping_quotes(value: &str) -> String {
    let Some(first) = value.chars().next() else {
        return String::new();
    };
    let Some(family) = quote_family(first) else {
        return value.to_string();
    };

    let inner = &value[first.len_utf8()..];
    if let Some(last) = inner.chars().last() {
        if family.contains(&last) {
            return inner[..inner.len() - last.len_utf8()].to_string();
        }
    }
    match inner.rfind(|c: char| family.contains(&c)) {
        Some(pos) => inner[..pos].to_string(),
        None => inner.to_string(),
    }
}

fn quote_family(c: char) -> Option<&'static [char]> {
    match c {
        '"' => Some(&['"']),
        '\'' => Some(&['\'']),
        '“' | '”' => Some(&['“', '”']),
        '‘' | '’' => Some(&['‘', '’']),
        _ => None,
    }
}
