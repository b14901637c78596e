//! Text-entry helpers for the clipboard-based actions.

use std::time::Duration;

use crate::action::FieldValue;

pub const DEFAULT_CHUNK_LEN: usize = 6;
pub const MAX_CHUNK_LEN: usize = 50;
pub const DEFAULT_PASTE_DELAY: f64 = 0.15;
pub const MAX_PASTE_DELAY: f64 = 2.0;

/// Clearing before a paste never waits longer than this.
pub const MAX_PASTE_CLEAR_DELAY: f64 = 0.8;

/// `Wait` with no usable duration.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(1);
/// Longest single `Wait`; larger requests are cut to this.
pub const MAX_WAIT: Duration = Duration::from_secs(300);

const BREAKS: &[char] = &[
    '，', ',', '。', '.', '!', '！', '?', '？', '；', ';', '：', ':', '、',
];

/// Splits `text` for `Paste_Stream`: punctuation closes a piece, newlines are
/// pieces of their own, and nothing exceeds `max_len` characters.
pub fn split_chunks(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.clamp(1, MAX_CHUNK_LEN);
    let mut segments: Vec<String> = Vec::new();
    let mut buf = String::new();

    for ch in text.chars() {
        if ch == '\n' {
            if !buf.is_empty() {
                segments.push(std::mem::take(&mut buf));
            }
            segments.push("\n".to_string());
        } else if BREAKS.contains(&ch) {
            if !buf.is_empty() {
                buf.push(ch);
                segments.push(std::mem::take(&mut buf));
            } else {
                match segments.last_mut() {
                    Some(last) if last != "\n" => last.push(ch),
                    _ => segments.push(ch.to_string()),
                }
            }
        } else {
            buf.push(ch);
        }
    }
    if !buf.is_empty() {
        segments.push(buf);
    }

    let mut pieces = Vec::new();
    for seg in segments {
        if seg == "\n" {
            pieces.push(seg);
            continue;
        }
        let chars: Vec<char> = seg.chars().collect();
        for chunk in chars.chunks(max_len) {
            pieces.push(chunk.iter().collect());
        }
    }
    pieces
}

/// `max_chunk_len` field: missing, zero or non-numeric falls back to the default.
pub fn chunk_len(value: Option<&FieldValue>) -> usize {
    value
        .and_then(FieldValue::as_f64)
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_CHUNK_LEN)
        .clamp(1, MAX_CHUNK_LEN)
}

/// `delay` field in seconds, clamped to `[0, 2]`.
pub fn paste_delay(value: Option<&FieldValue>) -> Duration {
    let secs = match value {
        None | Some(FieldValue::Null) => DEFAULT_PASTE_DELAY,
        Some(v) => v
            .as_f64()
            .filter(|d| d.is_finite())
            .unwrap_or(DEFAULT_PASTE_DELAY),
    };
    Duration::from_secs_f64(secs.clamp(0.0, MAX_PASTE_DELAY))
}

/// `clear_first` defaults to true when absent.
pub fn clear_first(value: Option<&FieldValue>) -> bool {
    match value {
        None | Some(FieldValue::Null) => true,
        Some(v) => v.is_truthy(),
    }
}

/// Parses `Wait` durations such as `"2 seconds"`, `"500ms"`, `"1.5 min"` or `"3秒"`.
/// A bare number is seconds. Anything unparsable or out of range waits
/// [`DEFAULT_WAIT`]; the result never exceeds [`MAX_WAIT`].
pub fn parse_duration(value: Option<&FieldValue>) -> Duration {
    let Some(value) = value else {
        return DEFAULT_WAIT;
    };
    if let FieldValue::Int(_) | FieldValue::Float(_) = value {
        return value.as_f64().map(wait_from_secs).unwrap_or(DEFAULT_WAIT);
    }
    let Some(raw) = value.as_str() else {
        return DEFAULT_WAIT;
    };

    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let Ok(amount) = number.parse::<f64>() else {
        return DEFAULT_WAIT;
    };
    let unit = unit.trim().to_lowercase();
    let secs = match unit.as_str() {
        "ms" | "msec" | "millisecond" | "milliseconds" | "毫秒" => amount / 1000.0,
        "m" | "min" | "mins" | "minute" | "minutes" | "分钟" => amount * 60.0,
        _ => amount,
    };
    wait_from_secs(secs)
}

fn wait_from_secs(secs: f64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => duration.min(MAX_WAIT),
        Err(_) => DEFAULT_WAIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_closes_pieces() {
        assert_eq!(split_chunks("你好，世界。", 6), vec!["你好，", "世界。"]);
    }

    #[test]
    fn long_runs_are_cut_by_characters() {
        assert_eq!(split_chunks("abcdefgh,", 6), vec!["abcdef", "gh,"]);
        assert_eq!(split_chunks("一二三四五六七", 3), vec!["一二三", "四五六", "七"]);
    }

    #[test]
    fn newlines_stand_alone() {
        assert_eq!(split_chunks("hi\nthere", 10), vec!["hi", "\n", "there"]);
    }

    #[test]
    fn stray_punctuation_attaches_to_previous_piece() {
        assert_eq!(split_chunks("ab,,cd", 10), vec!["ab,,", "cd"]);
        assert_eq!(split_chunks(",x", 10), vec![",", "x"]);
    }

    #[test]
    fn knobs_are_clamped() {
        assert_eq!(chunk_len(None), 6);
        assert_eq!(chunk_len(Some(&FieldValue::Int(0))), 6);
        assert_eq!(chunk_len(Some(&FieldValue::Int(500))), 50);
        assert_eq!(paste_delay(Some(&FieldValue::Float(9.0))), Duration::from_secs(2));
        let fallback = paste_delay(Some(&"fast".into())).as_secs_f64();
        assert!((fallback - DEFAULT_PASTE_DELAY).abs() < 1e-9);
        assert!(clear_first(None));
        assert!(!clear_first(Some(&FieldValue::Bool(false))));
    }

    #[test]
    fn wait_durations() {
        assert_eq!(parse_duration(Some(&"2 seconds".into())), Duration::from_secs(2));
        assert_eq!(parse_duration(Some(&"500ms".into())), Duration::from_millis(500));
        assert_eq!(parse_duration(Some(&"1 min".into())), Duration::from_secs(60));
        assert_eq!(parse_duration(Some(&FieldValue::Int(3))), Duration::from_secs(3));
        assert_eq!(parse_duration(Some(&"soon".into())), Duration::from_secs(1));
        assert_eq!(parse_duration(None), Duration::from_secs(1));
    }

    #[test]
    fn unrepresentable_wait_falls_back_to_default() {
        let huge = parse_duration(Some(&"99999999999999999999 seconds".into()));
        assert_eq!(huge, DEFAULT_WAIT);
        assert_eq!(parse_duration(Some(&FieldValue::Float(-2.0))), DEFAULT_WAIT);
        assert_eq!(parse_duration(Some(&FieldValue::Float(f64::NAN))), DEFAULT_WAIT);
    }

    #[test]
    fn long_wait_is_capped() {
        assert_eq!(parse_duration(Some(&FieldValue::Int(1_000_000_000))), MAX_WAIT);
        assert_eq!(parse_duration(Some(&"90 min".into())), MAX_WAIT);
        assert_eq!(parse_duration(Some(&"4 min".into())), Duration::from_secs(240));
    }
}
