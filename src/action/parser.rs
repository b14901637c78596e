use std::collections::BTreeMap;

use crate::action::recovery;
use crate::action::{Action, FieldValue, ParseError};

const CALL_HEADS: [&str; 2] = ["do(", "finish("];

/// Maps full-width parentheses and comma to ASCII.
///
/// Quotes are left alone: smart quotes routinely appear inside string values and
/// rewriting them would unbalance otherwise valid calls.
pub fn normalize_punctuation(text: &str) -> String {
    text.replace('（', "(").replace('）', ")").replace('，', ",")
}

/// Cuts the first `do(...)` / `finish(...)` call out of surrounding narration.
///
/// Parentheses inside string literals do not count toward nesting. If the call never
/// balances, everything from the call head onward is returned. Text without any call
/// head is returned trimmed.
pub fn isolate_call_expression(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = CALL_HEADS.iter().filter_map(|head| text.find(head)).min() else {
        return text;
    };

    let s = &text[start..];
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    let mut escape = false;
    for (i, ch) in s.char_indices() {
        if let Some(quote) = in_str {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == quote {
                in_str = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => in_str = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return &s[..i + ch.len_utf8()];
                }
            }
            _ => {}
        }
    }
    s
}

/// Full tiered decode: normalize, isolate, strict parse, then regex recovery.
pub fn parse_action(response: &str) -> Result<Action, ParseError> {
    let normalized = normalize_punctuation(response);
    let isolated = isolate_call_expression(&normalized);
    if isolated.is_empty() {
        return Err(ParseError::Empty);
    }
    tracing::debug!(text = %isolated, "parsing action");

    match parse_strict(isolated) {
        Ok(action) => return Ok(action),
        Err(e) => tracing::debug!(error = %e, "strict parse failed, trying recovery"),
    }

    recovery::recover(isolated).ok_or_else(|| ParseError::Unrecognized {
        text: isolated.to_string(),
    })
}

/// Parses exactly one `do(...)` or `finish(...)` call with keyword-only literal
/// arguments.
pub fn parse_strict(text: &str) -> Result<Action, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut cur = Cursor::new(text);
    cur.skip_ws();
    let head = cur
        .ident()
        .ok_or_else(|| cur.error("expected a function call"))?;
    cur.skip_ws();
    cur.expect('(')?;
    if head != "do" && head != "finish" {
        return Err(ParseError::UnknownCallHead(head.to_string()));
    }

    let mut kwargs: BTreeMap<String, FieldValue> = BTreeMap::new();
    loop {
        cur.skip_ws();
        if cur.eat(')') {
            break;
        }

        let checkpoint = cur.pos;
        let key = match cur.ident() {
            Some(key) => key,
            None => {
                cur.pos = checkpoint;
                cur.literal()?;
                return Err(ParseError::PositionalArgument);
            }
        };
        cur.skip_ws();
        if !cur.eat('=') || cur.peek() == Some('=') {
            return Err(ParseError::PositionalArgument);
        }
        let value = cur.literal()?;
        if kwargs.insert(key.to_string(), value).is_some() {
            return Err(cur.error(&format!("keyword argument repeated: {key}")));
        }

        cur.skip_ws();
        if cur.eat(',') {
            continue;
        }
        cur.expect(')')?;
        break;
    }

    cur.skip_ws();
    if cur.peek().is_some() {
        return Err(cur.error("unexpected trailing characters"));
    }

    if head == "finish" {
        let message = kwargs.remove("message").map(|v| v.to_text()).unwrap_or_default();
        return Ok(Action::Finish { message });
    }

    let name = match kwargs.remove("action") {
        Some(FieldValue::Str(name)) => name,
        _ => return Err(cur.error("do() requires action=\"<name>\"")),
    };
    Ok(Action::Do {
        name,
        fields: kwargs,
    })
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, reason: &str) -> ParseError {
        ParseError::Syntax {
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c == '_' || c.is_alphabetic() => {
                self.bump();
            }
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c == '_' || c.is_alphanumeric()) {
            self.bump();
        }
        Some(&self.src[start..self.pos])
    }

    fn literal(&mut self) -> Result<FieldValue, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('"') | Some('\'') => {
                let mut s = self.string()?;
                // Adjacent literals concatenate: "a" "b" == "ab".
                loop {
                    let checkpoint = self.pos;
                    self.skip_ws();
                    if matches!(self.peek(), Some('"') | Some('\'')) {
                        s.push_str(&self.string()?);
                    } else {
                        self.pos = checkpoint;
                        break;
                    }
                }
                Ok(FieldValue::Str(s))
            }
            Some('[') => {
                self.bump();
                self.sequence(']')
            }
            Some('(') => {
                self.bump();
                self.sequence(')')
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            Some(_) => {
                let checkpoint = self.pos;
                match self.ident() {
                    Some("True") => Ok(FieldValue::Bool(true)),
                    Some("False") => Ok(FieldValue::Bool(false)),
                    Some("None") => Ok(FieldValue::Null),
                    _ => {
                        self.pos = checkpoint;
                        Err(self.error("expected a literal value"))
                    }
                }
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn sequence(&mut self, close: char) -> Result<FieldValue, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(FieldValue::List(items));
            }
            items.push(self.literal()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect(close)?;
            return Ok(FieldValue::List(items));
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' => out.push(escaped),
                '\n' => {}
                'u' => out.push(self.hex_escape(4)?),
                'x' => out.push(self.hex_escape(2)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, ParseError> {
        let start = self.pos;
        for _ in 0..digits {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => {}
                _ => return Err(self.error("truncated escape sequence")),
            }
        }
        u32::from_str_radix(&self.src[start..self.pos], 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn number(&mut self) -> Result<FieldValue, ParseError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        let raw: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if !is_float {
            if let Ok(i) = raw.parse::<i64>() {
                return Ok(FieldValue::Int(i));
            }
        }
        raw.parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|_| ParseError::Syntax {
                offset: start,
                reason: format!("invalid number: {raw}"),
            })
    }
}
