//! Forgiving conversion of near-JSON model output into a JSON object.
//!
//! Vision models routinely wrap their answer in prose or Markdown fences, use
//! Python literals, single quotes, bare keys, trailing commas, or stop halfway
//! through an object. [`repair_json_object`] strips the wrapping, rewrites the
//! remaining text into strict JSON with a single character scan, and then hands
//! it to `serde_json`.

use serde_json::{Map, Value};

/// Extracts the first JSON object from `text`, repairing it if needed.
///
/// Returns `None` when no object can be recovered.
pub fn repair_json_object(text: &str) -> Option<Map<String, Value>> {
    repair_json_object_where(text, |_| true)
}

/// Like [`repair_json_object`], but keeps scanning later `{` offsets until an
/// object satisfies `prefer`. Braces in leading prose can otherwise shadow the
/// real answer. Falls back to the first recoverable object.
pub fn repair_json_object_where<F>(text: &str, prefer: F) -> Option<Map<String, Value>>
where
    F: Fn(&Map<String, Value>) -> bool,
{
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let body = fenced_body(trimmed)
        .filter(|body| body.contains('{'))
        .unwrap_or(trimmed);
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) {
        return Some(object);
    }

    let mut fallback = None;
    for (start, _) in body.match_indices('{') {
        let repaired = repair_json(&body[start..]);
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&repaired) else {
            continue;
        };
        if prefer(&object) {
            return Some(object);
        }
        if fallback.is_none() {
            fallback = Some(object);
        }
    }
    fallback
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Open,
    Comma,
    Colon,
    Value,
}

/// Rewrites `text` (expected to start at an opening brace) into strict JSON.
///
/// Scanning stops once the outermost container closes, so trailing prose is
/// dropped. Unterminated strings and containers are closed at end of input.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut closers: Vec<char> = Vec::new();
    let mut last = Last::Open;
    // Output offset of a key that has not been followed by a colon yet.
    let mut dangling_key: Option<usize> = None;
    let mut idx = 0;

    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            '{' | '[' => {
                if last == Last::Value {
                    out.push(',');
                }
                out.push(ch);
                closers.push(if ch == '{' { '}' } else { ']' });
                last = Last::Open;
                idx += 1;
            }
            '}' | ']' => {
                idx += 1;
                if !closers.contains(&ch) {
                    continue;
                }
                settle_tail(&mut out, dangling_key.take());
                while let Some(closer) = closers.pop() {
                    out.push(closer);
                    if closer == ch {
                        break;
                    }
                }
                last = Last::Value;
                if closers.is_empty() {
                    break;
                }
            }
            '"' | '\'' => {
                let key_position = in_key_position(last, &closers);
                if key_position {
                    dangling_key = Some(out.len());
                }
                if last == Last::Value {
                    out.push(',');
                }
                idx = copy_string(&chars, idx, &mut out);
                last = Last::Value;
            }
            ',' => {
                if last == Last::Value {
                    if dangling_key.is_some() {
                        settle_tail(&mut out, dangling_key.take());
                    }
                    if out.ends_with(['{', '[']) {
                        last = Last::Open;
                    } else {
                        out.push(',');
                        last = Last::Comma;
                    }
                }
                idx += 1;
            }
            ':' => {
                if last == Last::Value {
                    out.push(':');
                    last = Last::Colon;
                    dangling_key = None;
                }
                idx += 1;
            }
            ch if ch.is_whitespace() => {
                out.push(ch);
                idx += 1;
            }
            ch if is_word_char(ch) => {
                let key_position = in_key_position(last, &closers);
                if key_position {
                    dangling_key = Some(out.len());
                }
                if last == Last::Value {
                    out.push(',');
                }
                idx = copy_word(&chars, idx, !key_position, &mut out);
                last = Last::Value;
            }
            _ => idx += 1,
        }
    }

    if last == Last::Colon {
        out.push_str(" null");
    }
    settle_tail(&mut out, dangling_key);
    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    out
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let body = text[open + 3..].trim_start_matches(|ch: char| ch.is_ascii_alphanumeric());
    match body.find("```") {
        Some(close) => Some(body[..close].trim()),
        None => Some(body.trim()),
    }
}

fn in_key_position(last: Last, closers: &[char]) -> bool {
    last != Last::Colon && closers.last() == Some(&'}')
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | '+' | '.')
}

/// Drops an unfinished key and any comma left hanging before a closer.
fn settle_tail(out: &mut String, dangling_key: Option<usize>) {
    if let Some(offset) = dangling_key {
        out.truncate(offset);
    }
    let kept = out.trim_end().len();
    out.truncate(kept);
    if out.ends_with(',') {
        out.pop();
    }
}

/// Copies a quoted string starting at `start`, re-quoting it with double quotes.
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut idx = start + 1;
    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            '\\' => match chars.get(idx + 1) {
                Some(&'\'') => {
                    out.push('\'');
                    idx += 2;
                    continue;
                }
                Some(&next) if "\"\\/bfnrtu".contains(next) => {
                    out.push('\\');
                    out.push(next);
                    idx += 2;
                    continue;
                }
                Some(_) => out.push_str("\\\\"),
                None => {}
            },
            ch if ch == quote => {
                if closes_string(chars, idx + 1) {
                    out.push('"');
                    return idx + 1;
                }
                if quote == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push('\'');
                }
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if u32::from(ch) < 0x20 => {}
            ch => out.push(ch),
        }
        idx += 1;
    }
    out.push('"');
    idx
}

/// A quote closes its string when the next significant character is structural,
/// when a line break follows it, or at end of input.
fn closes_string(chars: &[char], from: usize) -> bool {
    let mut saw_newline = false;
    for &ch in &chars[from.min(chars.len())..] {
        if ch == '\n' {
            saw_newline = true;
        }
        if !ch.is_whitespace() {
            return saw_newline || matches!(ch, ',' | ':' | '}' | ']');
        }
    }
    true
}

/// Copies an unquoted token. Keys are quoted as-is; values are either JSON
/// literals, numbers, or the rest of the line up to the next delimiter as a string.
fn copy_word(chars: &[char], start: usize, value_position: bool, out: &mut String) -> usize {
    let mut end = start;
    while end < chars.len() && is_word_char(chars[end]) {
        end += 1;
    }
    let word: String = chars[start..end].iter().collect();
    if !value_position {
        out.push_str(&quoted(&word));
        return end;
    }

    let mut segment_end = start;
    while segment_end < chars.len() && !matches!(chars[segment_end], ',' | '}' | ']' | '\n') {
        segment_end += 1;
    }
    let segment: String = chars[start..segment_end].iter().collect();
    let segment = segment.trim();
    if segment == word {
        if let Some(literal) = literal_token(&word) {
            out.push_str(&literal);
            return end;
        }
    }
    out.push_str(&quoted(segment));
    segment_end
}

fn literal_token(word: &str) -> Option<String> {
    match word {
        "true" | "True" | "TRUE" => return Some("true".to_string()),
        "false" | "False" | "FALSE" => return Some("false".to_string()),
        "null" | "Null" | "NULL" | "None" | "none" | "undefined" => {
            return Some("null".to_string())
        }
        _ => {}
    }
    if !word.starts_with(|ch: char| ch.is_ascii_digit() || ch == '-') {
        return None;
    }
    if let Ok(int) = word.parse::<i64>() {
        return Some(int.to_string());
    }
    let float = word.parse::<f64>().ok()?;
    serde_json::Number::from_f64(float).map(|number| number.to_string())
}

fn quoted(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}
