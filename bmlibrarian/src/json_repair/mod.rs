//! Recovers valid JSON from free-form LLM output (§4.5).
//!
//! LLMs asked for structured output reliably produce *almost* valid
//! JSON: single quotes where double were expected, a trailing comma
//! before a closing brace, a truncated tail because the model hit its
//! token budget mid-object. [`repair_json`] applies a fixed catalogue
//! of repairs, each aware of string-literal boundaries so it never
//! mangles the contents of a string while fixing the structure around
//! it.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JsonRepairError {
    #[error("input exceeds the {0}-byte repair cap")]
    TooLarge(usize),
    #[error("no JSON object or array found in text")]
    NotFound,
    #[error("could not repair into valid JSON after {0} attempt(s): {1}")]
    Unrepairable(u32, String),
}

/// Hard cap on input size, so a pathologically large response can never
/// make repair itself the bottleneck.
const MAX_INPUT_BYTES: usize = 1_000_000;

/// Attempt to parse `text` as JSON, applying [`repair_json`] only if the
/// direct parse fails and `repair` is true.
pub fn safe_json_loads(text: &str, repair: bool) -> Result<Value, JsonRepairError> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }
    if !repair {
        return Err(JsonRepairError::Unrepairable(0, "direct parse failed and repair disabled".to_string()));
    }

    let candidate = extract_json_from_text(text).unwrap_or_else(|| text.to_string());
    let repaired = repair_json(&candidate, 3)?;
    serde_json::from_str(&repaired).map_err(|e| JsonRepairError::Unrepairable(3, e.to_string()))
}

/// Find the first balanced JSON object or array substring in `text`,
/// preferring one fenced inside a \`\`\` code block over bare text.
pub fn extract_json_from_text(text: &str) -> Option<String> {
    for block in fenced_code_blocks(text) {
        if let Some(found) = first_balanced_value(&block) {
            return Some(found);
        }
    }
    first_balanced_value(text)
}

/// Extract the contents of every \`\`\`-fenced block, stripping an
/// optional language tag on the opening fence (e.g. \`\`\`json).
fn fenced_code_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after_open = &rest[start + 3..];
        let lang_end = after_open.find('\n').unwrap_or(0);
        let body_start = lang_end + 1;
        let Some(close) = after_open[body_start..].find("```") else {
            break;
        };
        blocks.push(after_open[body_start..body_start + close].to_string());
        rest = &after_open[body_start + close + 3..];
    }
    blocks
}

/// Scan for the first `{` or `[` and return the shortest substring
/// starting there that is bracket-balanced, tracking string literals
/// (including escapes) so brackets inside strings are never counted.
fn first_balanced_value(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| *c == '{' || *c == '[')?;

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &ch) in chars[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(chars[start..end].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

/// Apply the repair catalogue, re-attempting the parse after the full
/// pass up to `max_attempts` times (a later pass can expose structure a
/// prior one had masked, e.g. quoting a key reveals a missing comma
/// after it).
pub fn repair_json(text: &str, max_attempts: u32) -> Result<String, JsonRepairError> {
    if text.len() > MAX_INPUT_BYTES {
        return Err(JsonRepairError::TooLarge(MAX_INPUT_BYTES));
    }
    if first_balanced_value(text).is_none() && serde_json::from_str::<Value>(text.trim()).is_err() {
        return Err(JsonRepairError::NotFound);
    }

    let mut current = text.to_string();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts.max(1) {
        current = normalize_single_quoted_strings(&current);
        current = escape_control_chars_in_strings(&current);
        current = close_unbalanced_structure(&current);
        current = remove_trailing_commas(&current);
        current = insert_missing_commas(&current);
        current = quote_unquoted_keys(&current);

        match serde_json::from_str::<Value>(&current) {
            Ok(_) => return Ok(current),
            Err(e) => last_error = e.to_string(),
        }
        let _ = attempt;
    }

    Err(JsonRepairError::Unrepairable(max_attempts, last_error))
}

/// A cursor over a JSON candidate that tracks string-literal state so
/// every repair pass can skip characters it must not touch.
struct StringAwareScan<'a> {
    chars: &'a [char],
    in_string: bool,
    quote: char,
    escaped: bool,
}

impl<'a> StringAwareScan<'a> {
    fn new(chars: &'a [char]) -> Self {
        Self {
            chars,
            in_string: false,
            quote: '"',
            escaped: false,
        }
    }

    /// Advance past `chars[i]`, updating string state. Returns whether
    /// `i` was itself inside a string literal (the opening/closing
    /// quote counts as inside).
    fn advance(&mut self, i: usize) -> bool {
        let ch = self.chars[i];
        if self.in_string {
            let was_in_string = true;
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == self.quote {
                self.in_string = false;
            }
            was_in_string
        } else {
            if ch == '"' || ch == '\'' {
                self.in_string = true;
                self.quote = ch;
            }
            false
        }
    }
}

/// Rewrite `'single quoted'` strings to `"double quoted"`, escaping any
/// literal double quotes the original string contained. Only triggers
/// on single quotes that are acting as a string delimiter, i.e. not
/// already inside a double-quoted string.
fn normalize_single_quoted_strings(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    let mut in_double_string = false;
    let mut escaped = false;

    while i < chars.len() {
        let ch = chars[i];
        if in_double_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_double_string = false;
            }
            i += 1;
            continue;
        }

        if ch == '"' {
            in_double_string = true;
            out.push(ch);
            i += 1;
            continue;
        }

        if ch == '\'' {
            // Scan to the matching unescaped single quote.
            let mut j = i + 1;
            let mut body = String::new();
            let mut closed = false;
            while j < chars.len() {
                if chars[j] == '\\' && j + 1 < chars.len() {
                    body.push(chars[j]);
                    body.push(chars[j + 1]);
                    j += 2;
                    continue;
                }
                if chars[j] == '\'' {
                    closed = true;
                    break;
                }
                body.push(chars[j]);
                j += 1;
            }
            if closed {
                out.push('"');
                out.push_str(&body.replace('"', "\\\""));
                out.push('"');
                i = j + 1;
                continue;
            }
        }

        out.push(ch);
        i += 1;
    }
    out
}

/// Escape raw newlines, carriage returns, and tabs found inside
/// (already double-quoted) string literals.
fn escape_control_chars_in_strings(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut scan = StringAwareScan::new(&chars);

    for i in 0..chars.len() {
        let was_in_string_before = scan.in_string;
        let in_string = scan.advance(i);
        let ch = chars[i];

        if was_in_string_before && in_string {
            match ch {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {}
                c => out.push(c),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Close a string left open, and any brackets/braces left open, at the
/// end of truncated input. Closers are appended in the reverse order
/// the corresponding openers were seen.
fn close_unbalanced_structure(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for &ch in &chars {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out: String = chars.iter().collect();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Drop a comma that is followed, modulo whitespace, only by a closing
/// `}` or `]` — i.e. a trailing comma before the end of a container.
fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut scan = StringAwareScan::new(&chars);

    let mut i = 0;
    while i < chars.len() {
        let in_string = scan.advance(i);
        let ch = chars[i];

        if !in_string && ch == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(ch);
        i += 1;
    }
    out
}

/// Insert a comma between two adjacent values/properties that have no
/// separator, e.g. `"a": 1 "b": 2` or `} {` or `] "next"`.
fn insert_missing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut scan = StringAwareScan::new(&chars);

    let mut i = 0;
    while i < chars.len() {
        let in_string = scan.advance(i);
        let ch = chars[i];
        out.push(ch);

        if in_string {
            i += 1;
            continue;
        }

        let ends_a_value = ch == '"' || ch == '}' || ch == ']' || ch.is_ascii_digit() || ch == 'e' || ch == 'l';
        if !ends_a_value {
            i += 1;
            continue;
        }
        // Only a genuine value terminator: a bare digit/letter only
        // counts when what follows isn't itself part of the same
        // token (handled by requiring whitespace/newline next).
        let mut j = i + 1;
        let mut saw_whitespace = false;
        while j < chars.len() && chars[j].is_whitespace() {
            saw_whitespace = true;
            j += 1;
        }
        if !saw_whitespace || j >= chars.len() {
            i += 1;
            continue;
        }
        let next = chars[j];
        let starts_a_value = next == '"' || next == '{' || next == '[' || next.is_ascii_digit() || next == '-';
        if starts_a_value {
            out.push(',');
        }
        i += 1;
    }
    out
}

/// Wrap an identifier-shaped, unquoted object key in double quotes.
/// An unquoted key is recognised as a run of `[A-Za-z0-9_]` characters,
/// outside any string, immediately preceded (modulo whitespace) by `{`
/// or `,` and immediately followed (modulo whitespace) by `:`.
fn quote_unquoted_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut scan = StringAwareScan::new(&chars);

    let mut i = 0;
    while i < chars.len() {
        let in_string = scan.advance(i);
        if in_string {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let ch = chars[i];
        let is_identifier_start = ch.is_alphabetic() || ch == '_';
        let preceding_ok = {
            let mut k = out.chars().rev().skip_while(|c| c.is_whitespace());
            matches!(k.next(), Some('{') | Some(','))
        };

        if is_identifier_start && preceding_ok {
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let mut k = j;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            if k < chars.len() && chars[k] == ':' {
                out.push('"');
                out.extend(&chars[i..j]);
                out.push('"');
                // Advance the scan past the identifier we just
                // consumed so its string-state bookkeeping stays in
                // sync (none of these chars are quotes, so a no-op).
                for idx in i + 1..j {
                    scan.advance(idx);
                }
                i = j;
                continue;
            }
        }

        out.push(ch);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncated_object_gets_closed() {
        let input = r#"{"statements":[{"text":"x","confidence":0.9"#;
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"statements":[{"text":"x","confidence":0.9}]}));
    }

    #[test]
    fn single_quotes_become_double_quotes() {
        let input = "{'name': 'Alice', 'age': 30}";
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"name": "Alice", "age": 30}));
    }

    #[test]
    fn trailing_comma_is_removed() {
        let input = r#"{"a": 1, "b": 2,}"#;
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn missing_comma_between_properties_is_inserted() {
        let input = "{\"a\": 1\n\"b\": 2}";
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn unquoted_keys_are_quoted() {
        let input = "{score: 4, reasoning: \"fine\"}";
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value, json!({"score": 4, "reasoning": "fine"}));
    }

    #[test]
    fn embedded_newline_in_string_is_escaped() {
        let input = "{\"text\": \"line one\nline two\"}";
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["text"], "line one\nline two");
    }

    #[test]
    fn repairs_never_touch_string_contents() {
        let input = r#"{"note": "it's fine, really"}"#;
        let repaired = repair_json(input, 3).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["note"], "it's fine, really");
    }

    #[test]
    fn extract_prefers_fenced_block() {
        let text = "Sure, here you go:\n```json\n{\"a\": 1}\n```\nLet me know if you need more.";
        let extracted = extract_json_from_text(text).unwrap();
        assert_eq!(extracted, r#"{"a": 1}"#);
    }

    #[test]
    fn extract_finds_bare_object_without_fence() {
        let text = "The result is {\"a\": 1} as requested.";
        let extracted = extract_json_from_text(text).unwrap();
        assert_eq!(extracted, r#"{"a": 1}"#);
    }

    #[test]
    fn safe_json_loads_parses_directly_when_already_valid() {
        let value = safe_json_loads(r#"{"a": 1}"#, true).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn safe_json_loads_repairs_when_direct_parse_fails() {
        let value = safe_json_loads("Here's the data: {'a': 1,}", true).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn safe_json_loads_without_repair_fails_on_malformed_input() {
        assert!(safe_json_loads("{'a': 1,}", false).is_err());
    }

    #[test]
    fn not_found_when_no_json_like_content() {
        assert!(matches!(repair_json("just some prose", 3), Err(JsonRepairError::NotFound)));
    }

    #[test]
    fn canonical_json_round_trips_through_repair() {
        let value = json!({"statements": [{"text": "x", "confidence": 0.9}], "n": 3});
        let canonical = serde_json::to_string(&value).unwrap();
        let repaired = repair_json(&canonical, 3).unwrap();
        let round_tripped: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(round_tripped, value);
    }
}
