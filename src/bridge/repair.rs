//! Best-effort repair of malformed tool-call argument JSON.
//!
//! Only used when `ValidatorConfig::repair_arguments` is on. Each repair is a
//! deterministic text rewrite; they are applied cumulatively and the first
//! version that parses wins.
//!
//! Malformations seen from local models:
//! 1. Doubled quote after a colon: `"path":""/tmp/x"`
//! 2. Trailing commas: `{"a":1,}`
//! 3. Missing closing braces
//! 4. Raw control characters inside strings

use serde_json::Value;

/// Attempt to turn `raw` into a JSON value. `None` if every repair fails.
pub fn repair_json(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }

    let repairs: [fn(&str) -> String; 4] = [
        repair_double_quotes,
        repair_trailing_commas,
        repair_unbalanced_braces,
        repair_control_characters,
    ];

    let mut repaired = raw.to_string();
    for repair in repairs {
        repaired = repair(&repaired);
        if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
            return Some(v);
        }
    }
    None
}

/// `:""value"` → `:"value"`, leaving a real empty string (`:""` followed by
/// `,` or `}`) alone.
fn repair_double_quotes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if i + 3 < bytes.len()
            && bytes[i] == b':'
            && bytes[i + 1] == b'"'
            && bytes[i + 2] == b'"'
            && bytes[i + 3] != b','
            && bytes[i + 3] != b'}'
        {
            result.extend_from_slice(b":\"");
            i += 3;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(result).unwrap_or_else(|_| input.to_string())
}

/// Drop a `,` whose next non-whitespace character is `}` or `]`.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());

    for (i, &ch) in chars.iter().enumerate() {
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(ch);
    }

    result
}

/// Append `}` for every brace left open outside of strings.
fn repair_unbalanced_braces(input: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    let mut result = input.to_string();
    for _ in 0..depth.max(0) {
        result.push('}');
    }
    result
}

/// Keep `\n`, `\r`, `\t`; drop every other control character.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_untouched() {
        assert_eq!(repair_json(r#"{"a": 1}"#).unwrap()["a"], 1);
    }

    #[test]
    fn test_double_quote() {
        let v = repair_json(r#"{"destination":""/Users/me/file.png","source":"/tmp/file.png"}"#)
            .unwrap();
        assert_eq!(v["destination"], "/Users/me/file.png");
    }

    #[test]
    fn test_empty_string_preserved() {
        let v = repair_json(r#"{"a":"","b":1,}"#).unwrap();
        assert_eq!(v["a"], "");
        assert_eq!(v["b"], 1);
    }

    #[test]
    fn test_unbalanced() {
        let v = repair_json(r#"{"a": {"b": "x}"}"#).unwrap();
        assert_eq!(v["a"]["b"], "x}");
    }

    #[test]
    fn test_irreparable() {
        assert!(repair_json("not-json").is_none());
        assert!(repair_json("").is_none());
    }
}
