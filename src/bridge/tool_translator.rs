//! Canonical tools → dialect tool schemas.
//!
//! Every tool goes through the same pipeline:
//! 1. Reject tools with no callable shape (bad name, non-object schema)
//! 2. Truncate to `max_tools`, keeping caller order
//! 3. Sanitize the description under the dialect's length budget
//! 4. Hand off to the dialect strategy for its augmentations
//!
//! Nothing here logs; every notable decision becomes a warning string.

use serde_json::{Map, Value};

use super::capabilities::ModelCapabilities;
use super::dialects::{dialect_for, ToolDialect};
use super::types::{CanonicalTool, ToolDefinition};

/// Stand-in for a blank description. Models given an empty description tend
/// to either ignore the tool or invent a purpose for it.
pub const EMPTY_DESCRIPTION: &str = "No description provided.";

/// Appended when a description is cut to fit the budget.
const ELLIPSIS: &str = "...";

/// Result of translating a tool list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolTranslation {
    /// Tools in the target dialect, at most `max_tools` of them.
    pub translated: Vec<ToolDefinition>,
    /// Names of tools rejected for having no callable shape.
    pub invalid: Vec<String>,
    pub warnings: Vec<String>,
}

/// Translate `tools` into the dialect described by `caps`.
pub fn translate(tools: &[CanonicalTool], caps: &ModelCapabilities) -> ToolTranslation {
    let mut out = ToolTranslation::default();

    if !caps.supports_tools {
        if !tools.is_empty() {
            out.warnings.push(format!(
                "model does not support tool calling; {} tool(s) not offered",
                tools.len()
            ));
        }
        return out;
    }

    let dialect = dialect_for(caps);

    let mut callable = Vec::with_capacity(tools.len());
    for tool in tools {
        match callable_shape(tool) {
            Ok(parameters) => callable.push((tool, parameters)),
            Err(reason) => {
                out.warnings
                    .push(format!("tool '{}' rejected: {reason}", tool.name));
                out.invalid.push(tool.name.clone());
            }
        }
    }

    if callable.len() > caps.max_tools {
        let dropped = callable.len() - caps.max_tools;
        out.warnings.push(format!(
            "tool list truncated to {} for this model; {dropped} tool(s) dropped",
            caps.max_tools
        ));
        callable.truncate(caps.max_tools);
    }

    out.translated = callable
        .into_iter()
        .map(|(tool, parameters)| translate_one(dialect, tool, parameters))
        .collect();

    out
}

fn translate_one(dialect: &dyn ToolDialect, tool: &CanonicalTool, parameters: Value) -> ToolDefinition {
    let description = sanitize_description(&tool.description, dialect.max_description_len());
    dialect.translate_tool(&tool.name, &description, parameters)
}

/// Check that a tool can be called and return its object-shaped schema.
///
/// A `Null` schema becomes an empty object schema; a schema without `type`
/// gets `"type": "object"`.
fn callable_shape(tool: &CanonicalTool) -> Result<Value, String> {
    let name = tool.name.as_str();
    if name.trim().is_empty() {
        return Err("missing function name".into());
    }
    let name_ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !name_ok {
        return Err(format!("'{name}' is not a valid function name"));
    }

    match &tool.parameter_schema {
        Value::Null => {
            let mut schema = Map::new();
            schema.insert("type".into(), Value::String("object".into()));
            schema.insert("properties".into(), Value::Object(Map::new()));
            Ok(Value::Object(schema))
        }
        Value::Object(schema) => {
            match schema.get("type").and_then(Value::as_str) {
                None | Some("object") => {}
                Some(other) => {
                    return Err(format!("parameter schema must be an object, got '{other}'"))
                }
            }
            let mut schema = schema.clone();
            schema
                .entry("type")
                .or_insert_with(|| Value::String("object".into()));
            Ok(Value::Object(schema))
        }
        _ => Err("parameter schema is not an object".into()),
    }
}

/// Clean a description for a model prompt.
///
/// Strips angle brackets, collapses runs of blank lines to one, trims, and
/// cuts to `max_len` characters (ellipsis included). Blank input becomes
/// [`EMPTY_DESCRIPTION`]. The result never exceeds `max_len` characters.
pub fn sanitize_description(raw: &str, max_len: usize) -> String {
    let stripped: String = raw.chars().filter(|c| *c != '<' && *c != '>').collect();

    let mut collapsed = String::with_capacity(stripped.len());
    let mut blank_run = 0;
    for line in stripped.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        collapsed.push_str(line.trim_end());
        collapsed.push('\n');
    }

    let trimmed = collapsed.trim();
    let text = if trimmed.is_empty() {
        EMPTY_DESCRIPTION
    } else {
        trimmed
    };

    truncate_chars(text, max_len)
}

fn truncate_chars(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let ellipsis_len = ELLIPSIS.chars().count();
    if max_len <= ellipsis_len {
        return text.chars().take(max_len).collect();
    }
    let kept: String = text.chars().take(max_len - ellipsis_len).collect();
    format!("{}{ELLIPSIS}", kept.trim_end())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::capabilities::{CapabilityRegistry, Dialect};
    use crate::bridge::dialects::{CUSTOM_MAX_DESCRIPTION_LEN, DEFAULT_MAX_DESCRIPTION_LEN};
    use serde_json::json;

    fn tool(name: &str) -> CanonicalTool {
        CanonicalTool::new(
            name,
            format!("Run {name}."),
            json!({"type": "object", "properties": {"x": {"type": "string"}}, "required": ["x"]}),
        )
    }

    fn caps_with(max_tools: usize, dialect: Dialect) -> ModelCapabilities {
        ModelCapabilities {
            supports_tools: true,
            max_tools,
            dialect,
            ..ModelCapabilities::default()
        }
    }

    #[test]
    fn test_truncates_to_max_tools_with_one_warning() {
        let tools = vec![tool("a"), tool("b"), tool("c")];
        let out = translate(&tools, &caps_with(2, Dialect::OpenAi));
        assert_eq!(out.translated.len(), 2);
        assert_eq!(out.translated[0].function.name, "a");
        assert_eq!(out.translated[1].function.name, "b");
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("1 tool(s) dropped"));
    }

    #[test]
    fn test_unsupported_returns_empty_with_warning() {
        let out = translate(&[tool("a")], &ModelCapabilities::default());
        assert!(out.translated.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_output_never_exceeds_max_tools() {
        let tools: Vec<_> = (0..20).map(|i| tool(&format!("t{i}"))).collect();
        for max in [0, 1, 5, 19, 20, 50] {
            for dialect in [Dialect::OpenAi, Dialect::Hermes, Dialect::Custom] {
                let out = translate(&tools, &caps_with(max, dialect));
                assert!(out.translated.len() <= max);
            }
        }
    }

    #[test]
    fn test_rejects_tool_without_callable_shape() {
        let tools = vec![
            CanonicalTool::new("", "nameless", Value::Null),
            CanonicalTool::new("bad name!", "spaces", Value::Null),
            CanonicalTool::new("arr", "array schema", json!({"type": "array"})),
            CanonicalTool::new("num", "scalar schema", json!(3)),
            tool("ok"),
        ];
        let out = translate(&tools, &caps_with(10, Dialect::OpenAi));
        assert_eq!(out.translated.len(), 1);
        assert_eq!(out.invalid, vec!["", "bad name!", "arr", "num"]);
        assert_eq!(out.warnings.len(), 4);
    }

    #[test]
    fn test_invalid_tools_do_not_consume_slots() {
        let tools = vec![CanonicalTool::new("", "x", Value::Null), tool("a"), tool("b")];
        let out = translate(&tools, &caps_with(2, Dialect::OpenAi));
        assert_eq!(out.translated.len(), 2);
    }

    #[test]
    fn test_null_schema_becomes_empty_object() {
        let out = translate(
            &[CanonicalTool::new("ping", "Ping.", Value::Null)],
            &caps_with(4, Dialect::OpenAi),
        );
        assert_eq!(
            out.translated[0].function.parameters,
            json!({"type": "object", "properties": {}})
        );
    }

    #[test]
    fn test_hermes_translation_end_to_end() {
        let caps = CapabilityRegistry::builtin().get("hermes3");
        let tools = vec![CanonicalTool::new(
            "read_file",
            "Read a <file> from disk.",
            json!({"type": "object", "properties": {"path": {"type": "string", "description": "absolute path"}}}),
        )];
        let out = translate(&tools, &caps);
        let f = &out.translated[0].function;
        assert_eq!(
            f.description,
            "Read a file from disk. Use this tool when you need to read a file from disk."
        );
        assert_eq!(f.parameters["properties"]["path"]["description"], "Parameter: absolute path");
    }

    #[test]
    fn test_sanitize_collapses_blank_lines_and_strips_brackets() {
        let raw = "  <b>Line one</b>\n\n\n\nLine two\n\n";
        assert_eq!(
            sanitize_description(raw, DEFAULT_MAX_DESCRIPTION_LEN),
            "bLine one/b\n\nLine two"
        );
    }

    #[test]
    fn test_sanitize_empty_gets_placeholder() {
        assert_eq!(sanitize_description("   \n\n ", 100), EMPTY_DESCRIPTION);
        assert_eq!(sanitize_description("<>", 100), EMPTY_DESCRIPTION);
    }

    #[test]
    fn test_sanitize_respects_max_len() {
        let long = "word ".repeat(400);
        for max in [0, 2, 3, 4, 10, CUSTOM_MAX_DESCRIPTION_LEN, DEFAULT_MAX_DESCRIPTION_LEN] {
            let out = sanitize_description(&long, max);
            assert!(out.chars().count() <= max, "max {max} exceeded: {}", out.len());
        }
        let out = sanitize_description(&long, 20);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_sanitize_multibyte_safe() {
        let out = sanitize_description(&"é".repeat(50), 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_custom_dialect_uses_shorter_budget() {
        let long = "x".repeat(2000);
        let caps = ModelCapabilities {
            custom_parser_id: Some("unheard-of".into()),
            ..caps_with(4, Dialect::Custom)
        };
        let out = translate(&[CanonicalTool::new("t", long, Value::Null)], &caps);
        // Unknown parser id: OpenAI mapping, so no augmentation after sanitizing.
        assert_eq!(
            out.translated[0].function.description.chars().count(),
            CUSTOM_MAX_DESCRIPTION_LEN
        );
    }
}
