//! Per-dialect strategies.
//!
//! Each model family's quirks live behind [`ToolDialect`]: how a tool is
//! described to it, which request defaults it needs, how its argument
//! payloads are wrapped, and which of its tool names are suspicious. The
//! strategy is picked from `ModelCapabilities::dialect` (and
//! `custom_parser_id` for custom dialects) by [`dialect_for`]; adding a
//! dialect means adding a strategy, not touching the existing ones.
//!
//! | Dialect  | Parser id          | Strategy               |
//! |----------|--------------------|------------------------|
//! | openai   | —                  | `OpenAiDialect`        |
//! | hermes   | —                  | `HermesDialect`        |
//! | custom   | `qwen-coder`, `deepseek-coder` | `CoderDialect` |
//! | custom   | anything else      | `GenericCustomDialect` |

use serde_json::{Map, Value};

use super::capabilities::{Dialect, ModelCapabilities};
use super::types::{BackendToolCall, FunctionDefinition, GenerationOptions, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Description budget for OpenAI- and Hermes-style backends.
pub const DEFAULT_MAX_DESCRIPTION_LEN: usize = 1024;

/// Custom dialects are small coder models with short attention for prose.
pub const CUSTOM_MAX_DESCRIPTION_LEN: usize = 512;

/// Hermes models follow a low temperature much more reliably when emitting calls.
const HERMES_TOOL_TEMPERATURE: f32 = 0.3;

/// Upper bound on temperature for coder models on tool-calling turns.
const CODER_MAX_TOOL_TEMPERATURE: f32 = 0.2;

const PARAMETER_PREFIX: &str = "Parameter: ";

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// Keys some models wrap the real argument object in.
const ARGUMENT_WRAPPER_KEYS: &[&str] = &["parameters", "arguments"];

// ─── Strategy Trait ──────────────────────────────────────────────────────────

/// A model family's tool-calling conventions.
///
/// The default methods implement the OpenAI mapping; strategies override
/// only what differs.
pub trait ToolDialect: Send + Sync {
    /// Short name for logs and warnings.
    fn name(&self) -> &'static str;

    /// Maximum length, in characters, of a sanitized tool description.
    fn max_description_len(&self) -> usize {
        DEFAULT_MAX_DESCRIPTION_LEN
    }

    /// Build the wire tool from an already-sanitized description and an
    /// object-shaped parameter schema.
    fn translate_tool(&self, name: &str, description: &str, parameters: Value) -> ToolDefinition {
        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: self.augment_description(name, description),
                parameters: self.augment_parameters(parameters),
            },
        }
    }

    fn augment_description(&self, _name: &str, description: &str) -> String {
        description.to_string()
    }

    fn augment_parameters(&self, parameters: Value) -> Value {
        parameters
    }

    /// Merge dialect-required generation defaults into the outbound options.
    ///
    /// Sampling keys the caller set are already present in `options`.
    fn apply_request_defaults(
        &self,
        _caps: &ModelCapabilities,
        _requested: &GenerationOptions,
        _has_tools: bool,
        _options: &mut Map<String, Value>,
    ) {
    }

    /// Peel wrapper objects (`{"parameters": {…}}`) off an argument object.
    ///
    /// `schema` is the registered tool's parameter schema; a key it declares
    /// is a real argument and never a wrapper.
    fn unwrap_arguments(&self, args: Map<String, Value>, _schema: &Value) -> Map<String, Value> {
        args
    }

    /// Pull tool calls the model wrote into its text instead of the native
    /// `tool_calls` field. Returns the remaining text and the calls, or `None`
    /// if the dialect never does this or nothing was found.
    fn extract_text_calls(&self, _text: &str) -> Option<(String, Vec<BackendToolCall>)> {
        None
    }

    /// Dialect-specific sanity check on a call name. `Some(reason)` rejects it.
    fn screen_call_name(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Select the strategy for a capability set.
pub fn dialect_for(caps: &ModelCapabilities) -> &'static dyn ToolDialect {
    match caps.dialect {
        Dialect::OpenAi => &OpenAiDialect,
        Dialect::Hermes => &HermesDialect,
        Dialect::Custom => match caps.custom_parser_id.as_deref() {
            Some("qwen-coder") | Some("deepseek-coder") => &CoderDialect,
            _ => &GenericCustomDialect,
        },
    }
}

// ─── OpenAI ──────────────────────────────────────────────────────────────────

/// Pass-through mapping; only tells the backend whether parallel calls are allowed.
pub struct OpenAiDialect;

impl ToolDialect for OpenAiDialect {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn apply_request_defaults(
        &self,
        caps: &ModelCapabilities,
        _requested: &GenerationOptions,
        has_tools: bool,
        options: &mut Map<String, Value>,
    ) {
        if has_tools {
            options.insert(
                "parallel_tool_calls".to_string(),
                Value::Bool(caps.supports_parallel_calls),
            );
        }
    }
}

// ─── Hermes ──────────────────────────────────────────────────────────────────

/// Hermes-trained models: explicit usage hints, `Parameter:` prefixes, and
/// `<tool_call>` blocks in plain text.
pub struct HermesDialect;

impl ToolDialect for HermesDialect {
    fn name(&self) -> &'static str {
        "hermes"
    }

    fn augment_description(&self, name: &str, description: &str) -> String {
        let purpose = description.trim().trim_end_matches('.');
        if purpose.is_empty() || description == super::tool_translator::EMPTY_DESCRIPTION {
            return format!("{description} Use this tool when you need to call `{name}`.")
                .trim_start()
                .to_string();
        }
        format!(
            "{description} Use this tool when you need to {}.",
            lowercase_first(purpose)
        )
    }

    fn augment_parameters(&self, mut parameters: Value) -> Value {
        if let Some(props) = parameters
            .get_mut("properties")
            .and_then(Value::as_object_mut)
        {
            for prop in props.values_mut() {
                if let Some(Value::String(desc)) = prop.get_mut("description") {
                    if !desc.starts_with(PARAMETER_PREFIX) {
                        *desc = format!("{PARAMETER_PREFIX}{desc}");
                    }
                }
            }
        }
        parameters
    }

    fn apply_request_defaults(
        &self,
        _caps: &ModelCapabilities,
        requested: &GenerationOptions,
        has_tools: bool,
        options: &mut Map<String, Value>,
    ) {
        if has_tools && requested.temperature.is_none() {
            options.insert("temperature".to_string(), Value::from(HERMES_TOOL_TEMPERATURE));
        }
    }

    fn unwrap_arguments(&self, args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
        unwrap_single_wrapper(args, schema)
    }

    fn extract_text_calls(&self, text: &str) -> Option<(String, Vec<BackendToolCall>)> {
        extract_tagged_calls(text)
    }
}

// ─── Coder (custom) ──────────────────────────────────────────────────────────

/// Coder models (`qwen-coder`, `deepseek-coder` parsers): step-by-step
/// guidance in descriptions, low temperature, and markup-artifact screening.
pub struct CoderDialect;

impl ToolDialect for CoderDialect {
    fn name(&self) -> &'static str {
        "coder"
    }

    fn max_description_len(&self) -> usize {
        CUSTOM_MAX_DESCRIPTION_LEN
    }

    fn augment_description(&self, _name: &str, description: &str) -> String {
        format!(
            "{description}\n\nThink step by step: work out every required argument first, \
             then call this tool once with all of them."
        )
    }

    fn apply_request_defaults(
        &self,
        _caps: &ModelCapabilities,
        requested: &GenerationOptions,
        has_tools: bool,
        options: &mut Map<String, Value>,
    ) {
        if has_tools {
            let temperature = requested
                .temperature
                .map_or(CODER_MAX_TOOL_TEMPERATURE, |t| t.min(CODER_MAX_TOOL_TEMPERATURE));
            options.insert("temperature".to_string(), Value::from(temperature));
        }
    }

    fn unwrap_arguments(&self, args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
        unwrap_single_wrapper(args, schema)
    }

    fn screen_call_name(&self, name: &str) -> Option<String> {
        screen_markup(name)
    }
}

// ─── Generic custom ──────────────────────────────────────────────────────────

/// Custom dialect with an unrecognized parser id: OpenAI mapping under the
/// custom description budget, plus markup screening.
pub struct GenericCustomDialect;

impl ToolDialect for GenericCustomDialect {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn max_description_len(&self) -> usize {
        CUSTOM_MAX_DESCRIPTION_LEN
    }

    fn screen_call_name(&self, name: &str) -> Option<String> {
        screen_markup(name)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `{"parameters": {…}}` or `{"arguments": "{…}"}` → the inner object.
///
/// Only a lone wrapper key is peeled, and only when `schema` does not
/// declare that key as a property. An object with other keys alongside is
/// taken at face value.
fn unwrap_single_wrapper(args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
    if args.len() != 1 {
        return args;
    }
    let declared = |key: &str| {
        schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|props| props.contains_key(key))
    };
    let wrapper = ARGUMENT_WRAPPER_KEYS
        .iter()
        .filter(|k| !declared(**k))
        .find_map(|k| args.get(*k));
    let unwrapped = match wrapper {
        Some(Value::Object(obj)) => Some(obj.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(obj)) => Some(obj),
            _ => None,
        },
        _ => None,
    };
    unwrapped.unwrap_or(args)
}

/// Reject names carrying chat-template or markup tokens.
fn screen_markup(name: &str) -> Option<String> {
    const MARKUP: &[char] = &['<', '>', '|', '[', ']', '`'];
    if name.contains(MARKUP) {
        Some(format!("tool name '{name}' contains markup tokens"))
    } else {
        None
    }
}

/// Parse `<tool_call>{"name": …, "arguments": …}</tool_call>` blocks.
///
/// A block whose body is not a JSON object with a `name` still yields a call
/// (empty name, raw body as arguments) so validation can count and report it.
fn extract_tagged_calls(text: &str) -> Option<(String, Vec<BackendToolCall>)> {
    let mut calls = Vec::new();
    let mut remaining = String::with_capacity(text.len());
    let mut search_from = 0;

    while let Some(start_offset) = text[search_from..].find(TOOL_CALL_OPEN) {
        let abs_open = search_from + start_offset;
        let body_start = abs_open + TOOL_CALL_OPEN.len();
        let Some(end_offset) = text[body_start..].find(TOOL_CALL_CLOSE) else {
            break;
        };
        remaining.push_str(&text[search_from..abs_open]);
        let body = text[body_start..body_start + end_offset].trim();
        search_from = body_start + end_offset + TOOL_CALL_CLOSE.len();
        calls.push(parse_tagged_body(body));
    }

    if calls.is_empty() {
        return None;
    }
    remaining.push_str(&text[search_from..]);
    Some((remaining.trim().to_string(), calls))
}

fn parse_tagged_body(body: &str) -> BackendToolCall {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(mut obj)) => {
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = ARGUMENT_WRAPPER_KEYS
                .iter()
                .find_map(|k| obj.remove(*k))
                .unwrap_or_else(|| Value::Object(Map::new()));
            BackendToolCall { name, arguments }
        }
        _ => BackendToolCall {
            name: String::new(),
            arguments: Value::String(body.to_string()),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(dialect: Dialect, parser: Option<&str>) -> ModelCapabilities {
        ModelCapabilities {
            supports_tools: true,
            dialect,
            max_tools: 8,
            custom_parser_id: parser.map(String::from),
            ..ModelCapabilities::default()
        }
    }

    #[test]
    fn test_dispatch() {
        assert_eq!(dialect_for(&caps(Dialect::OpenAi, None)).name(), "openai");
        assert_eq!(dialect_for(&caps(Dialect::Hermes, None)).name(), "hermes");
        assert_eq!(dialect_for(&caps(Dialect::Custom, Some("qwen-coder"))).name(), "coder");
        assert_eq!(dialect_for(&caps(Dialect::Custom, Some("mystery"))).name(), "custom");
        assert_eq!(dialect_for(&caps(Dialect::Custom, None)).name(), "custom");
    }

    #[test]
    fn test_hermes_description_hint() {
        let def = HermesDialect.translate_tool(
            "search",
            "Search the web.",
            json!({"type": "object", "properties": {}}),
        );
        assert_eq!(
            def.function.description,
            "Search the web. Use this tool when you need to search the web."
        );
    }

    #[test]
    fn test_hermes_parameter_prefix_not_doubled() {
        let params = json!({
            "type": "object",
            "properties": {
                "q": {"type": "string", "description": "query text"},
                "n": {"type": "integer", "description": "Parameter: result count"},
                "raw": {"type": "boolean"}
            }
        });
        let out = HermesDialect.augment_parameters(params);
        assert_eq!(out["properties"]["q"]["description"], "Parameter: query text");
        assert_eq!(out["properties"]["n"]["description"], "Parameter: result count");
        assert!(out["properties"]["raw"].get("description").is_none());
    }

    #[test]
    fn test_openai_is_pass_through() {
        let params = json!({"type": "object", "properties": {"q": {"type": "string", "description": "d"}}});
        let def = OpenAiDialect.translate_tool("search", "Find things", params.clone());
        assert_eq!(def.r#type, "function");
        assert_eq!(def.function.description, "Find things");
        assert_eq!(def.function.parameters, params);
    }

    #[test]
    fn test_coder_description_guidance() {
        let def = CoderDialect.translate_tool("edit", "Edit a file", json!({"type": "object"}));
        assert!(def.function.description.starts_with("Edit a file"));
        assert!(def.function.description.contains("step by step"));
    }

    #[test]
    fn test_openai_sets_parallel_flag_only_with_tools() {
        let c = caps(Dialect::OpenAi, None);
        let mut options = Map::new();
        OpenAiDialect.apply_request_defaults(&c, &GenerationOptions::default(), true, &mut options);
        assert_eq!(options["parallel_tool_calls"], false);

        let mut options = Map::new();
        OpenAiDialect.apply_request_defaults(&c, &GenerationOptions::default(), false, &mut options);
        assert!(options.is_empty());
    }

    #[test]
    fn test_hermes_temperature_default_respects_caller() {
        let c = caps(Dialect::Hermes, None);
        let mut options = Map::new();
        HermesDialect.apply_request_defaults(&c, &GenerationOptions::default(), true, &mut options);
        assert!((options["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);

        let requested = GenerationOptions {
            temperature: Some(0.9),
            ..Default::default()
        };
        let mut options = Map::new();
        options.insert("temperature".into(), json!(0.9));
        HermesDialect.apply_request_defaults(&c, &requested, true, &mut options);
        assert!((options["temperature"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_coder_caps_temperature() {
        let c = caps(Dialect::Custom, Some("qwen-coder"));
        let requested = GenerationOptions {
            temperature: Some(0.8),
            ..Default::default()
        };
        let mut options = Map::new();
        CoderDialect.apply_request_defaults(&c, &requested, true, &mut options);
        assert!((options["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_unwrap_single_wrapper() {
        let schema = json!({"type": "object", "properties": {"path": {"type": "string"}}});
        let wrapped = json!({"parameters": {"path": "/tmp"}});
        let out = HermesDialect.unwrap_arguments(wrapped.as_object().unwrap().clone(), &schema);
        assert_eq!(out["path"], "/tmp");

        let stringly = json!({"arguments": "{\"path\": \"/etc\"}"});
        let out = CoderDialect.unwrap_arguments(stringly.as_object().unwrap().clone(), &schema);
        assert_eq!(out["path"], "/etc");

        // Other keys alongside: not a wrapper.
        let mixed = json!({"arguments": {"a": 1}, "b": 2});
        let out = HermesDialect.unwrap_arguments(mixed.as_object().unwrap().clone(), &schema);
        assert_eq!(out.len(), 2);

        // OpenAI never unwraps.
        let out = OpenAiDialect.unwrap_arguments(wrapped.as_object().unwrap().clone(), &schema);
        assert!(out.contains_key("parameters"));
    }

    #[test]
    fn test_declared_wrapper_key_kept() {
        let schema = json!({
            "type": "object",
            "properties": {"arguments": {"type": "object"}}
        });
        let args = json!({"arguments": {"verbose": true}});
        for dialect in [&HermesDialect as &dyn ToolDialect, &CoderDialect] {
            let out = dialect.unwrap_arguments(args.as_object().unwrap().clone(), &schema);
            assert_eq!(Value::Object(out), args);
        }

        // Declaring one wrapper key does not protect the other.
        let wrapped = json!({"parameters": {"x": 1}});
        let out = HermesDialect.unwrap_arguments(wrapped.as_object().unwrap().clone(), &schema);
        assert_eq!(out["x"], 1);
    }

    #[test]
    fn test_extract_tagged_calls() {
        let text = "Let me look.\n<tool_call>\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"a.rs\"}}\n</tool_call>\nDone.";
        let (rest, calls) = HermesDialect.extract_text_calls(text).unwrap();
        assert_eq!(rest, "Let me look.\n\nDone.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments["path"], "a.rs");
    }

    #[test]
    fn test_extract_tagged_calls_garbage_body() {
        let (rest, calls) = HermesDialect
            .extract_text_calls("<tool_call>not json</tool_call>")
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(calls[0].name, "");
        assert_eq!(calls[0].arguments, Value::String("not json".into()));
    }

    #[test]
    fn test_extract_tagged_calls_none() {
        assert!(HermesDialect.extract_text_calls("plain answer").is_none());
        assert!(HermesDialect.extract_text_calls("<tool_call>unterminated").is_none());
        assert!(OpenAiDialect
            .extract_text_calls("<tool_call>{\"name\":\"x\"}</tool_call>")
            .is_none());
    }

    #[test]
    fn test_screen_markup() {
        assert!(CoderDialect.screen_call_name("<|im_start|>search").is_some());
        assert!(GenericCustomDialect.screen_call_name("search>").is_some());
        assert!(CoderDialect.screen_call_name("search_files").is_none());
        assert!(OpenAiDialect.screen_call_name("<search>").is_none());
    }
}
