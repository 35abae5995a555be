//! Response validation and hallucination filtering.
//!
//! Backend tool calls are untrusted. Each one passes three checks in order,
//! stopping at the first failure:
//!
//! 1. **Existence** — the name must be a registered tool.
//! 2. **Argument shape** — arguments must be (or parse to) a JSON object.
//! 3. **Dialect heuristics** — markup-artifact names for custom dialects, and
//!    continuation-sounding names for models with poor multi-turn tracking.
//!
//! Survivors become [`CanonicalToolCall`]s; everything else is counted in
//! [`TranslationStats`] with one warning per dropped call. Validation never
//! fails: the worst case is a response with no tool calls.
//!
//! The continuation-name heuristic is speculative. It can reject legitimate
//! tools named like `next_page`, which is why it is switchable and why its
//! token list is configuration rather than code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::capabilities::{ModelCapabilities, MultiTurnQuality};
use super::dialects::{dialect_for, ToolDialect};
use super::errors::ValidationIssue;
use super::repair::repair_json;
use super::types::{
    BackendToolCall, CanonicalResponse, CanonicalTool, CanonicalToolCall, FinishReason,
    RawResponse, TranslatedResponse, TranslationStats,
};

// ─── Config ──────────────────────────────────────────────────────────────────

/// Switches for the heuristic parts of validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Reject continuation-sounding call names from `poor` multi-turn models.
    pub poor_multi_turn_filter: bool,
    /// Lower-case substrings that mark a name as a fabricated continuation.
    pub suspicious_name_tokens: Vec<String>,
    /// Try to repair unparseable string arguments before rejecting them.
    pub repair_arguments: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            poor_multi_turn_filter: true,
            suspicious_name_tokens: vec!["follow".to_string(), "next".to_string()],
            repair_arguments: false,
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// A rejected call: what went wrong, and the detail for the warning.
struct Rejection {
    issue: ValidationIssue,
    detail: String,
}

impl Rejection {
    fn new(issue: ValidationIssue, detail: impl Into<String>) -> Self {
        Self {
            issue,
            detail: detail.into(),
        }
    }
}

/// Parsed arguments, and whether repair was needed to get them.
struct ParsedArguments {
    args: Map<String, Value>,
    repaired: bool,
}

/// Validate one backend frame against the registered tools.
///
/// `raw` is only borrowed; the caller's value is never modified.
pub fn validate(
    raw: &RawResponse,
    caps: &ModelCapabilities,
    registered_tools: &[CanonicalTool],
    config: &ValidatorConfig,
) -> TranslatedResponse {
    let dialect = dialect_for(caps);
    let mut registered: HashMap<&str, &Value> = HashMap::with_capacity(registered_tools.len());
    for tool in registered_tools {
        registered
            .entry(tool.name.as_str())
            .or_insert(&tool.parameter_schema);
    }

    let mut text = raw.text_parts.concat();
    let mut candidates = raw.tool_calls.clone();
    if candidates.is_empty() {
        if let Some((rest, extracted)) = dialect.extract_text_calls(&text) {
            text = rest;
            candidates = extracted;
        }
    }

    let mut stats = TranslationStats::default();
    let mut tool_calls = Vec::with_capacity(candidates.len());

    for call in &candidates {
        stats.total += 1;
        match check_call(call, caps, dialect, &registered, config) {
            Ok(parsed) => {
                if parsed.repaired {
                    stats
                        .warnings
                        .push(format!("repaired malformed arguments for '{}'", call.name));
                }
                stats.valid += 1;
                tool_calls.push(CanonicalToolCall {
                    id: format!("call_{}", Uuid::new_v4()),
                    name: call.name.clone(),
                    args: parsed.args,
                });
            }
            Err(rejection) => {
                let warning = format!(
                    "dropped tool call '{}': {} ({})",
                    call.name, rejection.issue, rejection.detail
                );
                stats.record_drop(rejection.issue, warning);
            }
        }
    }

    let text_parts = if !text.is_empty() {
        vec![text]
    } else if tool_calls.is_empty() {
        vec![String::new()]
    } else {
        Vec::new()
    };

    let finish_reason = match &raw.finish_reason {
        Some(FinishReason::Stop) if !tool_calls.is_empty() => Some(FinishReason::ToolCalls),
        Some(FinishReason::ToolCalls) if tool_calls.is_empty() => Some(FinishReason::Stop),
        other => other.clone(),
    };

    TranslatedResponse {
        response: CanonicalResponse {
            text_parts,
            tool_calls,
            finish_reason,
            usage: raw.usage,
            model_id: raw.model_id.clone(),
        },
        stats,
    }
}

fn check_call(
    call: &BackendToolCall,
    caps: &ModelCapabilities,
    dialect: &dyn ToolDialect,
    registered: &HashMap<&str, &Value>,
    config: &ValidatorConfig,
) -> Result<ParsedArguments, Rejection> {
    let Some(schema) = registered.get(call.name.as_str()) else {
        return Err(Rejection::new(
            ValidationIssue::UnknownTool,
            "not in the registered tool set",
        ));
    };

    let mut parsed = parse_arguments(&call.arguments, config.repair_arguments)?;
    parsed.args = dialect.unwrap_arguments(parsed.args, schema);

    if let Some(reason) = dialect.screen_call_name(&call.name) {
        return Err(Rejection::new(ValidationIssue::Heuristic, reason));
    }
    if config.poor_multi_turn_filter && caps.multi_turn_quality == MultiTurnQuality::Poor {
        let lower = call.name.to_lowercase();
        if let Some(token) = config
            .suspicious_name_tokens
            .iter()
            .find(|t| !t.is_empty() && lower.contains(t.as_str()))
        {
            return Err(Rejection::new(
                ValidationIssue::Heuristic,
                format!("name contains '{token}', a likely fabricated continuation"),
            ));
        }
    }

    Ok(parsed)
}

/// Arguments must be a JSON object, or a string holding one.
fn parse_arguments(arguments: &Value, repair: bool) -> Result<ParsedArguments, Rejection> {
    match arguments {
        Value::Object(map) => Ok(ParsedArguments {
            args: map.clone(),
            repaired: false,
        }),
        Value::String(s) => {
            let (value, repaired) = match serde_json::from_str::<Value>(s) {
                Ok(v) => (v, false),
                Err(e) => match repair.then(|| repair_json(s)).flatten() {
                    Some(v) => (v, true),
                    None => {
                        return Err(Rejection::new(
                            ValidationIssue::InvalidJson,
                            format!("arguments are not valid JSON: {e}"),
                        ))
                    }
                },
            };
            match value {
                Value::Object(args) => Ok(ParsedArguments { args, repaired }),
                // Double-encoded: a JSON string containing the object.
                Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
                    Ok(Value::Object(args)) => Ok(ParsedArguments { args, repaired }),
                    _ => Err(Rejection::new(
                        ValidationIssue::InvalidJson,
                        "arguments string does not hold an object",
                    )),
                },
                other => Err(Rejection::new(
                    ValidationIssue::InvalidJson,
                    format!("arguments must be an object, got {}", json_kind(&other)),
                )),
            }
        }
        other => Err(Rejection::new(
            ValidationIssue::InvalidJson,
            format!("arguments must be an object, got {}", json_kind(other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
