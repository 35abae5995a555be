//! Shared types for the bridge.
//!
//! Two families live here: the canonical caller-facing shapes
//! (`CanonicalRequest`, `CanonicalResponse`, …) and the backend wire shapes
//! spoken over `POST /chat` (`ChatPayload`, `BackendFrame`, …).

use serde::{Deserialize, Serialize};

use super::errors::ValidationIssue;

// ─── Canonical Request Types ─────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool the caller makes available to the model.
///
/// `parameter_schema` is a JSON-schema object (`properties` / `required`).
/// `Null` means "takes no arguments".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "parameters")]
    pub parameter_schema: serde_json::Value,
}

impl CanonicalTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
        }
    }
}

/// Sampling options supplied by the caller. `None` leaves the backend default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// The caller's request, independent of any backend dialect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub messages: Vec<ChatMessage>,
    /// Tools to offer for this turn. When `None`, the registered tools are offered.
    #[serde(default)]
    pub tools: Option<Vec<CanonicalTool>>,
    #[serde(default)]
    pub options: GenerationOptions,
}

// ─── Canonical Response Types ────────────────────────────────────────────────

/// A validated tool call. Its `name` is always one of the registered tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    /// Generated as `call_<uuid>`; backends of this family do not supply ids.
    pub id: String,
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    /// Map a backend `done_reason` string.
    pub fn from_backend(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::MaxTokens,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// The response handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub text_parts: Vec<String>,
    pub tool_calls: Vec<CanonicalToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub model_id: String,
}

/// Per-response tool-call accounting plus human-readable warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationStats {
    pub total: u32,
    pub valid: u32,
    pub hallucinated: u32,
    pub invalid_json: u32,
    pub unknown_tool: u32,
    pub warnings: Vec<String>,
}

impl TranslationStats {
    /// Record a dropped call and its warning.
    pub(crate) fn record_drop(&mut self, issue: ValidationIssue, warning: String) {
        self.hallucinated += 1;
        match issue {
            ValidationIssue::UnknownTool => self.unknown_tool += 1,
            ValidationIssue::InvalidJson => self.invalid_json += 1,
            ValidationIssue::Heuristic => {}
        }
        self.warnings.push(warning);
    }

    /// Whether anything worth surfacing happened.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A canonical response together with its side-channel statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedResponse {
    pub response: CanonicalResponse,
    pub stats: TranslationStats,
}

// ─── Raw (untrusted) Backend Output ──────────────────────────────────────────

/// A tool call as emitted by a backend. `arguments` may be a JSON string or
/// an already-structured value; neither is trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Everything the validator needs from one backend frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub text_parts: Vec<String>,
    pub tool_calls: Vec<BackendToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub model_id: String,
}

// ─── Wire Types (POST /chat, GET /tags) ─────────────────────────────────────

/// Tool definition sent in the request (OpenAI-style function schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A message as the backend expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// Request body for `POST /chat`.
///
/// `options` carries sampling parameters plus dialect-specific extras
/// (`parallel_tool_calls`, `num_ctx`), so it is an open JSON map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// A tool call inside a backend message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireToolCall {
    pub function: WireFunctionCall,
}

/// Function call details in a backend message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireFunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The `message` object of a backend frame.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

/// One backend frame: the whole non-streaming body, or one NDJSON line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BackendFrame {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message: Option<WireResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
}

impl BackendFrame {
    /// Lift the frame into validator input.
    ///
    /// Only a `done` frame carries a finish reason; an intermediate frame's
    /// `done_reason` is ignored even if a backend sends one.
    pub fn into_raw(self, fallback_model: &str) -> RawResponse {
        let message = self.message.unwrap_or_default();
        let text_parts = if message.content.is_empty() {
            Vec::new()
        } else {
            vec![message.content]
        };
        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| BackendToolCall {
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();
        let finish_reason = if self.done {
            Some(
                self.done_reason
                    .as_deref()
                    .map(FinishReason::from_backend)
                    .unwrap_or(FinishReason::Stop),
            )
        } else {
            None
        };
        let model_id = if self.model.is_empty() {
            fallback_model.to_string()
        } else {
            self.model
        };

        RawResponse {
            text_parts,
            tool_calls,
            finish_reason,
            usage: Usage::new(
                self.prompt_eval_count.unwrap_or(0),
                self.eval_count.unwrap_or(0),
            ),
            model_id,
        }
    }
}

/// Model entry from `GET /tags`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Raw `GET /tags` response shape.
#[derive(Debug, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Option<Vec<ModelInfo>>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
