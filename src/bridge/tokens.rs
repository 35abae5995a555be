//! Token estimation for prompt sizing.
//!
//! Character heuristics, no tokenizer:
//! - prose: ~3.2 chars/token (errs high; overestimating is the safe side)
//! - JSON (tool schemas): ~2.8 chars/token, denser because of punctuation

use super::types::{ChatPayload, ToolDefinition, WireMessage};

// ─── Constants ──────────────────────────────────────────────────────────────

const CHARS_PER_TOKEN: f64 = 3.2;

const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Role label and formatting tokens per message.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Framing around each tool definition.
const TOOL_OVERHEAD_TOKENS: u32 = 10;

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate tokens for natural-language text.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate tokens for JSON text.
pub fn estimate_json_tokens(json_text: &str) -> u32 {
    (json_text.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate tokens for one message, overhead included.
pub fn estimate_message_tokens(message: &WireMessage) -> u32 {
    MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content)
}

/// Estimate tokens for translated tool definitions.
pub fn estimate_tool_definitions_tokens(tools: &[ToolDefinition]) -> u32 {
    tools
        .iter()
        .map(|t| {
            let json = serde_json::to_string(t).unwrap_or_default();
            TOOL_OVERHEAD_TOKENS + estimate_json_tokens(&json)
        })
        .sum()
}

/// Estimate a whole outbound payload: messages plus translated tools.
pub fn estimate_payload_tokens(payload: &ChatPayload) -> u32 {
    let messages: u32 = payload.messages.iter().map(estimate_message_tokens).sum();
    messages + estimate_tool_definitions_tokens(payload.tools.as_deref().unwrap_or_default())
}
