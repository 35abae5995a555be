//! Bridge error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Validation
//! problems with model-emitted tool calls are deliberately NOT errors — they
//! are collected as [`ValidationIssue`]s inside `TranslationStats` so a turn
//! is never aborted because a model hallucinated a call.

use std::fmt;

use thiserror::Error;

/// Errors that can abort a bridge operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid base URL, empty model id, or an unreadable config file.
    /// Raised before any network call and never retried.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The backend could not be reached, or kept answering with a failure
    /// status, after all retry attempts.
    #[error(
        "{operation} failed for model '{model}' at {url} after {attempts} attempt(s): {last_error}"
    )]
    Connectivity {
        url: String,
        model: String,
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// A response body could not be decoded as a backend frame.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// The backend family cannot perform this operation at all.
    #[error("operation not supported by local backends: {operation}")]
    UnsupportedOperation { operation: String },

    /// The caller's cancellation token fired while the operation was in flight.
    #[error("{operation} cancelled")]
    Cancelled { operation: String },
}

impl BridgeError {
    /// Actionable hint for the end user, if one applies.
    pub fn remedy(&self) -> Option<String> {
        match self {
            BridgeError::Connectivity { url, model, .. } => Some(format!(
                "Check that the model server at {url} is running (e.g. `ollama serve`) \
                 and that '{model}' is installed (e.g. `ollama pull {model}`)."
            )),
            BridgeError::Configuration { .. } => Some(
                "Set a valid http(s) base URL and a model name in dialect-bridge.yaml \
                 or pass a model id explicitly."
                    .to_string(),
            ),
            _ => None,
        }
    }
}

/// A single failed HTTP attempt, before it is folded into
/// [`BridgeError::Connectivity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptFailure {
    Network(String),
    Timeout { after_ms: u64 },
    Status { status: u16, body: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Network(reason) => write!(f, "network error: {reason}"),
            AttemptFailure::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            AttemptFailure::Status { status, body } if body.is_empty() => {
                write!(f, "HTTP {status}")
            }
            AttemptFailure::Status { status, body } => write!(f, "HTTP {status}: {body}"),
        }
    }
}

/// Why a backend tool call was dropped during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationIssue {
    /// The call names a function that was never registered.
    UnknownTool,
    /// The arguments are not a structured object.
    InvalidJson,
    /// A dialect-specific sanity filter flagged the call.
    Heuristic,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValidationIssue::UnknownTool => "unknown tool",
            ValidationIssue::InvalidJson => "invalid arguments",
            ValidationIssue::Heuristic => "suspected hallucination",
        };
        f.write_str(label)
    }
}
