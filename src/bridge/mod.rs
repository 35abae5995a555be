//! Dialect bridge — canonical chat requests to local model servers and back.
//!
//! This module sits between a caller speaking one canonical chat/tool format
//! and a local backend whose models each expect their own tool dialect:
//! - Capability lookup by model family (`CapabilityRegistry`)
//! - Tool schema translation per dialect (OpenAI, Hermes, custom coders)
//! - System prompt augmentation for tool use
//! - Validation of model-emitted tool calls against the registered tools
//! - NDJSON transport with retry, timeouts and cancellation
//!
//! Supporting a new model family is a capability entry (built-in or
//! `capability_overrides` in config), not a code change.

pub mod capabilities;
pub mod config;
pub mod dialects;
pub mod errors;
pub mod orchestrator;
pub mod prompt;
pub mod repair;
pub mod streaming;
pub mod tokens;
pub mod tool_translator;
pub mod transport;
pub mod types;
pub mod validator;

// Re-exports for convenience
pub use capabilities::{
    normalize_model_id, CapabilityRegistry, Dialect, ModelCapabilities, MultiTurnQuality,
    PromptStyle,
};
pub use config::{
    find_config_path, load_config, load_or_default, BridgeConfig, StaticTools, ToolSource,
};
pub use errors::{BridgeError, ValidationIssue};
pub use orchestrator::{ResponseStream, TranslationOrchestrator};
pub use streaming::FrameStream;
pub use transport::{CallOptions, HttpTransport, RetryPolicy, Transport};
pub use types::{
    CanonicalRequest, CanonicalResponse, CanonicalTool, CanonicalToolCall, ChatMessage,
    FinishReason, GenerationOptions, ModelInfo, Role, TranslatedResponse, TranslationStats, Usage,
};
pub use validator::ValidatorConfig;
