//! Translation orchestrator: canonical request in, validated response out.
//!
//! Per call:
//! 1. Resolve the model id and look its capabilities up once
//! 2. Translate the offered tools into the model's dialect
//! 3. Augment the system prompt and merge dialect request defaults
//! 4. Call the transport
//! 5. Run every frame through the validator
//!
//! Streaming is frame-by-frame: each backend frame is validated and yielded
//! before the next one is read.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::capabilities::{CapabilityRegistry, ModelCapabilities};
use super::config::{BridgeConfig, StaticTools, ToolSource};
use super::dialects::dialect_for;
use super::errors::BridgeError;
use super::prompt;
use super::tokens::estimate_payload_tokens;
use super::tool_translator::{self, ToolTranslation};
use super::transport::{CallOptions, HttpTransport, Transport};
use super::types::{
    BackendFrame, CanonicalRequest, CanonicalTool, ChatMessage, ChatPayload, ModelInfo, Role,
    TranslatedResponse, TranslationStats, WireMessage,
};
use super::validator::{self, ValidatorConfig};

/// Validated responses from a streaming call.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<TranslatedResponse, BridgeError>> + Send>>;

/// Everything decided before the transport is called.
struct PreparedCall {
    model: String,
    caps: ModelCapabilities,
    payload: ChatPayload,
    translator_warnings: Vec<String>,
    options: CallOptions,
}

/// Frame-level work shared by `send` and `stream`.
#[derive(Clone)]
struct FrameValidator {
    model: String,
    caps: ModelCapabilities,
    registered: Arc<Vec<CanonicalTool>>,
    config: ValidatorConfig,
}

impl FrameValidator {
    fn validate(&self, frame: BackendFrame, pending_warnings: &mut Vec<String>) -> TranslatedResponse {
        let raw = frame.into_raw(&self.model);
        let mut translated =
            validator::validate(&raw, &self.caps, self.registered.as_slice(), &self.config);

        if !pending_warnings.is_empty() {
            let mut warnings = std::mem::take(pending_warnings);
            warnings.append(&mut translated.stats.warnings);
            translated.stats.warnings = warnings;
        }
        log_stats(&self.model, &translated.stats);
        translated
    }
}

fn log_stats(model: &str, stats: &TranslationStats) {
    if stats.hallucinated > 0 {
        tracing::warn!(
            model = %model,
            total = stats.total,
            dropped = stats.hallucinated,
            unknown_tool = stats.unknown_tool,
            invalid_json = stats.invalid_json,
            warnings = ?stats.warnings,
            "dropped tool calls from model output"
        );
    } else {
        tracing::debug!(
            model = %model,
            total = stats.total,
            valid = stats.valid,
            warnings = stats.warnings.len(),
            "validated response"
        );
    }
}

// ─── TranslationOrchestrator ─────────────────────────────────────────────────

/// Sits between a caller speaking the canonical format and a local backend.
///
/// Holds no mutable state; one orchestrator serves any number of concurrent
/// calls.
pub struct TranslationOrchestrator<T: Transport> {
    transport: T,
    registry: Arc<CapabilityRegistry>,
    tools: Arc<dyn ToolSource>,
    config: BridgeConfig,
}

impl TranslationOrchestrator<HttpTransport> {
    /// HTTP transport plus built-ins layered with the config's overrides.
    pub fn from_config(config: BridgeConfig) -> Result<Self, BridgeError> {
        let registry = Arc::new(CapabilityRegistry::with_overrides(
            &config.capability_overrides,
        ));
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self::new(transport, registry, config))
    }
}

impl<T: Transport> TranslationOrchestrator<T> {
    pub fn new(transport: T, registry: Arc<CapabilityRegistry>, config: BridgeConfig) -> Self {
        Self {
            transport,
            registry,
            tools: Arc::new(StaticTools::default()),
            config,
        }
    }

    /// Use `source` as the session's tool registry.
    pub fn with_tool_source(mut self, source: Arc<dyn ToolSource>) -> Self {
        self.tools = source;
        self
    }

    /// The session's registered tools.
    pub fn registered_tools(&self) -> Vec<CanonicalTool> {
        self.tools.tools()
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Capabilities for `model_id` (or the default model).
    pub fn capabilities(&self, model_id: &str) -> Result<ModelCapabilities, BridgeError> {
        let model = self.config.resolve_model(model_id)?;
        Ok(self.registry.get(&model))
    }

    // ─── Chat ────────────────────────────────────────────────────────────

    /// One non-streaming turn.
    ///
    /// Tool calls in the result are always drawn from `registered_tools`.
    pub async fn send(
        &self,
        request: &CanonicalRequest,
        model_id: &str,
        registered_tools: &[CanonicalTool],
        cancel: &CancellationToken,
    ) -> Result<TranslatedResponse, BridgeError> {
        let mut call = self.prepare(request, model_id, registered_tools, false, cancel)?;
        let frame = self.transport.request(&call.payload, &call.options).await?;

        let validator = FrameValidator {
            model: call.model,
            caps: call.caps,
            registered: Arc::new(registered_tools.to_vec()),
            config: self.config.validator.clone(),
        };
        Ok(validator.validate(frame, &mut call.translator_warnings))
    }

    /// One streaming turn.
    ///
    /// The returned stream is lazy and single-use. Exactly one item carries
    /// a finish reason, and it is the last. Models that cannot stream get a
    /// one-item stream backed by a non-streaming call.
    pub async fn stream(
        &self,
        request: &CanonicalRequest,
        model_id: &str,
        registered_tools: &[CanonicalTool],
        cancel: &CancellationToken,
    ) -> Result<ResponseStream, BridgeError> {
        let mut call = self.prepare(request, model_id, registered_tools, true, cancel)?;
        let validator = FrameValidator {
            model: call.model.clone(),
            caps: call.caps.clone(),
            registered: Arc::new(registered_tools.to_vec()),
            config: self.config.validator.clone(),
        };

        if !call.caps.supports_streaming {
            tracing::debug!(model = %call.model, "model cannot stream, falling back to a single response");
            call.payload.stream = false;
            let frame = self.transport.request(&call.payload, &call.options).await?;
            let response = validator.validate(frame, &mut call.translator_warnings);
            return Ok(Box::pin(stream::once(async move { Ok(response) })));
        }

        let frames = self.transport.stream(&call.payload, &call.options).await?;
        let mut pending_warnings = call.translator_warnings;
        let responses =
            frames.map(move |frame| frame.map(|f| validator.validate(f, &mut pending_warnings)));
        Ok(Box::pin(responses))
    }

    // ─── Auxiliary operations ────────────────────────────────────────────

    /// Estimated prompt tokens for `request` as it would be sent, tool
    /// schemas and prompt augmentation included. No network call.
    pub fn count_tokens(
        &self,
        request: &CanonicalRequest,
        model_id: &str,
        registered_tools: &[CanonicalTool],
    ) -> Result<u32, BridgeError> {
        let call = self.prepare(
            request,
            model_id,
            registered_tools,
            false,
            &CancellationToken::new(),
        )?;
        Ok(estimate_payload_tokens(&call.payload))
    }

    /// Models installed on the backend.
    pub async fn list_models(&self, cancel: &CancellationToken) -> Result<Vec<ModelInfo>, BridgeError> {
        let options = CallOptions::new(self.config.timeout()).with_cancel(cancel.clone());
        self.transport.list_models(&options).await
    }

    pub async fn health_check(&self) -> bool {
        self.transport.health_check().await
    }

    /// Local chat backends expose no embedding endpoint through this bridge.
    pub async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, BridgeError> {
        Err(BridgeError::UnsupportedOperation {
            operation: "embed".into(),
        })
    }

    // ─── Payload building ────────────────────────────────────────────────

    fn prepare(
        &self,
        request: &CanonicalRequest,
        model_id: &str,
        registered_tools: &[CanonicalTool],
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<PreparedCall, BridgeError> {
        let model = self.config.resolve_model(model_id)?;
        let caps = self.registry.get(&model);

        let offered = request.tools.as_deref().unwrap_or(registered_tools);
        let translation = tool_translator::translate(offered, &caps);
        let messages = augmented_messages(&request.messages, &caps, offered, &translation);
        let has_tools = !translation.translated.is_empty();

        let mut options = Map::new();
        if let Some(t) = request.options.temperature {
            options.insert("temperature".into(), Value::from(t));
        }
        if let Some(p) = request.options.top_p {
            options.insert("top_p".into(), Value::from(p));
        }
        if let Some(n) = request.options.max_tokens {
            options.insert("max_tokens".into(), Value::from(n));
        }
        let dialect = dialect_for(&caps);
        dialect.apply_request_defaults(&caps, &request.options, has_tools, &mut options);
        if let Some(ctx) = caps.context_size_hint {
            options.insert("num_ctx".into(), Value::from(ctx));
        }

        tracing::debug!(
            model = %model,
            dialect = dialect.name(),
            offered = offered.len(),
            translated = translation.translated.len(),
            invalid = translation.invalid.len(),
            "prepared chat payload"
        );

        let timeout = caps
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.timeout());

        let payload = ChatPayload {
            model: model.clone(),
            messages,
            stream,
            tools: has_tools.then_some(translation.translated),
            options,
        };

        Ok(PreparedCall {
            model,
            caps,
            payload,
            translator_warnings: translation.warnings,
            options: CallOptions::new(timeout).with_cancel(cancel.clone()),
        })
    }
}

/// Wire messages with the tool section added to the system prompt.
///
/// The first system message is augmented; if there is none, one is
/// prepended. Nothing changes when no tool survived translation.
fn augmented_messages(
    messages: &[ChatMessage],
    caps: &ModelCapabilities,
    offered: &[CanonicalTool],
    translation: &ToolTranslation,
) -> Vec<WireMessage> {
    let mut wire: Vec<WireMessage> = messages.iter().map(WireMessage::from).collect();
    if translation.translated.is_empty() {
        return wire;
    }

    let callable: Vec<CanonicalTool> = offered
        .iter()
        .filter(|t| !translation.invalid.contains(&t.name))
        .cloned()
        .collect();

    match wire.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => system.content = prompt::augment(&system.content, caps, &callable),
        None => wire.insert(
            0,
            WireMessage {
                role: Role::System,
                content: prompt::augment("", caps, &callable),
            },
        ),
    }
    wire
}

// ─── Tests ───────────────────────────────────────────────────────────────────
