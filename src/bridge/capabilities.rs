//! Model capability registry.
//!
//! Maps a backend model id (`mistral:latest`, `qwen2.5-coder:32b-instruct`,
//! `hermes3@q4`) to the dialect, limits, and prompting preferences the rest
//! of the pipeline keys off.
//!
//! Resolution order:
//!   1. Exact match on the raw id
//!   2. Exact match on the normalized id
//!   3. Family match (normalized id contains, or is contained by, a key;
//!      first hit in table order wins)
//!   4. Disabled-tools defaults
//!
//! The table is built once and never mutated; `get` is a pure lookup and is
//! safe to call from any number of tasks at once.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── Public Types ────────────────────────────────────────────────────────────

/// Which tool-calling JSON shape the model family expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAI-style function schemas, passed through.
    #[default]
    OpenAi,
    /// Hermes-style: usage hints in descriptions, `<tool_call>` text blocks.
    Hermes,
    /// Dispatched further on `custom_parser_id`.
    Custom,
}

/// Which system-prompt template to append when tools are offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    #[default]
    Standard,
    Hermes,
    Agentic,
}

/// How reliably the model keeps track of earlier turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiTurnQuality {
    Excellent,
    #[default]
    Good,
    Poor,
}

/// What a model family can do, and how it wants to be spoken to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub dialect: Dialect,
    pub max_tools: usize,
    pub supports_parallel_calls: bool,
    pub supports_streaming: bool,
    pub prompt_style: PromptStyle,
    pub multi_turn_quality: MultiTurnQuality,
    pub custom_parser_id: Option<String>,
    pub timeout_ms: Option<u64>,
    pub context_size_hint: Option<u32>,
}

impl Default for ModelCapabilities {
    /// Unknown models get no tools, so every downstream stage degrades to
    /// plain text.
    fn default() -> Self {
        Self {
            supports_tools: false,
            dialect: Dialect::OpenAi,
            max_tools: 0,
            supports_parallel_calls: false,
            supports_streaming: true,
            prompt_style: PromptStyle::Standard,
            multi_turn_quality: MultiTurnQuality::Good,
            custom_parser_id: None,
            timeout_ms: None,
            context_size_hint: None,
        }
    }
}

impl ModelCapabilities {
    fn tools(dialect: Dialect, max_tools: usize, parallel: bool, style: PromptStyle) -> Self {
        Self {
            supports_tools: true,
            dialect,
            max_tools,
            supports_parallel_calls: parallel,
            prompt_style: style,
            ..Self::default()
        }
    }

    fn quality(mut self, quality: MultiTurnQuality) -> Self {
        self.multi_turn_quality = quality;
        self
    }

    fn context(mut self, tokens: u32) -> Self {
        self.context_size_hint = Some(tokens);
        self
    }

    fn parser(mut self, id: &str) -> Self {
        self.custom_parser_id = Some(id.to_string());
        self
    }

    fn timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Immutable lookup table from model family to capabilities.
///
/// Construct once at startup and share (`Arc`) with every orchestrator.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    /// `(normalized key, capabilities)`, ordered most-specific first.
    entries: Vec<(String, ModelCapabilities)>,
}

impl CapabilityRegistry {
    /// A registry with only the built-in model families.
    pub fn builtin() -> Self {
        Self {
            entries: builtin_entries(),
        }
    }

    /// Built-ins layered under a loaded override map.
    ///
    /// Override keys are normalized; an override replaces a built-in entry
    /// with the same key and is consulted before built-ins in family matching.
    pub fn with_overrides(overrides: &HashMap<String, ModelCapabilities>) -> Self {
        let mut override_entries: Vec<(String, ModelCapabilities)> = overrides
            .iter()
            .map(|(key, caps)| (normalize_model_id(key), caps.clone()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        // HashMap order is unspecified; keep family matching deterministic.
        override_entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(&b.0)));

        let mut entries = override_entries;
        for (key, caps) in builtin_entries() {
            if !entries.iter().any(|(k, _)| *k == key) {
                entries.push((key, caps));
            }
        }
        Self { entries }
    }

    /// Resolve capabilities for `model_id`. Never fails.
    pub fn get(&self, model_id: &str) -> ModelCapabilities {
        if let Some(caps) = self.exact(model_id) {
            return caps.clone();
        }

        let normalized = normalize_model_id(model_id);
        if normalized.is_empty() {
            return ModelCapabilities::default();
        }
        if let Some(caps) = self.exact(&normalized) {
            return caps.clone();
        }

        self.entries
            .iter()
            .find(|(key, _)| normalized.contains(key.as_str()) || key.contains(normalized.as_str()))
            .map(|(_, caps)| caps.clone())
            .unwrap_or_default()
    }

    /// Registered family keys, in lookup order.
    pub fn known_models(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    fn exact(&self, key: &str) -> Option<&ModelCapabilities> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, caps)| caps)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Variant tags that never change a model's dialect.
const VARIANT_SUFFIXES: &[&str] = &["-instruct", "-chat", "-latest"];

/// Normalize a model id for lookup.
///
/// Lower-cases, turns `:` and `@` into `-`, then repeatedly strips a trailing
/// parameter-size tag (`-7b`, `-0.5b`, `-8x7b`) or variant tag until nothing
/// changes. Idempotent.
pub fn normalize_model_id(model_id: &str) -> String {
    let mut id: String = model_id
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ':' || c == '@' { '-' } else { c })
        .collect();

    loop {
        let before = id.len();
        for suffix in VARIANT_SUFFIXES {
            if let Some(stripped) = id.strip_suffix(suffix) {
                id = stripped.to_string();
            }
        }
        if let Some(stripped) = strip_size_suffix(&id) {
            id = stripped.to_string();
        }
        id = id.trim_end_matches('-').to_string();
        if id.len() == before {
            return id;
        }
    }
}

/// Strip a trailing `-<digits>[.<digits>][x<digits>]b` segment.
fn strip_size_suffix(id: &str) -> Option<&str> {
    let dash = id.rfind('-')?;
    let tail = id[dash + 1..].strip_suffix('b')?;
    if tail.is_empty() {
        return None;
    }
    let is_size = tail
        .split('x')
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit() || c == '.'));
    is_size.then(|| &id[..dash])
}

// ─── Built-in Table ──────────────────────────────────────────────────────────

/// Built-in model families. Ordered by specificity: a key that contains
/// another key must come first, since family matching takes the first hit.
fn builtin_entries() -> Vec<(String, ModelCapabilities)> {
    use Dialect::*;
    use MultiTurnQuality::*;

    let entries = vec![
        // Coder variants speak a custom dialect and need reasoning nudges.
        (
            "qwen2.5-coder",
            ModelCapabilities::tools(Custom, 16, false, PromptStyle::Agentic)
                .parser("qwen-coder")
                .context(32_768)
                .timeout(180_000),
        ),
        (
            "qwen3-coder",
            ModelCapabilities::tools(Custom, 32, false, PromptStyle::Agentic)
                .parser("qwen-coder")
                .quality(Excellent)
                .context(65_536)
                .timeout(180_000),
        ),
        (
            "deepseek-coder-v2",
            ModelCapabilities::tools(Custom, 8, false, PromptStyle::Agentic)
                .parser("deepseek-coder")
                .quality(Poor)
                .context(16_384),
        ),
        // Hermes-trained families.
        (
            "hermes3",
            ModelCapabilities::tools(Hermes, 32, false, PromptStyle::Hermes).context(131_072),
        ),
        (
            "nous-hermes2",
            ModelCapabilities::tools(Hermes, 16, false, PromptStyle::Hermes).quality(Poor),
        ),
        (
            "qwen2.5",
            ModelCapabilities::tools(Hermes, 64, true, PromptStyle::Hermes)
                .quality(Excellent)
                .context(32_768),
        ),
        (
            "qwen3",
            ModelCapabilities::tools(Hermes, 64, true, PromptStyle::Agentic)
                .quality(Excellent)
                .context(40_960),
        ),
        // OpenAI-style native tool calling.
        (
            "llama3-groq-tool-use",
            ModelCapabilities::tools(OpenAi, 32, true, PromptStyle::Standard),
        ),
        (
            "llama3.3",
            ModelCapabilities::tools(OpenAi, 64, false, PromptStyle::Standard).context(131_072),
        ),
        (
            "llama3.2",
            ModelCapabilities::tools(OpenAi, 16, false, PromptStyle::Standard)
                .quality(Poor)
                .context(131_072),
        ),
        (
            "llama3.1",
            ModelCapabilities::tools(OpenAi, 32, false, PromptStyle::Standard).context(131_072),
        ),
        (
            "mistral-nemo",
            ModelCapabilities::tools(OpenAi, 128, true, PromptStyle::Standard).context(131_072),
        ),
        (
            "mistral-small",
            ModelCapabilities::tools(OpenAi, 128, true, PromptStyle::Agentic).context(32_768),
        ),
        (
            "mistral",
            ModelCapabilities::tools(OpenAi, 128, true, PromptStyle::Standard).context(32_768),
        ),
        (
            "mixtral",
            ModelCapabilities::tools(OpenAi, 128, true, PromptStyle::Standard).context(32_768),
        ),
        (
            "command-r-plus",
            ModelCapabilities::tools(OpenAi, 64, true, PromptStyle::Agentic)
                .quality(Excellent)
                .context(131_072),
        ),
        (
            "command-r",
            ModelCapabilities::tools(OpenAi, 64, true, PromptStyle::Agentic).context(131_072),
        ),
        (
            "firefunction-v2",
            ModelCapabilities::tools(OpenAi, 32, true, PromptStyle::Standard),
        ),
        (
            "granite3",
            ModelCapabilities::tools(OpenAi, 16, false, PromptStyle::Standard),
        ),
        (
            "smollm2",
            ModelCapabilities::tools(OpenAi, 8, false, PromptStyle::Standard).quality(Poor),
        ),
        // Text-only families: registered so family matching does not pick a
        // tool-capable neighbour for them.
        ("llama2", ModelCapabilities::default().quality(Poor)),
        ("gemma2", ModelCapabilities::default()),
        ("phi3", ModelCapabilities::default().quality(Poor)),
        ("deepseek-r1", ModelCapabilities::default()),
    ];

    entries
        .into_iter()
        .map(|(key, caps)| (key.to_string(), caps))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
