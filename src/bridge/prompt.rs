//! System prompt augmentation.
//!
//! Appends a tool-usage section to the caller's system prompt, chosen by
//! `ModelCapabilities::prompt_style`. Composition is plain string building:
//! the same inputs always produce the same prompt.

use std::fmt::Write as _;

use super::capabilities::{ModelCapabilities, PromptStyle};
use super::dialects::dialect_for;
use super::tool_translator::sanitize_description;
use super::types::CanonicalTool;

/// First line of a tool description, sanitized under the dialect's budget.
fn summary(caps: &ModelCapabilities, tool: &CanonicalTool) -> String {
    let max_len = dialect_for(caps).max_description_len();
    sanitize_description(&tool.description, max_len)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Append tool instructions to `base_prompt`.
///
/// Returns `base_prompt` unchanged when the model has no tool support or no
/// tools are offered, so an empty tool section is never injected.
pub fn augment(base_prompt: &str, caps: &ModelCapabilities, tools: &[CanonicalTool]) -> String {
    if !caps.supports_tools || tools.is_empty() || caps.max_tools == 0 {
        return base_prompt.to_string();
    }

    let offered = &tools[..tools.len().min(caps.max_tools)];
    let truncated_from = (tools.len() > offered.len()).then_some(tools.len());

    let section = match caps.prompt_style {
        PromptStyle::Standard => standard_section(caps, offered),
        PromptStyle::Hermes => hermes_section(caps, offered, truncated_from),
        PromptStyle::Agentic => agentic_section(caps, offered),
    };

    if base_prompt.trim().is_empty() {
        section
    } else {
        format!("{}\n\n{section}", base_prompt.trim_end())
    }
}

fn standard_section(caps: &ModelCapabilities, tools: &[CanonicalTool]) -> String {
    let mut s = String::from("# Available Functions\n\nYou can call the following functions:\n");
    for tool in tools {
        let _ = writeln!(s, "- {}: {}", tool.name, summary(caps, tool));
    }
    s.push_str("\nRules:\n");
    s.push_str("- Only call functions from the list above. Never invent function names.\n");
    s.push_str("- Pass arguments as a JSON object matching the function's parameters.\n");
    if caps.supports_parallel_calls {
        s.push_str("- You may call several functions in one response when they are independent.\n");
    } else {
        s.push_str("- Call at most one function per response and wait for its result.\n");
    }
    s.trim_end().to_string()
}

fn hermes_section(
    caps: &ModelCapabilities,
    tools: &[CanonicalTool],
    truncated_from: Option<usize>,
) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    let mut s = String::from("# Tool Use\n\n");
    s.push_str(
        "Think step by step before acting. Decide whether a tool is actually needed, \
         which one, and which arguments it requires.\n",
    );
    let _ = writeln!(
        s,
        "Only call tools that appear in this list: {}. Any other tool name will be rejected.",
        names.join(", ")
    );
    s.push_str(
        "Wrap each call as <tool_call>{\"name\": <tool-name>, \"arguments\": <args-object>}</tool_call>.\n",
    );
    if !caps.supports_parallel_calls {
        s.push_str("Call tools sequentially: one call per response, then wait for its result.\n");
    }
    if let Some(total) = truncated_from {
        let _ = writeln!(
            s,
            "Only {} of {total} tools are available to you; do not ask for the others.",
            tools.len()
        );
    }
    s.trim_end().to_string()
}

fn agentic_section(caps: &ModelCapabilities, tools: &[CanonicalTool]) -> String {
    let mut s = String::from("# Autonomous Operation\n\n");
    s.push_str(
        "You are an autonomous agent orchestrating a multi-step task. Break the request \
         into small sub-tasks, complete them one at a time with the tools below, and check \
         each result before moving on.\n\nTools:\n",
    );
    for tool in tools {
        let _ = writeln!(s, "- {}: {}", tool.name, summary(caps, tool));
    }
    s.push_str("\nUse only these tools. If none fits a sub-task, say so instead of guessing.\n");
    if let Some(ctx) = caps.context_size_hint {
        let _ = writeln!(
            s,
            "Your context window is about {ctx} tokens; keep intermediate output concise."
        );
    }
    s.trim_end().to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::capabilities::Dialect;
    use crate::bridge::dialects::{CUSTOM_MAX_DESCRIPTION_LEN, DEFAULT_MAX_DESCRIPTION_LEN};
    use serde_json::Value;

    fn tools(n: usize) -> Vec<CanonicalTool> {
        (0..n)
            .map(|i| CanonicalTool::new(format!("tool_{i}"), format!("Does thing {i}.\nMore."), Value::Null))
            .collect()
    }

    fn caps(style: PromptStyle, parallel: bool, max_tools: usize) -> ModelCapabilities {
        ModelCapabilities {
            supports_tools: true,
            dialect: Dialect::OpenAi,
            max_tools,
            supports_parallel_calls: parallel,
            prompt_style: style,
            ..ModelCapabilities::default()
        }
    }

    #[test]
    fn test_noop_without_tools_or_support() {
        let base = "You are helpful.";
        assert_eq!(augment(base, &caps(PromptStyle::Standard, true, 8), &[]), base);
        assert_eq!(augment(base, &ModelCapabilities::default(), &tools(3)), base);
    }

    #[test]
    fn test_standard_lists_functions_and_parallel_rule() {
        let out = augment("Base.", &caps(PromptStyle::Standard, true, 8), &tools(2));
        assert!(out.starts_with("Base.\n\n# Available Functions"));
        assert!(out.contains("- tool_0: Does thing 0."));
        assert!(!out.contains("More."));
        assert!(out.contains("Never invent function names"));
        assert!(out.contains("several functions"));

        let out = augment("Base.", &caps(PromptStyle::Standard, false, 8), &tools(2));
        assert!(out.contains("at most one function"));
    }

    #[test]
    fn test_hermes_sequential_and_truncation_notes() {
        let out = augment("", &caps(PromptStyle::Hermes, false, 2), &tools(5));
        assert!(out.starts_with("# Tool Use"));
        assert!(out.contains("Think step by step"));
        assert!(out.contains("this list: tool_0, tool_1."));
        assert!(!out.contains("tool_2"));
        assert!(out.contains("sequentially"));
        assert!(out.contains("Only 2 of 5 tools"));

        let out = augment("", &caps(PromptStyle::Hermes, true, 10), &tools(5));
        assert!(!out.contains("sequentially"));
        assert!(!out.contains("of 5 tools"));
    }

    #[test]
    fn test_agentic_mentions_context_hint() {
        let mut c = caps(PromptStyle::Agentic, false, 8);
        let out = augment("Base", &c, &tools(1));
        assert!(out.contains("autonomous agent"));
        assert!(out.contains("sub-tasks"));
        assert!(!out.contains("context window"));

        c.context_size_hint = Some(32_768);
        let out = augment("Base", &c, &tools(1));
        assert!(out.contains("about 32768 tokens"));
    }

    #[test]
    fn test_listed_descriptions_are_sanitized() {
        let raw = format!("<b>Bold</b> {}", "x".repeat(3_000));
        let t = vec![CanonicalTool::new("fmt", raw, Value::Null)];
        for style in [PromptStyle::Standard, PromptStyle::Agentic] {
            let out = augment("", &caps(style, false, 8), &t);
            let line = out.lines().find(|l| l.starts_with("- fmt: ")).unwrap();
            assert!(!line.contains('<') && !line.contains('>'));
            assert!(line.contains("bBold/b"));
            assert!(line.chars().count() <= "- fmt: ".len() + DEFAULT_MAX_DESCRIPTION_LEN);
        }

        let mut coder = caps(PromptStyle::Standard, false, 8);
        coder.dialect = Dialect::Custom;
        coder.custom_parser_id = Some("qwen-coder".into());
        let out = augment("", &coder, &t);
        let line = out.lines().find(|l| l.starts_with("- fmt: ")).unwrap();
        assert!(line.chars().count() <= "- fmt: ".len() + CUSTOM_MAX_DESCRIPTION_LEN);
    }

    #[test]
    fn test_deterministic() {
        let c = caps(PromptStyle::Hermes, false, 3);
        let t = tools(4);
        assert_eq!(augment("x", &c, &t), augment("x", &c, &t));
    }
}
