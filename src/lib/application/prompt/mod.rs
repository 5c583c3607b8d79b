//! # Prompt Compiler
//!
//! Renders the system prompt that teaches a model the XML tool-use grammar.
//!
//! With no tools the user's prompt is returned untouched. Otherwise the output is,
//! in order: grammar preamble, worked examples, the `<tools>` block, the five
//! invocation rules, the agentic-mode block (only when file-editor tools are
//! present) and finally the user's prompt. Output is a pure function of its inputs.

mod sections;
mod templates;

pub use sections::{RulesContext, objective_section, rules_section};

use crate::application::tooling::{CatalogSnapshot, ToolDescriptor};
use crate::config::AgentConfig;
use crate::constants::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_ITERATIONS};
use serde::Deserialize;
use serde_json::Value;
use templates::{
    AGENTIC_MODE, AVAILABLE_TOOLS_HEADER, TOOL_USE_EXAMPLES, TOOL_USE_EXAMPLES_HEADER,
    TOOL_USE_PREAMBLE, TOOL_USE_RULES, USER_INSTRUCTIONS_HEADER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLimits {
    pub max_iterations: usize,
    pub max_consecutive_errors: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

impl From<&AgentConfig> for PromptLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptStyle {
    /// Grammar, worked examples and the agentic-mode block.
    #[default]
    Full,
    /// Grammar plus the objective and rules sections.
    Compact,
}

/// Compile the full-style prompt from the user's prompt, the tool list and the
/// agentic flag.
pub fn compile_system_prompt(
    user_prompt: &str,
    tools: &[ToolDescriptor],
    agentic: bool,
    limits: PromptLimits,
) -> String {
    if tools.is_empty() {
        return user_prompt.to_string();
    }

    let mut prompt = String::with_capacity(8 * 1024);
    prompt.push_str(TOOL_USE_PREAMBLE);
    prompt.push_str(TOOL_USE_EXAMPLES_HEADER);
    prompt.push_str(TOOL_USE_EXAMPLES);
    prompt.push_str(AVAILABLE_TOOLS_HEADER);
    prompt.push_str(&available_tools(tools));
    prompt.push_str(TOOL_USE_RULES);
    if agentic {
        prompt.push_str(&agentic_mode_block(limits));
    }
    prompt.push_str(USER_INSTRUCTIONS_HEADER);
    prompt.push_str(user_prompt);
    prompt.push('\n');
    prompt
}

/// Same grammar and limits as [`compile_system_prompt`], without the worked examples.
pub fn compile_compact_prompt(
    user_prompt: &str,
    tools: &[ToolDescriptor],
    agentic: bool,
    limits: PromptLimits,
    cwd: &str,
) -> String {
    if tools.is_empty() {
        return user_prompt.to_string();
    }

    let mut sections = vec![
        TOOL_USE_PREAMBLE.trim_end().to_string(),
        format!("## Tool Use Available Tools\n{}", available_tools(tools)),
    ];
    if agentic {
        sections.push(objective_section(limits));
    }
    sections.push(rules_section(&RulesContext {
        cwd: cwd.to_string(),
        has_file_editor_tools: agentic,
    }));
    sections.push(format!("# User Instructions\n{user_prompt}\n"));
    sections.join("\n\n")
}

/// The `<tools>` block: one `<tool>` entry per descriptor, addressed by id.
pub fn available_tools(tools: &[ToolDescriptor]) -> String {
    let entries: Vec<String> = tools.iter().map(tool_entry).collect();
    format!("<tools>\n{}\n</tools>", entries.join("\n"))
}

fn tool_entry(tool: &ToolDescriptor) -> String {
    let schema = match &tool.input_schema {
        Value::Null => String::new(),
        schema => schema.to_string(),
    };
    format!(
        "\n<tool>\n  <name>{}</name>\n  <description>{}</description>\n  <arguments>\n    {}\n  </arguments>\n</tool>\n",
        tool.id, tool.description, schema
    )
}

fn agentic_mode_block(limits: PromptLimits) -> String {
    format!(
        "{AGENTIC_MODE}- Maximum iterations: {} tool calls\n- Consecutive error limit: {} failures in a row\n",
        limits.max_iterations, limits.max_consecutive_errors
    )
}

#[derive(Debug, Clone)]
pub struct PromptCompiler {
    limits: PromptLimits,
    style: PromptStyle,
    cwd: String,
}

impl Default for PromptCompiler {
    fn default() -> Self {
        Self::new(PromptLimits::default())
    }
}

impl PromptCompiler {
    pub fn new(limits: PromptLimits) -> Self {
        Self {
            limits,
            style: PromptStyle::Full,
            cwd: ".".to_string(),
        }
    }

    pub fn with_style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    /// Working directory quoted by the compact rules section.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn limits(&self) -> PromptLimits {
        self.limits
    }

    pub fn with_limits(mut self, limits: PromptLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Compile against a catalog snapshot; its file-editor flag picks the mode.
    pub fn compile(&self, user_prompt: &str, snapshot: &CatalogSnapshot) -> String {
        self.compile_with_mode(
            user_prompt,
            snapshot.tools(),
            snapshot.has_file_editor_tools(),
        )
    }

    pub fn compile_with_mode(
        &self,
        user_prompt: &str,
        tools: &[ToolDescriptor],
        agentic: bool,
    ) -> String {
        match self.style {
            PromptStyle::Full => compile_system_prompt(user_prompt, tools, agentic, self.limits),
            PromptStyle::Compact => {
                compile_compact_prompt(user_prompt, tools, agentic, self.limits, &self.cwd)
            }
        }
    }
}
