//! Compact section builders for backends that want a terser prompt.

use super::PromptLimits;
use super::templates::{
    FILE_EDITING_RULES, OBJECTIVE_BODY, RULES_COMMUNICATION, SECTION_DIVIDER,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesContext {
    pub cwd: String,
    pub has_file_editor_tools: bool,
}

pub fn objective_section(limits: PromptLimits) -> String {
    format!(
        "{SECTION_DIVIDER}\n\n{OBJECTIVE_BODY}- Max {} tool calls, max {} consecutive errors",
        limits.max_iterations, limits.max_consecutive_errors
    )
}

pub fn rules_section(context: &RulesContext) -> String {
    let editing_rules = if context.has_file_editor_tools {
        FILE_EDITING_RULES
    } else {
        ""
    };
    format!(
        "{SECTION_DIVIDER}\n\nRULES\n\n## General\n- Working directory: {} (all paths relative to this)\n{RULES_COMMUNICATION}{editing_rules}",
        context.cwd
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objective_states_limits_and_completion_tool() {
        let section = objective_section(PromptLimits {
            max_iterations: 40,
            max_consecutive_errors: 5,
        });
        assert!(section.starts_with("====\n\nOBJECTIVE"));
        assert!(section.contains("Call `attempt_completion` to present result"));
        assert!(section.ends_with("- Max 40 tool calls, max 5 consecutive errors"));
    }

    #[test]
    fn file_editing_rules_only_with_editor_tools() {
        let plain = rules_section(&RulesContext {
            cwd: "/work".into(),
            has_file_editor_tools: false,
        });
        assert!(plain.contains("- Working directory: /work (all paths relative to this)"));
        assert!(!plain.contains("File Editing Rules"));

        let editing = rules_section(&RulesContext {
            cwd: "/work".into(),
            has_file_editor_tools: true,
        });
        assert!(editing.contains("## File Editing Rules"));
        assert!(editing.contains("`apply_diff` > `replace_in_file`"));
    }
}
