//! Application constants
//!
//! Single source of truth for paths, built-in server names and protocol defaults.

/// Default configuration file path
pub const CONFIG_PATH: &str = "config/client.toml";

/// Default environment file path
pub const ENV_PATH: &str = "config/.env";

/// Built-in tool server identifiers.
pub mod servers {
    pub const TIME: &str = "@aether/time";
    pub const FILE_EDITOR: &str = "@aether/file-editor";
}

/// Server whose presence switches the prompt into agentic mode.
pub const AGENTIC_MODE_SERVER: &str = servers::FILE_EDITOR;

/// Tool names that mark a catalog as file-editing capable.
pub const FILE_EDITOR_TOOLS: [&str; 8] = [
    "list_workspaces",
    "get_workspace_files",
    "read_file",
    "write_to_file",
    "insert_content",
    "replace_in_file",
    "apply_diff",
    COMPLETION_TOOL,
];

/// The only sanctioned way for a model to end a multi-step task.
pub const COMPLETION_TOOL: &str = "attempt_completion";

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

pub const CLIENT_NAME: &str = "AetherLink";
pub const CLIENT_VERSION: &str = "1.0.0";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const RECONNECT_DELAY_MS: u64 = 3000;
pub const MESSAGE_ENDPOINT_TIMEOUT_MS: u64 = 5000;
pub const CONFIRMATION_TIMEOUT_MS: u64 = 60_000;
pub const TOOL_NAME_MAX_LENGTH: usize = 63;

pub const DEFAULT_MAX_ITERATIONS: usize = 25;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: usize = 3;
