use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "aether",
    version,
    about = "Agentic MCP client: drives a model through tool calls on configured servers"
)]
pub struct Cli {
    /// Path to client.toml (defaults to config/client.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Replaces the system prompt from the configuration file
    #[arg(long, global = true)]
    pub system: Option<String>,
    /// Disable log output
    #[arg(long, short, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Execute one agent run and print the outcome
    Run {
        /// Task for the agent; words are joined with spaces
        #[arg(required = true)]
        task: Vec<String>,
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the tools offered by the connected servers
    Tools,
    /// Print the compiled system prompt
    Prompt,
}
