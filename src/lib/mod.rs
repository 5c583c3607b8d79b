pub mod application;
pub mod cli;
pub mod config;
pub mod constants;
pub mod domain;
pub mod infrastructure;

pub use application::{agent, prompt, tooling};
pub use cli::{Cli, Command};
pub use config::{AppConfig, ModelProviderConfig};
pub use domain::types;
pub use infrastructure::model;

use agent::{Agent, AgentError, AgentOptions, AgentOutcome, CancelHandle, RunStatus};
use model::OpenAIClient;
use prompt::{PromptCompiler, PromptLimits};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tooling::{CatalogSnapshot, ErrorClassifier, ServerPool, ToolCatalog};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    init_tracing(cli.quiet);
    info!("Starting aether");
    debug!(
        command = ?cli.command,
        config = ?cli.config,
        system = ?cli.system,
        "CLI arguments parsed"
    );

    let config_path = cli.config.as_deref().map(Path::new);
    let file_config = AppConfig::load(config_path)?;
    if let Some(path) = config_path {
        info!(path = %path.display(), "Loaded configuration from file");
    } else {
        info!("Loaded configuration from default path");
    }

    let classifier = ErrorClassifier::new(&file_config.classifier);
    let pool = ServerPool::from_configs(file_config.enabled_servers(), &classifier)?;
    let catalog = Arc::new(ToolCatalog::new(Arc::new(pool), classifier));
    let connected = catalog.pool().acquire_all().await;
    info!(connected = connected.len(), "Tool servers ready");

    let result = execute(&cli, &file_config, &catalog).await;

    catalog.pool().release_all(&connected).await;
    info!("Client execution finished");
    result
}

async fn execute(
    cli: &Cli,
    file_config: &AppConfig,
    catalog: &Arc<ToolCatalog>,
) -> Result<(), Box<dyn Error>> {
    let system_prompt = cli
        .system
        .clone()
        .unwrap_or_else(|| file_config.system_prompt.clone());
    let snapshot = catalog.snapshot().await;
    let compiler = PromptCompiler::new(PromptLimits::from(&file_config.agent)).with_cwd(working_dir());

    match &cli.command {
        Command::Tools => {
            print_tools(&snapshot);
            for (server, status) in catalog.pool().statuses().await {
                if status != tooling::ConnectionStatus::Connected {
                    println!("{server}: {status}");
                }
            }
            Ok(())
        }
        Command::Prompt => {
            println!("{}", compiler.compile(&system_prompt, &snapshot));
            Ok(())
        }
        Command::Run {
            task,
            max_iterations,
            json,
        } => {
            let provider_config = file_config.require_provider()?;
            let provider = Arc::new(OpenAIClient::from_config(provider_config));
            info!(
                provider = provider_config.id.as_str(),
                model = provider.model(),
                "Using model provider"
            );

            let mut options = AgentOptions::from_config(&file_config.agent, system_prompt);
            if let Some(limit) = max_iterations {
                options.max_iterations = *limit;
            }

            let cancel = CancelHandle::new();
            let watcher = spawn_interrupt_watcher(cancel.clone());

            let tools: Arc<dyn tooling::ToolServerInterface> = catalog.clone();
            let agent = Agent::new(provider, tools).with_compiler(compiler);
            let outcome = agent.run(task.join(" "), snapshot, options, &cancel).await;
            watcher.abort();

            report(&outcome, *json)?;
            outcome.into_result().map(|_| ()).map_err(Into::into)
        }
    }
}

fn print_tools(snapshot: &CatalogSnapshot) {
    if snapshot.is_empty() {
        println!("No tools available.");
        return;
    }
    for tool in snapshot.tools() {
        println!("{} ({})", tool.id, tool.server_name);
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
    }
}

fn report(outcome: &AgentOutcome, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    match &outcome.status {
        RunStatus::Completed { answer, command } => {
            println!("{answer}");
            if let Some(command) = command {
                println!();
                println!("Suggested command: {command}");
            }
        }
        RunStatus::Failed(reason) => eprintln!("{}", reason.user_message()),
        RunStatus::Aborted => eprintln!("{}", AgentError::Aborted.user_message()),
    }
    Ok(())
}

fn spawn_interrupt_watcher(cancel: CancelHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    })
}

fn working_dir() -> String {
    std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

fn init_tracing(quiet: bool) {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = if quiet {
            EnvFilter::new("off")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
