pub mod app;
pub mod error;
pub mod loader;
pub mod provider;
pub mod server;

pub use crate::constants::CONFIG_PATH;

pub use app::{AgentConfig, AppConfig, ClassifierConfig};
pub use error::ConfigError;
pub use provider::ModelProviderConfig;
pub use server::{ServerConfig, TransportKind};
