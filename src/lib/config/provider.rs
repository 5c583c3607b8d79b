//! # Provider Configuration
//!
//! The orchestration loop talks to a single OpenAI-compatible chat endpoint.
//!
//! ```toml
//! [provider]
//! id = "openai"
//! endpoint = "https://api.openai.com"
//! model = "gpt-4o-mini"
//! api_key = "OPENAI_API_KEY"   # name of the environment variable holding the key
//! ```

use serde::Deserialize;

pub const DEFAULT_API_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProviderConfig {
    /// Identifier used in logs and error messages
    pub id: String,
    pub endpoint: String,
    pub model: String,
    /// Environment variable that holds the API key
    pub api_key: Option<String>,
    pub api_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct RawProviderConfig {
    #[serde(default)]
    id: Option<String>,
    endpoint: String,
    model: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_path: Option<String>,
}

impl From<RawProviderConfig> for ModelProviderConfig {
    fn from(raw: RawProviderConfig) -> Self {
        Self {
            id: raw.id.unwrap_or_else(|| "openai".to_string()),
            endpoint: raw.endpoint,
            model: raw.model,
            api_key: raw.api_key.filter(|key| !key.trim().is_empty()),
            api_path: raw.api_path.unwrap_or_else(|| DEFAULT_API_PATH.to_string()),
        }
    }
}
