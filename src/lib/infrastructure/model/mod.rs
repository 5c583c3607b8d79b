//! Model infrastructure
//!
//! - `types` - request, response and error types
//! - `traits` - the [`ModelProvider`] seam used by the agent
//! - `adapter` - conversation to wire-format conversion
//! - `clients` - HTTP client implementations

pub mod adapter;
pub mod clients;
pub mod traits;
pub mod types;

pub use clients::OpenAIClient;
pub use traits::ModelProvider;
pub use types::{ModelError, ModelRequest, ModelResponse};
