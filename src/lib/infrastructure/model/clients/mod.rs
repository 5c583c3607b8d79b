//! Model clients

mod base;
mod openai;

pub use base::{HttpClientBase, resolve_api_key};
pub use openai::OpenAIClient;
