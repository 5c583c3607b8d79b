//! Message adapters - convert conversations to provider wire formats

use crate::types::{ChatMessage, MessageRole};
use serde_json::{Value, json};

pub struct MessageAdapter;

impl MessageAdapter {
    /// `[{"role": "...", "content": "..."}]`, led by the system prompt when there is one.
    pub fn to_openai_format(system_prompt: &str, messages: &[ChatMessage]) -> Vec<Value> {
        let system = (!system_prompt.trim().is_empty())
            .then(|| ChatMessage::new(MessageRole::System, system_prompt));
        system
            .iter()
            .chain(messages)
            .map(|msg| {
                json!({
                    "role": msg.role.as_str(),
                    "content": msg.content.clone()
                })
            })
            .collect()
    }
}
