//! Extraction of `<tool_use>` blocks from free model text.

use serde_json::{Map, Value};

const OPEN: &str = "<tool_use>";
const CLOSE: &str = "</tool_use>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUseBlock {
    pub name: String,
    /// Raw text between `<arguments>` tags, untrimmed JSON.
    pub arguments: String,
    /// Byte offset just past the block's closing tag.
    pub end: usize,
}

impl ToolUseBlock {
    /// Empty arguments mean `{}`; anything else must be a JSON object.
    pub fn arguments(&self) -> Result<Map<String, Value>, String> {
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(Value::Null) => Ok(Map::new()),
            Ok(other) => Err(format!(
                "arguments for '{}' must be a JSON object, got {}",
                self.name,
                json_type(&other)
            )),
            Err(err) => Err(format!("invalid JSON arguments for '{}': {err}", self.name)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTurn {
    /// No tool use: the text is the answer.
    Answer,
    /// The first block; `ignored` counts any further blocks.
    ToolUse { block: ToolUseBlock, ignored: usize },
    /// A block was opened but could not be read.
    Malformed { reason: String, ignored: usize },
}

pub fn parse_turn(text: &str) -> ParsedTurn {
    let blocks = text.matches(OPEN).count();
    let Some(start) = text.find(OPEN) else {
        return ParsedTurn::Answer;
    };
    let ignored = blocks - 1;

    let body_start = start + OPEN.len();
    let Some(body_len) = text[body_start..].find(CLOSE) else {
        return ParsedTurn::Malformed {
            reason: "unterminated <tool_use> block".to_string(),
            ignored,
        };
    };
    let body = &text[body_start..body_start + body_len];
    let end = body_start + body_len + CLOSE.len();

    let name = match tag_content(body, "name").map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return ParsedTurn::Malformed {
                reason: "tool use is missing a <name>".to_string(),
                ignored,
            };
        }
    };
    let arguments = tag_content(body, "arguments").unwrap_or_default().to_string();

    ParsedTurn::ToolUse {
        block: ToolUseBlock {
            name,
            arguments,
            end,
        },
        ignored,
    }
}

fn tag_content<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let len = body[start..].find(&close)?;
    Some(&body[start..start + len])
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
