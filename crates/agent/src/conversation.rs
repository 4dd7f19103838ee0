use serde::Serialize;
use serde_json::Value;

use haggle_core::context::{NegotiationContext, Turn};

use crate::llm::GenerationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

/// Messages API body: system prompt as a top-level field, strictly alternating turns.
pub fn anthropic_request(model: &str, max_tokens: u32, context: &NegotiationContext) -> Value {
    serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": context.system_prompt,
        "messages": chat_messages(&context.turns),
    })
}

/// Chat API body: the system prompt travels as the first message.
pub fn ollama_request(model: &str, max_tokens: u32, context: &NegotiationContext) -> Value {
    let mut messages = vec![ChatMessage { role: "system", content: &context.system_prompt }];
    messages.extend(chat_messages(&context.turns));

    serde_json::json!({
        "model": model,
        "stream": false,
        "messages": messages,
        "options": { "num_predict": max_tokens },
    })
}

fn chat_messages(turns: &[Turn]) -> Vec<ChatMessage<'_>> {
    turns.iter().map(|turn| ChatMessage { role: turn.role.as_str(), content: &turn.text }).collect()
}

/// Concatenates every `text` block of a Messages API response.
pub fn anthropic_reply_text(body: &Value) -> Result<String, GenerationError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::Parse("response has no content blocks".to_string()))?;

    let text: String = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    Ok(text)
}

pub fn ollama_reply_text(body: &Value) -> Result<String, GenerationError> {
    body.get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Parse("response has no message content".to_string()))
}
