//! Core model types (provider-agnostic).
//!
//! Conversation messages are the closed [`Message`] model from the storage
//! crate, so what is persisted is exactly what is sent to the provider.

use super::errors::ModelError;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use storage::{Message, ToolCall};

/// Name of the single string parameter every tool accepts.
const TOOL_INPUT_FIELD: &str = "input";

/// Tool specification exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool arguments.
    pub schema: Value,
}

impl ToolSpec {
    /// A tool taking one free-text argument.
    pub fn single_input(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: json!({
                "type": "object",
                "properties": {
                    TOOL_INPUT_FIELD: { "type": "string" }
                },
                "required": [TOOL_INPUT_FIELD]
            }),
        }
    }
}

/// Extract a tool's string argument from the JSON the model produced.
pub fn argument_from_json(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get(TOOL_INPUT_FIELD) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => args.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Encode a tool's string argument as provider JSON arguments.
pub fn argument_to_json(argument: &str) -> Value {
    json!({ TOOL_INPUT_FIELD: argument })
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Fold another request's usage into this total.
    pub fn add(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Everything needed for a model request.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
    pub system: Option<&'a str>,
}

/// The response from a model: an assistant message, possibly a tool call.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: Message,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn into_usable(self) -> Result<Message, ModelError> {
        usable_reply(self.message)
    }
}

/// Reject replies that carry neither text nor a tool call.
pub fn usable_reply(message: Message) -> Result<Message, ModelError> {
    if message.tool_call.is_none() && message.content.trim().is_empty() {
        return Err(ModelError::InvalidResponse("empty response".into()));
    }
    Ok(message)
}

/// One increment of a streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelChunk {
    pub text: String,
    pub tool_call: Option<ToolCall>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_call: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_call.is_none()
    }
}

/// A finite stream of response increments in generation order.
pub type ChunkStream = BoxStream<'static, Result<ModelChunk, ModelError>>;

/// Trait for LLM provider backends.
pub trait Backend: Send + Sync {
    /// Send the conversation and wait for the complete reply.
    fn infer(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;

    /// Send the conversation and receive the reply incrementally.
    ///
    /// Backends without native streaming yield the whole reply as one chunk.
    fn stream(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ChunkStream, ModelError>> + Send {
        async move {
            let response = self.infer(request).await?;
            let chunk = ModelChunk {
                text: response.message.content,
                tool_call: response.message.tool_call,
            };
            Ok(stream::once(async move { Ok(chunk) }).boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_is_read_from_input_field() {
        assert_eq!(argument_from_json(&json!({"input": "2+2"})), "2+2");
        assert_eq!(argument_from_json(&json!("sqrt(16)")), "sqrt(16)");
        assert_eq!(argument_from_json(&json!({"input": 3})), "3");
        assert_eq!(argument_from_json(&json!({"query": "rust"})), r#"{"query":"rust"}"#);
        assert_eq!(argument_from_json(&Value::Null), "");
    }

    #[test]
    fn argument_json_uses_input_field() {
        let value = argument_to_json("weather in Paris");
        assert_eq!(argument_from_json(&value), "weather in Paris");
    }

    #[test]
    fn single_input_schema_requires_input() {
        let spec = ToolSpec::single_input("calculator", "math");
        assert_eq!(spec.schema["required"][0], "input");
        assert_eq!(spec.schema["properties"]["input"]["type"], "string");
    }

    #[test]
    fn usage_accumulates_across_requests() {
        let mut total = Usage::default();
        total.add(Usage {
            input_tokens: 12,
            output_tokens: 3,
        });
        total.add(Usage {
            input_tokens: 20,
            output_tokens: 7,
        });
        assert_eq!(
            total,
            Usage {
                input_tokens: 32,
                output_tokens: 10,
            }
        );
    }

    #[test]
    fn empty_reply_is_unusable() {
        let empty = ModelResponse {
            message: Message::assistant("  "),
            usage: Usage::default(),
        };
        assert!(matches!(
            empty.into_usable(),
            Err(ModelError::InvalidResponse(_))
        ));

        let call = ModelResponse {
            message: Message::tool_request("", ToolCall::new("get_time", "")),
            usage: Usage::default(),
        };
        assert!(call.into_usable().is_ok());
    }
}
