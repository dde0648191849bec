//! Anthropic Messages API backend.

use crate::model::{
    Backend, ModelError, ModelRequest, ModelResponse, ToolSpec, Usage, argument_from_json,
    argument_to_json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{Message, Role, ToolCall};
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build(self) -> AnthropicBackend {
        AnthropicBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Anthropic API backend. Replies arrive whole; streaming yields one chunk.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(api_key, model)
    }

    fn translate_request(&self, request: ModelRequest<'_>) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: messages_to_api(request.messages),
            system: request.system.map(str::to_string),
            tools: request.tools.iter().map(tool_to_api).collect(),
        }
    }
}

/// Convert history to API messages, pairing tool results with the id of the
/// call just before them and merging consecutive same-role turns.
fn messages_to_api(messages: &[Message]) -> Vec<ApiMessage> {
    let mut api: Vec<ApiMessage> = Vec::new();
    let mut last_call_id = String::new();

    for (index, message) in messages.iter().enumerate() {
        let mut blocks = Vec::new();
        match message.role {
            Role::User => blocks.push(ApiContentBlock::Text {
                text: message.content.clone(),
            }),
            Role::Assistant => {
                if !message.content.is_empty() {
                    blocks.push(ApiContentBlock::Text {
                        text: message.content.clone(),
                    });
                }
                if let Some(call) = &message.tool_call {
                    last_call_id = format!("call_{index}");
                    blocks.push(ApiContentBlock::ToolUse {
                        id: last_call_id.clone(),
                        name: call.name.clone(),
                        input: argument_to_json(&call.argument),
                    });
                }
            }
            Role::Tool => blocks.push(ApiContentBlock::ToolResult {
                tool_use_id: last_call_id.clone(),
                content: message.content.clone(),
            }),
        }

        if blocks.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        match api.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => api.push(ApiMessage {
                role,
                content: blocks,
            }),
        }
    }

    api
}

fn tool_to_api(spec: &ToolSpec) -> ApiTool {
    ApiTool {
        name: spec.name.clone(),
        description: spec.description.clone(),
        input_schema: spec.schema.clone(),
    }
}

fn response_to_message(blocks: Vec<ApiResponseBlock>) -> Message {
    let mut message = Message::assistant("");
    for block in blocks {
        match block {
            ApiResponseBlock::Text { text } => message.content.push_str(&text),
            ApiResponseBlock::ToolUse { name, input } if message.tool_call.is_none() => {
                message.tool_call = Some(ToolCall::new(name, argument_from_json(&input)));
            }
            _ => {}
        }
    }
    message
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({})", self.model)
    }
}

impl Backend for AnthropicBackend {
    async fn infer(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = self.translate_request(request);
        debug!(model = %self.model, messages = api_request.messages.len(), "anthropic messages");

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = api_response
            .usage
            .map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            message: response_to_message(api_response.content),
            usage,
        })
    }
}
