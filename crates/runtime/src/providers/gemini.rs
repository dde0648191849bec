//! Google Gemini backend.

use super::sse;
use crate::model::{
    Backend, ChunkStream, ModelChunk, ModelError, ModelRequest, ModelResponse, ToolSpec, Usage,
    argument_from_json, argument_to_json,
};
use futures::StreamExt;
use futures::future;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use storage::{Message, Role, ToolCall};
use tracing::debug;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        /// Set on reasoning parts from thinking models.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    Other(Value),
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a Gemini backend.
#[derive(Debug, Clone)]
pub struct GeminiBackendBuilder {
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl GeminiBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 4096,
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Point the backend at a different API root (proxies, gateways).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> Result<GeminiBackend, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ModelError::Config(format!("http client: {e}")))?;

        Ok(GeminiBackend {
            client,
            api_key: self.api_key,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            base_url: self.base_url,
        })
    }
}

/// Google Gemini API backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl GeminiBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> GeminiBackendBuilder {
        GeminiBackendBuilder::new(api_key, model)
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{method}",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn translate_request(&self, request: ModelRequest<'_>) -> GeminiRequest {
        let mut contents: Vec<GeminiContent> = Vec::new();

        for message in request.messages {
            let (role, parts) = message_to_api(message);
            if parts.is_empty() {
                continue;
            }
            // Consecutive turns from one side are merged into a single content.
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts,
                }),
            }
        }

        let system_instruction = request.system.map(|system| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(system)],
        });

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiTool {
                function_declarations: request.tools.iter().map(tool_to_api).collect(),
            }]
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        }
    }

    async fn post(&self, url: &str, body: &GeminiRequest) -> Result<reqwest::Response, ModelError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Network(format!("request timeout: {e}"))
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GeminiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(ModelError::Api(format!("{status}: {message}")))
    }
}

fn message_to_api(message: &Message) -> (&'static str, Vec<GeminiPart>) {
    let mut parts = Vec::new();
    match message.role {
        Role::User => parts.push(GeminiPart::text(message.content.clone())),
        Role::Assistant => {
            if !message.content.is_empty() {
                parts.push(GeminiPart::text(message.content.clone()));
            }
            if let Some(call) = &message.tool_call {
                parts.push(GeminiPart::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: call.name.clone(),
                        args: argument_to_json(&call.argument),
                    },
                });
            }
        }
        Role::Tool => {
            let name = message
                .tool_call
                .as_ref()
                .map(|call| call.name.clone())
                .unwrap_or_default();
            parts.push(GeminiPart::FunctionResponse {
                function_response: GeminiFunctionResponse {
                    name,
                    response: json!({ "result": message.content }),
                },
            });
        }
    }

    let role = match message.role {
        Role::Assistant => "model",
        Role::User | Role::Tool => "user",
    };
    (role, parts)
}

fn tool_to_api(spec: &ToolSpec) -> GeminiFunctionDeclaration {
    GeminiFunctionDeclaration {
        name: spec.name.clone(),
        description: spec.description.clone(),
        parameters: spec.schema.clone(),
    }
}

/// Text and the first function call of the first candidate.
fn response_chunk(response: GeminiResponse) -> Option<ModelChunk> {
    let candidate = response.candidates.into_iter().next()?;
    let mut chunk = ModelChunk::default();

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            GeminiPart::Text { text, thought } if !thought => chunk.text.push_str(&text),
            GeminiPart::FunctionCall { function_call } if chunk.tool_call.is_none() => {
                chunk.tool_call = Some(ToolCall::new(
                    function_call.name,
                    argument_from_json(&function_call.args),
                ));
            }
            _ => {}
        }
    }

    Some(chunk)
}

impl std::fmt::Display for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gemini({})", self.model)
    }
}

impl Backend for GeminiBackend {
    async fn infer(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.translate_request(request);
        debug!(model = %self.model, messages = body.contents.len(), "gemini generateContent");

        let response = self.post(&self.endpoint("generateContent"), &body).await?;
        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = api_response
            .usage_metadata
            .as_ref()
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        let chunk = response_chunk(api_response)
            .ok_or_else(|| ModelError::InvalidResponse("no candidates in response".into()))?;

        Ok(ModelResponse {
            message: Message {
                role: Role::Assistant,
                content: chunk.text,
                tool_call: chunk.tool_call,
            },
            usage,
        })
    }

    async fn stream(&self, request: ModelRequest<'_>) -> Result<ChunkStream, ModelError> {
        let body = self.translate_request(request);
        debug!(model = %self.model, messages = body.contents.len(), "gemini streamGenerateContent");

        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, &body).await?;

        let chunks = sse::json_events::<GeminiResponse, _, _, _>(response.bytes_stream())
            .filter_map(|event| {
                future::ready(match event {
                    Ok(response) => response_chunk(response)
                        .filter(|chunk| !chunk.is_empty())
                        .map(Ok),
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed();
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GeminiBackend {
        GeminiBackend::builder("test-key", "gemini-2.0-flash")
            .temperature(0.2)
            .build()
            .unwrap()
    }

    #[test]
    fn endpoint_includes_model_and_method() {
        let backend = GeminiBackend::builder("k", "gemini-2.0-flash")
            .base_url("http://localhost:9000/")
            .build()
            .unwrap();
        assert_eq!(
            backend.endpoint("generateContent"),
            "http://localhost:9000/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(backend.to_string(), "gemini(gemini-2.0-flash)");
    }

    #[test]
    fn request_maps_roles_and_tool_turns() {
        let call = ToolCall::new("calculator", "2+2");
        let messages = vec![
            Message::user("what is 2+2"),
            Message::tool_request("", call.clone()),
            Message::tool_result(call, "4"),
        ];
        let tools = vec![ToolSpec::single_input("calculator", "math")];
        let request = backend().translate_request(ModelRequest {
            messages: &messages,
            tools: &tools,
            system: Some("be brief"),
        });

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "what is 2+2");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["name"], "calculator");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["args"]["input"], "2+2");
        assert_eq!(json["contents"][2]["parts"][0]["functionResponse"]["response"]["result"], "4");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(json["tools"][0]["functionDeclarations"][0]["name"], "calculator");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 4096);
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn consecutive_user_turns_are_merged() {
        let messages = vec![Message::user("first"), Message::user("second")];
        let request = backend().translate_request(ModelRequest {
            messages: &messages,
            tools: &[],
            system: None,
        });

        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].parts.len(), 2);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn response_text_and_function_call_are_extracted() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Let me check. "},
                        {"functionCall": {"name": "get_time", "args": {"input": ""}}},
                        {"inlineData": {"mimeType": "image/png", "data": ""}}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 5}
        }))
        .unwrap();

        let chunk = response_chunk(response).unwrap();
        assert_eq!(chunk.text, "Let me check. ");
        assert_eq!(chunk.tool_call, Some(ToolCall::new("get_time", "")));
    }

    #[test]
    fn thought_parts_are_not_part_of_reply() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "The user wants a greeting.", "thought": true},
                        {"text": "Hello!"}
                    ]
                }
            }]
        }))
        .unwrap();

        let chunk = response_chunk(response).unwrap();
        assert_eq!(chunk.text, "Hello!");
        assert!(chunk.tool_call.is_none());
    }

    #[test]
    fn plain_text_parts_serialize_without_thought_flag() {
        let value = serde_json::to_value(GeminiPart::text("hi")).unwrap();
        assert_eq!(value, json!({"text": "hi"}));
    }

    #[test]
    fn response_without_candidates_has_no_chunk() {
        let response: GeminiResponse =
            serde_json::from_value(json!({"usageMetadata": {"promptTokenCount": 3}})).unwrap();
        assert!(response_chunk(response).is_none());
    }
}
