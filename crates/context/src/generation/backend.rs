//! Remote inference service client (Responses-style API)

use async_trait::async_trait;
use proposalforge_common::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One role-tagged input turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputTurn {
    pub role: Role,
    pub content: String,
}

/// Schema constraint attached to a call
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

/// A single attempt as sent to the backend
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceCall {
    pub model: String,
    pub input: Vec<InputTurn>,
    pub max_output_tokens: u32,
    pub json_schema: Option<JsonSchemaFormat>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    pub timeout: Duration,
    /// Zero-based attempt number
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Incomplete,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

/// Response body of the inference service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

impl InferenceResponse {
    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Completed,
            output_text: Some(text.into()),
            output: Vec::new(),
        }
    }

    pub fn incomplete(text: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Incomplete,
            output_text: Some(text.into()),
            output: Vec::new(),
        }
    }

    /// Response text: `output_text` when present, else the concatenated
    /// text parts of the output items.
    pub fn text(&self) -> String {
        if let Some(text) = self.output_text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }

        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text" || part.kind == "text")
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}

/// Remote inference service
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Perform one call. Transport and service failures are errors;
    /// truncation is reported through the response status.
    async fn complete(&self, call: &InferenceCall) -> Result<InferenceResponse>;
}

/// Client for an OpenAI Responses-compatible endpoint
pub struct OpenAiResponsesBackend {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiResponsesBackend {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }

    fn request_body(call: &InferenceCall) -> Value {
        let mut body = json!({
            "model": call.model,
            "input": call.input,
            "max_output_tokens": call.max_output_tokens,
        });

        let mut text = serde_json::Map::new();
        if let Some(format) = &call.json_schema {
            text.insert(
                "format".to_string(),
                json!({
                    "type": "json_schema",
                    "name": format.name,
                    "schema": format.schema,
                    "strict": format.strict,
                }),
            );
        }
        if let Some(verbosity) = &call.verbosity {
            text.insert("verbosity".to_string(), json!(verbosity));
        }
        if !text.is_empty() {
            body["text"] = Value::Object(text);
        }
        if let Some(effort) = &call.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }

        body
    }
}

#[async_trait]
impl InferenceBackend for OpenAiResponsesBackend {
    async fn complete(&self, call: &InferenceCall) -> Result<InferenceResponse> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(call.timeout)
            .json(&Self::request_body(call));

        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal {
                message: format!("Inference API error {}: {}", status, body),
            });
        }

        Ok(response.json().await?)
    }
}
