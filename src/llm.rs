use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ApiError, ApiResult};

const BASE_URL: &str = "https://api.openai.com/v1";

/// Language-model seam used by the fax stage.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Answer `query` with the web-search tool enabled.
    async fn web_search(&self, query: &str) -> ApiResult<String>;

    /// Plain chat completion at low temperature.
    async fn complete(&self, system: &str, user: &str) -> ApiResult<String>;
}

#[derive(Clone)]
pub struct OpenAi {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        OpenAi {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> ApiResult<Value> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// Concatenate the `output_text` parts of a Responses API payload.
fn response_output_text(payload: &Value) -> String {
    let mut out = String::new();
    let items = payload
        .get("output")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for item in items {
        let parts = item
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
        }
    }
    out
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAi {
    async fn web_search(&self, query: &str) -> ApiResult<String> {
        let body = json!({
            "model": self.model,
            "tools": [{ "type": "web_search_preview", "search_context_size": "low" }],
            "input": query,
        });
        let payload = self.post("/responses", &body).await?;
        let text = response_output_text(&payload);
        debug!(chars = text.len(), "web search answered");
        Ok(text)
    }

    async fn complete(&self, system: &str, user: &str) -> ApiResult<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let payload = self.post("/chat/completions", &body).await?;
        let parsed: ChatResponse =
            serde_json::from_value(payload).map_err(|e| ApiError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ApiError::Parse("chat completion had no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_text_skips_tool_calls() {
        let payload = json!({
            "output": [
                { "type": "web_search_call", "status": "completed" },
                { "type": "message", "content": [
                    { "type": "output_text", "text": "Fax: 514-555-0199. " },
                    { "type": "output_text", "text": "Source: ciusss.ca" }
                ]}
            ]
        });
        assert_eq!(response_output_text(&payload), "Fax: 514-555-0199. Source: ciusss.ca");
        assert_eq!(response_output_text(&json!({})), "");
    }

    #[test]
    fn chat_payload_shape() {
        let parsed: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "role": "assistant", "content": "[\"514-555-0199\"]" } }]
        }))
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("[\"514-555-0199\"]"));
    }
}
