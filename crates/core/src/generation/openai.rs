//! OpenAI-compatible chat-completions generator.
//!
//! One client serves every provider in `LlmProvider`; the model is chosen
//! per role. API keys are read at call time so a missing key fails the
//! stage with `GenerationFailed` instead of aborting start-up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::GenerationError;
use crate::models::ModelConfig;
use crate::roles::RoleId;

use super::{GenerationRequest, Generator};

pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    default_model: ModelConfig,
    per_role: HashMap<RoleId, ModelConfig>,
    api_key_override: Option<String>,
}

impl OpenAiCompatGenerator {
    pub fn new(default_model: ModelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .unwrap_or_default();
        Self {
            client,
            default_model,
            per_role: HashMap::new(),
            api_key_override: None,
        }
    }

    /// Use a specific model for one role
    pub fn with_role_model(mut self, role: RoleId, model: ModelConfig) -> Self {
        self.per_role.insert(role, model);
        self
    }

    /// Use this key instead of the provider's environment variable
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key_override = Some(key.into());
        self
    }

    pub fn model_for(&self, role: &RoleId) -> &ModelConfig {
        self.per_role.get(role).unwrap_or(&self.default_model)
    }

    fn api_key(&self, model: &ModelConfig) -> Result<String, GenerationError> {
        if let Some(key) = &self.api_key_override {
            return Ok(key.clone());
        }
        let var = model.provider.api_key_env();
        std::env::var(var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationError::MissingCredentials(var.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_text(response: ChatCompletionResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let model = self.model_for(&request.role);
        let api_key = self.api_key(model)?;

        tracing::debug!(
            role = %request.role,
            provider = model.provider.display_name(),
            model = %model.model,
            "Calling generation provider"
        );

        let body = ChatCompletionRequest {
            model: &model.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        let response = self
            .client
            .post(model.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(GenerationError::Provider(format!(
                "{} returned HTTP {}: {}",
                model.provider.display_name(),
                status.as_u16(),
                crate::search::truncate(&text, 300)
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Provider(format!("unreadable response: {}", e)))?;

        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmProvider;

    #[test]
    fn test_role_override_wins() {
        let generator = OpenAiCompatGenerator::new(ModelConfig::default()).with_role_model(
            RoleId::new("engineer"),
            ModelConfig::with_provider(LlmProvider::DeepSeek, "deepseek-coder"),
        );
        assert_eq!(generator.model_for(&RoleId::new("engineer")).model, "deepseek-coder");
        assert_eq!(generator.model_for(&RoleId::new("architect")).model, "gpt-4o");
    }

    #[test]
    fn test_extract_text() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Hello"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "Hello");

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(extract_text(empty), Err(GenerationError::EmptyResponse)));

        let blank = r#"{"choices":[{"message":{"content":"   "}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(blank).unwrap();
        assert!(matches!(extract_text(parsed), Err(GenerationError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_missing_key_is_reported_not_panicked() {
        // A provider variable nobody sets in CI
        let model = ModelConfig::with_provider(LlmProvider::Grok, "grok-2")
            .with_base_url("http://127.0.0.1:9");
        let generator = OpenAiCompatGenerator::new(model.clone());
        if std::env::var(model.provider.api_key_env()).is_ok() {
            return;
        }
        let request = GenerationRequest {
            role: RoleId::new("architect"),
            system_prompt: "sys".to_string(),
            prompt: "user".to_string(),
            grounding_count: 0,
        };
        let err = generator.generate(&request).await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingCredentials(ref v) if v == "XAI_API_KEY"));
    }

    fn architect_request() -> GenerationRequest {
        GenerationRequest {
            role: RoleId::new("architect"),
            system_prompt: "You are the architect".to_string(),
            prompt: "Design a todo list".to_string(),
            grounding_count: 2,
        }
    }

    /// Generator pointed at a local stub that answers every completion with `reply`
    async fn stub_generator(status: u16, reply: serde_json::Value) -> OpenAiCompatGenerator {
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::post;
        use axum::Json;

        let handler = move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
            let reply = reply.clone();
            async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer stub-key");
                if !authorized || body["model"] != "stub-model" || body["messages"][0]["role"] != "system" {
                    return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "bad request shape"})));
                }
                (StatusCode::from_u16(status).unwrap(), Json(reply))
            }
        };
        let base = crate::test_support::serve_stub(
            axum::Router::new().route("/v1/chat/completions", post(handler)),
        )
        .await;
        OpenAiCompatGenerator::new(ModelConfig::new("stub-model").with_base_url(format!("{}/v1", base)))
            .with_api_key("stub-key")
    }

    #[tokio::test]
    async fn test_completion_text_is_returned() {
        let generator = stub_generator(
            200,
            serde_json::json!({"choices": [{"message": {"role": "assistant", "content": "Use a single page."}}]}),
        )
        .await;
        assert_eq!(generator.generate(&architect_request()).await.unwrap(), "Use a single page.");
    }

    #[tokio::test]
    async fn test_error_status_is_a_provider_error() {
        let generator = stub_generator(500, serde_json::json!({"error": "overloaded"})).await;
        match generator.generate(&architect_request()).await {
            Err(GenerationError::Provider(message)) => {
                assert!(message.contains("HTTP 500"), "{}", message);
                assert!(message.contains("overloaded"), "{}", message);
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_message_content_is_an_error() {
        let generator = stub_generator(
            200,
            serde_json::json!({"choices": [{"message": {"role": "assistant"}}]}),
        )
        .await;
        assert!(matches!(
            generator.generate(&architect_request()).await,
            Err(GenerationError::EmptyResponse)
        ));

        let generator = stub_generator(200, serde_json::json!({"choices": [{}]})).await;
        assert!(matches!(
            generator.generate(&architect_request()).await,
            Err(GenerationError::Provider(message)) if message.contains("unreadable response")
        ));
    }
}
