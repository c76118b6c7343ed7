use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::ProviderError;
use crate::http_client::{build_http_client, CATALOG_TIMEOUT, CHAT_TIMEOUT};

const PROVIDER: &str = "chat provider";

/// Sent as `HTTP-Referer` / `X-Title` so OpenRouter can attribute traffic.
pub const APP_REFERER: &str = "http://localhost:3000";
pub const APP_TITLE: &str = "AI Persona Generator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletionParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub tokens_used: u32,
    pub finish_reason: String,
}

/// A model entry as listed by the provider's `/models` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub architecture: ModelArchitecture,
    #[serde(default)]
    pub pricing: ModelPricing,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelArchitecture {
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub completion: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Chat-completion provider seam. Tests substitute a stub.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, params: ChatCompletionParams) -> Result<ChatCompletion, ProviderError>;

    async fn list_models(&self) -> Result<Vec<ProviderModel>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ProviderModel>,
}

/// OpenAI-format client (OpenRouter by default; any compatible server works).
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: Option<String>,
    chat_http: reqwest::Client,
    catalog_http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            chat_http: build_http_client(CHAT_TIMEOUT)?,
            catalog_http: build_http_client(CATALOG_TIMEOUT)?,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.openrouter_api_key.is_none() {
            tracing::warn!("OPENROUTER_API_KEY is unset; chat requests will be sent without credentials");
        }
        Self::new(
            settings.chat_api_url.clone(),
            settings.openrouter_api_key.clone(),
        )
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        // Local OpenAI-compatible servers don't need a key.
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }
}

#[async_trait]
impl ChatProvider for LlmClient {
    async fn complete(&self, params: ChatCompletionParams) -> Result<ChatCompletion, ProviderError> {
        let url = format!("{}/chat/completions", self.api_url);
        let request = ChatCompletionRequest {
            model: &params.model,
            messages: &params.messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        tracing::debug!(
            "Sending chat completion: model={} messages={}",
            params.model,
            params.messages.len()
        );

        let response = self
            .authorize(self.chat_http.post(&url))
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
            .json(&request)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: PROVIDER,
                source,
            })?;

        let body = read_success_body(response).await?;
        parse_completion(&body, &params.model)
    }

    async fn list_models(&self) -> Result<Vec<ProviderModel>, ProviderError> {
        let url = format!("{}/models", self.api_url);
        let response = self
            .authorize(self.catalog_http.get(&url))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: PROVIDER,
                source,
            })?;

        let body = read_success_body(response).await?;
        let listing: ModelListResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::malformed(PROVIDER, format!("model list: {e}")))?;
        Ok(listing.data)
    }
}

async fn read_success_body(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read body".to_string());
        return Err(ProviderError::Status {
            provider: PROVIDER,
            status: status.as_u16(),
            body,
        });
    }

    response.text().await.map_err(|source| ProviderError::Network {
        provider: PROVIDER,
        source,
    })
}

/// Map a raw completion body onto [`ChatCompletion`].
fn parse_completion(body: &str, requested_model: &str) -> Result<ChatCompletion, ProviderError> {
    let completion: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::malformed(
            PROVIDER,
            format!(
                "{e}; body preview: {}",
                body.chars().take(300).collect::<String>()
            ),
        )
    })?;

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed(PROVIDER, "response contained no choices"))?;
    let content = choice
        .message
        .content
        .ok_or_else(|| ProviderError::malformed(PROVIDER, "first choice has no content"))?;

    Ok(ChatCompletion {
        content,
        model: completion
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| requested_model.to_string()),
        tokens_used: completion.usage.map(|u| u.total_tokens).unwrap_or(0),
        finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completion_with_usage_and_finish_reason() {
        let body = r#"{
            "id": "gen-1",
            "model": "openai/gpt-4",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Meow."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let completion = parse_completion(body, "gpt-4").expect("parse");
        assert_eq!(completion.content, "Meow.");
        assert_eq!(completion.model, "openai/gpt-4");
        assert_eq!(completion.tokens_used, 15);
        assert_eq!(completion.finish_reason, "stop");
    }

    #[test]
    fn missing_usage_and_model_fall_back() {
        let body = r#"{"choices": [{"message": {"content": "hi"}}]}"#;
        let completion = parse_completion(body, "gpt-4").expect("parse");
        assert_eq!(completion.model, "gpt-4");
        assert_eq!(completion.tokens_used, 0);
        assert_eq!(completion.finish_reason, "unknown");
    }

    #[test]
    fn empty_choices_is_malformed() {
        let err = parse_completion(r#"{"choices": []}"#, "gpt-4").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));

        let err = parse_completion("<html>bad gateway</html>", "gpt-4").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(Message::assistant("ok")).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }
}
