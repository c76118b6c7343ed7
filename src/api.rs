use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use persona_backend::analysis::{AnalysisRequest, AnalysisResponse, UploadResponse};
use persona_backend::chat::{ChatRequest, ChatResponse};
use persona_backend::config::Settings;
use persona_backend::generation::{GenerationRequest, GenerationResponse};
use persona_backend::llm_client::Message;
use persona_backend::models::ModelInfo;
use persona_backend::persona::{
    ImageAnalysisRequest, Persona, PersonaCreateRequest, PersonalityGenerationResponse,
};
use persona_backend::personality::GeneratedPersonality;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ClearResponse {
    cleared: bool,
}

/// HTTP client for the persona backend. Every method maps to one route.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    root_url: String,
    api_url: String,
}

impl ApiClient {
    pub fn from_settings(settings: &Settings) -> Self {
        let api_url = settings.backend_url();
        let prefix = settings.normalized_prefix();
        let root_url = api_url
            .strip_suffix(prefix.as_str())
            .unwrap_or(&api_url)
            .to_string();
        Self::new(root_url, &prefix)
    }

    pub fn new(root_url: String, api_prefix: &str) -> Self {
        let root_url = normalize_base_url(&root_url);
        let prefix = api_prefix.trim().trim_matches('/');
        let api_url = if prefix.is_empty() {
            root_url.clone()
        } else {
            format!("{}/{}", root_url, prefix)
        };

        Self {
            http: reqwest::Client::new(),
            root_url,
            api_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.api_url
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .http
            .get(format!("{}/", self.root_url))
            .send()
            .await
            .context("Backend is not reachable")?;
        decode(response, "GET /").await
    }

    pub async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.post_json("/chat/send", request).await
    }

    pub async fn chat_history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!("/chat/history/{}", conversation_id))
            .await
    }

    pub async fn clear_history(&self, conversation_id: &str) -> Result<bool> {
        let path = format!("/chat/history/{}", conversation_id);
        let response = self
            .http
            .delete(self.url(&path))
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", path))?;
        let cleared: ClearResponse = decode(response, &format!("DELETE {}", path)).await?;
        Ok(cleared.cleared)
    }

    pub async fn create_persona(&self, request: &PersonaCreateRequest) -> Result<Persona> {
        self.post_json("/persona/create", request).await
    }

    pub async fn list_personas(&self) -> Result<Vec<Persona>> {
        self.get_json("/persona/list").await
    }

    pub async fn get_persona(&self, id: &str) -> Result<Persona> {
        self.get_json(&format!("/persona/{}", id)).await
    }

    pub async fn generate_from_image(
        &self,
        request: &ImageAnalysisRequest,
    ) -> Result<PersonalityGenerationResponse> {
        self.post_json("/persona/generate-from-image", request).await
    }

    pub async fn list_personalities(&self) -> Result<Vec<String>> {
        self.get_json("/persona/personalities").await
    }

    pub async fn personality(&self, object_name: &str) -> Result<Vec<GeneratedPersonality>> {
        self.get_json(&format!("/persona/personalities/{}", object_name))
            .await
    }

    pub async fn image_models(&self) -> Result<Vec<ModelInfo>> {
        self.get_json("/persona/models/free-with-images").await
    }

    pub async fn generate_image(&self, request: &GenerationRequest) -> Result<GenerationResponse> {
        self.post_json("/generation/generate", request).await
    }

    pub async fn analyze(&self, content: &str) -> Result<AnalysisResponse> {
        self.post_json(
            "/analyze/analyze",
            &AnalysisRequest {
                content: content.to_string(),
            },
        )
        .await
    }

    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<UploadResponse> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.url("/analyze/upload"))
            .multipart(form)
            .send()
            .await
            .context("POST /analyze/upload failed")?;
        decode(response, "POST /analyze/upload").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;
        decode(response, &format!("GET {}", path)).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;
        decode(response, &format!("POST {}", path)).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read {} response", what))?;

    if !status.is_success() {
        return Err(anyhow!(
            "{} returned {}: {}",
            what,
            status.as_u16(),
            error_detail(&body)
        ));
    }

    serde_json::from_str::<T>(&body).with_context(|| {
        format!(
            "Failed to decode {} response. Payload preview: {}",
            what,
            body.chars().take(300).collect::<String>()
        )
    })
}

/// Pull the `detail` message out of a backend error body, falling back to the raw text.
pub fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").map(|d| match d.as_str() {
            Some(text) => text.to_string(),
            None => d.to_string(),
        }))
        .unwrap_or_else(|| body.trim().chars().take(300).collect())
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "http://127.0.0.1:8000".to_string()
    } else {
        trimmed.to_string()
    }
}
