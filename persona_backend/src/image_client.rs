use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::ProviderError;
use crate::http_client::{build_http_client, IMAGE_TIMEOUT};

const PROVIDER: &str = "image provider";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageGenerationParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub image_base64: String,
    pub seed: Option<u64>,
}

/// Image-generation provider seam. Tests substitute a stub.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, params: ImageGenerationParams) -> Result<GeneratedImage, ProviderError>;
}

#[derive(Debug, Serialize)]
struct TextPrompt<'a> {
    text: &'a str,
    weight: f32,
}

#[derive(Debug, Serialize)]
struct TextToImageRequest<'a> {
    text_prompts: Vec<TextPrompt<'a>>,
    cfg_scale: f32,
    width: u32,
    height: u32,
    steps: u32,
    samples: u32,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct TextToImageResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    base64: String,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

/// Client for the Stability text-to-image REST API.
pub struct StabilityClient {
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl StabilityClient {
    pub fn new(api_url: String, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            client: build_http_client(IMAGE_TIMEOUT)?,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.stable_diffusion_api_key.is_none() {
            tracing::warn!("STABLE_DIFFUSION_API_KEY is unset; image generation will be unavailable");
        }
        Self::new(
            settings.image_api_url.clone(),
            settings.stable_diffusion_api_key.clone(),
        )
    }

    /// Hugging Face style ids (`stabilityai/stable-diffusion-2-1`) map to the engine name.
    fn engine_id(model: &str) -> &str {
        model.rsplit('/').next().unwrap_or(model)
    }
}

#[async_trait]
impl ImageProvider for StabilityClient {
    async fn generate(&self, params: ImageGenerationParams) -> Result<GeneratedImage, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ProviderError::MissingApiKey { provider: PROVIDER })?;

        let url = format!(
            "{}/generation/{}/text-to-image",
            self.api_url,
            Self::engine_id(&params.model)
        );

        let mut text_prompts = vec![TextPrompt {
            text: &params.prompt,
            weight: 1.0,
        }];
        if let Some(negative) = params.negative_prompt.as_deref().filter(|n| !n.trim().is_empty()) {
            text_prompts.push(TextPrompt {
                text: negative,
                weight: -1.0,
            });
        }

        let request = TextToImageRequest {
            text_prompts,
            cfg_scale: params.cfg_scale,
            width: params.width,
            height: params.height,
            steps: params.steps,
            samples: 1,
            // 0 asks the provider for a random seed
            seed: params.seed.unwrap_or(0),
        };

        tracing::info!(
            "Generating image: model={} {}x{} steps={}",
            params.model,
            params.width,
            params.height,
            params.steps
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|source| ProviderError::Network {
            provider: PROVIDER,
            source,
        })?;
        parse_artifacts(&body)
    }
}

fn parse_artifacts(body: &str) -> Result<GeneratedImage, ProviderError> {
    let parsed: TextToImageResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

    let artifact = parsed
        .artifacts
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed(PROVIDER, "response contained no artifacts"))?;

    if artifact.finish_reason.as_deref() == Some("ERROR") {
        return Err(ProviderError::malformed(PROVIDER, "generation finished with ERROR"));
    }

    base64::engine::general_purpose::STANDARD
        .decode(&artifact.base64)
        .map_err(|e| ProviderError::malformed(PROVIDER, format!("artifact is not base64: {e}")))?;

    Ok(GeneratedImage {
        image_base64: artifact.base64,
        seed: artifact.seed,
    })
}
