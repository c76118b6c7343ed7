use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{ensure, ApiResult};
use crate::image_client::{ImageGenerationParams, ImageProvider};

// Accepted generation parameters. The settings page and image panel use the same bounds.
pub const DIMENSION_STEP: u32 = 64;
pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 2048;
pub const MIN_STEPS: u32 = 10;
pub const MAX_STEPS: u32 = 150;
pub const MIN_CFG_SCALE: f32 = 0.0;
pub const MAX_CFG_SCALE: f32 = 35.0;

fn default_return_image() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub cfg_scale: Option<f32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_return_image")]
    pub return_image: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub negative_prompt: Option<String>,
    pub steps: u32,
    pub cfg_scale: f32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub prompt: String,
    pub model: String,
    pub parameters: GenerationParameters,
    pub image_base64: Option<String>,
    pub seed: Option<u64>,
}

fn check_dimension(name: &str, value: u32) -> ApiResult<()> {
    ensure(
        (MIN_DIMENSION..=MAX_DIMENSION).contains(&value) && value % DIMENSION_STEP == 0,
        format!(
            "{} must be a multiple of {} between {} and {}",
            name, DIMENSION_STEP, MIN_DIMENSION, MAX_DIMENSION
        ),
    )
}

pub struct GenerationService {
    provider: Arc<dyn ImageProvider>,
    settings: Arc<Settings>,
}

impl GenerationService {
    pub fn new(provider: Arc<dyn ImageProvider>, settings: Arc<Settings>) -> Self {
        Self { provider, settings }
    }

    /// Fill unset fields from settings and check every value before any provider call.
    pub fn resolve(&self, request: &GenerationRequest) -> ApiResult<ImageGenerationParams> {
        ensure(!request.prompt.trim().is_empty(), "prompt must not be empty")?;

        let width = request.width.unwrap_or(self.settings.default_sd_width);
        let height = request.height.unwrap_or(self.settings.default_sd_height);
        check_dimension("width", width)?;
        check_dimension("height", height)?;

        let steps = request.steps.unwrap_or(self.settings.default_sd_steps);
        ensure(
            (MIN_STEPS..=MAX_STEPS).contains(&steps),
            format!("steps must be between {} and {}", MIN_STEPS, MAX_STEPS),
        )?;

        let cfg_scale = request.cfg_scale.unwrap_or(self.settings.default_sd_cfg_scale);
        ensure(
            (MIN_CFG_SCALE..=MAX_CFG_SCALE).contains(&cfg_scale),
            format!("cfg_scale must be between {} and {}", MIN_CFG_SCALE, MAX_CFG_SCALE),
        )?;

        let seed = match request.seed {
            Some(seed) => {
                ensure(seed >= 0, "seed must not be negative")?;
                Some(seed as u64)
            }
            None => None,
        };

        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.settings.default_image_model.as_str())
            .to_string();

        Ok(ImageGenerationParams {
            prompt: request.prompt.trim().to_string(),
            negative_prompt: request
                .negative_prompt
                .clone()
                .filter(|n| !n.trim().is_empty()),
            model,
            steps,
            cfg_scale,
            width,
            height,
            seed,
        })
    }

    pub async fn generate(&self, request: GenerationRequest) -> ApiResult<GenerationResponse> {
        let params = self.resolve(&request)?;
        let parameters = GenerationParameters {
            negative_prompt: params.negative_prompt.clone(),
            steps: params.steps,
            cfg_scale: params.cfg_scale,
            width: params.width,
            height: params.height,
        };
        let prompt = params.prompt.clone();
        let model = params.model.clone();
        let requested_seed = params.seed;

        let image = self.provider.generate(params).await?;

        Ok(GenerationResponse {
            prompt,
            model,
            parameters,
            image_base64: request.return_image.then_some(image.image_base64),
            seed: image.seed.or(requested_seed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubImageProvider;

    fn request(prompt: &str) -> GenerationRequest {
        serde_json::from_value(serde_json::json!({ "prompt": prompt })).expect("request")
    }

    fn service() -> (Arc<StubImageProvider>, GenerationService) {
        let provider = Arc::new(StubImageProvider::default());
        let service = GenerationService::new(provider.clone(), Arc::new(Settings::default()));
        (provider, service)
    }

    #[test]
    fn defaults_come_from_settings() {
        let (_, service) = service();
        let req = request("a red fox");
        assert!(req.return_image);

        let params = service.resolve(&req).expect("resolve");
        assert_eq!((params.width, params.height), (512, 512));
        assert_eq!(params.steps, 30);
        assert_eq!(params.model, "stabilityai/stable-diffusion-2-1");
        assert_eq!(params.seed, None);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let (_, service) = service();
        let cases = [
            serde_json::json!({"prompt": "x", "width": 500}),
            serde_json::json!({"prompt": "x", "height": 4096}),
            serde_json::json!({"prompt": "x", "steps": 5}),
            serde_json::json!({"prompt": "x", "cfg_scale": 40.0}),
            serde_json::json!({"prompt": "x", "seed": -1}),
            serde_json::json!({"prompt": "  "}),
        ];
        for case in cases {
            let req: GenerationRequest = serde_json::from_value(case.clone()).expect("request");
            assert!(service.resolve(&req).is_err(), "accepted {case}");
        }
    }

    #[tokio::test]
    async fn return_image_false_omits_the_payload() {
        let (provider, service) = service();
        let mut req = request("a lighthouse");
        req.return_image = false;
        req.seed = Some(7);

        let response = service.generate(req).await.expect("generate");
        assert!(response.image_base64.is_none());
        assert_eq!(response.seed, Some(7));
        assert_eq!(provider.calls.lock().expect("calls").len(), 1);
    }
}
