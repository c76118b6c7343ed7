use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm_client::{ChatProvider, ProviderModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricingInfo {
    pub prompt: String,
    pub completion: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub context_length: Option<u64>,
    pub is_free: bool,
    pub pricing: ModelPricingInfo,
    pub capabilities: ModelCapabilities,
}

/// Lists provider models that accept image input.
pub struct ModelCatalog {
    provider: Arc<dyn ChatProvider>,
}

impl ModelCatalog {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Provider failures degrade to an empty list.
    pub async fn free_models_with_image_support(&self) -> Vec<ModelInfo> {
        match self.provider.list_models().await {
            Ok(models) => image_capable_models(models),
            Err(error) => {
                tracing::error!("Error fetching models from provider: {}", error);
                Vec::new()
            }
        }
    }
}

/// Keep models with `image` among their input modalities; free ones first, then by name.
pub fn image_capable_models(models: Vec<ProviderModel>) -> Vec<ModelInfo> {
    let mut image_models: Vec<ModelInfo> = models
        .into_iter()
        .filter(|model| {
            model
                .architecture
                .input_modalities
                .iter()
                .any(|modality| modality == "image")
        })
        .map(|model| {
            let pricing = &model.pricing;
            let is_free = pricing.prompt.as_deref() == Some("0")
                && pricing.completion.as_deref() == Some("0")
                && pricing.image.as_deref().unwrap_or("0") == "0";

            ModelInfo {
                name: model.name.clone().unwrap_or_else(|| model.id.clone()),
                description: model.description.clone().unwrap_or_default(),
                context_length: model.context_length,
                is_free,
                pricing: ModelPricingInfo {
                    prompt: pricing.prompt.clone().unwrap_or_else(|| "0".to_string()),
                    completion: pricing.completion.clone().unwrap_or_else(|| "0".to_string()),
                    image: pricing.image.clone().unwrap_or_else(|| "0".to_string()),
                },
                capabilities: ModelCapabilities {
                    input_modalities: model.architecture.input_modalities.clone(),
                    output_modalities: model.architecture.output_modalities.clone(),
                },
                id: model.id,
            }
        })
        .collect();

    image_models.sort_by(|a, b| (!a.is_free, &a.name).cmp(&(!b.is_free, &b.name)));
    image_models
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{ModelArchitecture, ModelPricing};

    fn model(id: &str, inputs: &[&str], prompt: Option<&str>, completion: Option<&str>) -> ProviderModel {
        ProviderModel {
            id: id.to_string(),
            name: Some(id.to_uppercase()),
            description: None,
            context_length: Some(8192),
            architecture: ModelArchitecture {
                input_modalities: inputs.iter().map(|s| s.to_string()).collect(),
                output_modalities: vec!["text".to_string()],
            },
            pricing: ModelPricing {
                prompt: prompt.map(str::to_string),
                completion: completion.map(str::to_string),
                image: None,
            },
        }
    }

    #[test]
    fn filters_text_only_models_and_sorts_free_first() {
        let models = vec![
            model("paid-a", &["text", "image"], Some("0.001"), Some("0.002")),
            model("text-only", &["text"], Some("0"), Some("0")),
            model("free-z", &["image", "text"], Some("0"), Some("0")),
            model("free-b", &["image"], Some("0"), Some("0")),
        ];

        let listed = image_capable_models(models);
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["free-b", "free-z", "paid-a"]);
        assert!(listed[0].is_free);
        assert!(!listed[2].is_free);
    }

    #[test]
    fn missing_prompt_price_is_not_free() {
        let listed = image_capable_models(vec![model("mystery", &["image"], None, Some("0"))]);
        assert!(!listed[0].is_free);
        assert_eq!(listed[0].pricing.prompt, "0");
    }
}
