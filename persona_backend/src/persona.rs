use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ensure, ApiError, ApiResult};
use crate::image_data::decode_base64_image;
use crate::personality::{GeneratedPersonality, PersonalityGenerator};
use crate::store::JsonListStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaTraits {
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub communication_style: String,
    #[serde(default)]
    pub knowledge_domain: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl PersonaTraits {
    fn has_system_prompt(&self) -> bool {
        self.system_prompt
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersonaCreateRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub traits: PersonaTraits,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
}

impl PersonaCreateRequest {
    pub fn validate(&self) -> ApiResult<()> {
        ensure(!self.name.trim().is_empty(), "name must not be empty")?;
        ensure(
            !self.description.trim().is_empty(),
            "description must not be empty",
        )?;
        if let Some(image) = self.image_base64.as_deref().filter(|i| !i.trim().is_empty()) {
            decode_base64_image(image)
                .map_err(|e| ApiError::validation(format!("image_base64 is not a valid image: {e:#}")))?;
        }
        Ok(())
    }

    fn object_name(&self) -> Option<&str> {
        self.object_name
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: String,
    pub traits: PersonaTraits,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageAnalysisRequest {
    pub image_base64: String,
    pub object_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ImageAnalysisRequest {
    pub fn validate(&self) -> ApiResult<()> {
        ensure(
            !self.object_name.trim().is_empty(),
            "object_name must not be empty",
        )?;
        decode_base64_image(&self.image_base64)
            .map_err(|e| ApiError::validation(format!("image_base64 is not a valid image: {e:#}")))?;
        Ok(())
    }

    /// The caller's description, or a placeholder naming the object.
    pub fn image_description(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => description.to_string(),
            _ => default_description(self.object_name.trim()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityGenerationResponse {
    pub object_name: String,
    pub system_prompt: String,
    pub saved_path: String,
}

fn default_description(object_name: &str) -> String {
    format!("An image of {}", object_name)
}

pub struct PersonaService {
    personas: JsonListStore<Persona>,
    generator: Arc<PersonalityGenerator>,
}

impl PersonaService {
    pub fn new(personas_dir: impl Into<PathBuf>, generator: Arc<PersonalityGenerator>) -> Self {
        Self {
            personas: JsonListStore::new(personas_dir),
            generator,
        }
    }

    /// Store a new persona. With an object name and no system prompt, a
    /// personality is generated first; if that fails the persona is stored without one.
    pub async fn create(&self, request: PersonaCreateRequest) -> ApiResult<Persona> {
        request.validate()?;

        let mut traits = request.traits.clone();
        if let Some(object_name) = request.object_name() {
            if !traits.has_system_prompt() {
                match self
                    .generator
                    .generate(object_name, &default_description(object_name))
                    .await
                {
                    Ok((personality, _)) => traits.system_prompt = Some(personality.system_prompt),
                    Err(e) => tracing::warn!("Failed to generate personality: {:#}", e),
                }
            }
        }

        let object_name = request.object_name().map(str::to_string);
        let now = Utc::now();
        let persona = Persona {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            description: request.description.trim().to_string(),
            traits,
            image_base64: request.image_base64.filter(|i| !i.trim().is_empty()),
            object_name,
            created_at: now,
            updated_at: now,
        };

        let key = persona.object_name.as_deref().unwrap_or(&persona.name);
        let path = self.personas.append(key, &persona).await?;
        tracing::info!("Created persona {} ({}) in {:?}", persona.id, persona.name, path);
        Ok(persona)
    }

    pub async fn list(&self) -> Result<Vec<Persona>> {
        self.personas.load_all().await
    }

    pub async fn find(&self, id: &str) -> Result<Option<Persona>> {
        Ok(self.list().await?.into_iter().find(|p| p.id == id))
    }

    pub async fn get(&self, id: &str) -> ApiResult<Persona> {
        self.find(id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Persona '{}' not found", id)))
    }

    pub async fn generate_from_image(
        &self,
        request: ImageAnalysisRequest,
    ) -> ApiResult<PersonalityGenerationResponse> {
        request.validate()?;

        let object_name = request.object_name.trim();
        let (personality, saved_path) = self
            .generator
            .generate(object_name, &request.image_description())
            .await?;

        Ok(PersonalityGenerationResponse {
            object_name: object_name.to_string(),
            system_prompt: personality.system_prompt,
            saved_path: saved_path.display().to_string(),
        })
    }

    pub async fn personalities(&self) -> Result<Vec<String>> {
        self.generator.object_names().await
    }

    pub async fn personality(&self, object_name: &str) -> ApiResult<Vec<GeneratedPersonality>> {
        self.generator.stored(object_name).await?.ok_or_else(|| {
            ApiError::not_found(format!("No personality stored for '{}'", object_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_data::tiny_png_base64;
    use crate::testing::StubChatProvider;
    use axum::http::StatusCode;

    fn service(dir: &std::path::Path, provider: Arc<StubChatProvider>) -> PersonaService {
        let generator = Arc::new(PersonalityGenerator::new(
            provider,
            dir.join("personalities"),
            "z-ai/glm-4.5-air:free",
        ));
        PersonaService::new(dir.join("personas"), generator)
    }

    fn request(name: &str, object_name: Option<&str>) -> PersonaCreateRequest {
        PersonaCreateRequest {
            name: name.to_string(),
            description: "Lives on the desk".to_string(),
            traits: PersonaTraits::default(),
            image_base64: None,
            object_name: object_name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn create_generates_system_prompt_for_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(StubChatProvider::replying("  You are a proud stapler.  "));
        let service = service(dir.path(), provider.clone());

        let persona = service
            .create(request("Staply", Some("Stapler")))
            .await
            .expect("create");
        assert_eq!(persona.traits.system_prompt.as_deref(), Some("You are a proud stapler."));
        assert!(dir.path().join("personas/stapler.json").exists());
        assert!(dir.path().join("personalities/stapler.json").exists());

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].temperature, 0.8);
        assert_eq!(calls[0].max_tokens, 500);
        assert!(calls[0].messages[1].content.contains("An image of Stapler"));
    }

    #[tokio::test]
    async fn create_tolerates_generation_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path(), Arc::new(StubChatProvider::failing()));

        let persona = service
            .create(request("Lampy", Some("lamp")))
            .await
            .expect("create despite provider failure");
        assert!(persona.traits.system_prompt.is_none());
        assert_eq!(service.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn existing_system_prompt_skips_generation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(StubChatProvider::replying("unused"));
        let service = service(dir.path(), provider.clone());

        let mut req = request("Kettle", Some("kettle"));
        req.traits.system_prompt = Some("You are a kettle.".to_string());
        service.create(req).await.expect("create");
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn same_object_twice_appends_and_get_finds_each() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path(), Arc::new(StubChatProvider::replying("You are a mug.")));

        let first = service.create(request("Mug A", Some("Mug"))).await.expect("first");
        let second = service.create(request("Mug B", Some("mug"))).await.expect("second");

        let listed = service.list().await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(service.get(&first.id).await.expect("get").name, "Mug A");
        assert_eq!(service.get(&second.id).await.expect("get").name, "Mug B");

        let missing = service.get("nope").await.unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn padded_object_name_is_trimmed_for_record_and_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path(), Arc::new(StubChatProvider::replying("You are a mug.")));

        let persona = service
            .create(request("Muggsy", Some("  Mug ")))
            .await
            .expect("create");
        assert_eq!(persona.object_name.as_deref(), Some("Mug"));
        assert!(dir.path().join("personas/mug.json").exists());
        assert!(dir.path().join("personalities/mug.json").exists());
        assert_eq!(
            service.personalities().await.expect("personalities"),
            vec!["mug".to_string()]
        );
        assert_eq!(service.list().await.expect("list").len(), 1);
        assert!(!dir.path().join("personas/_mug_.json").exists());
    }

    #[tokio::test]
    async fn invalid_image_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(StubChatProvider::replying("unused"));
        let service = service(dir.path(), provider.clone());

        let err = service
            .generate_from_image(ImageAnalysisRequest {
                image_base64: "definitely-not-an-image".to_string(),
                object_name: "vase".to_string(),
                description: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn generate_from_image_reports_saved_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path(), Arc::new(StubChatProvider::replying("You are a vase.")));

        let response = service
            .generate_from_image(ImageAnalysisRequest {
                image_base64: tiny_png_base64(),
                object_name: "Blue Vase".to_string(),
                description: Some("A tall blue vase".to_string()),
            })
            .await
            .expect("generate");
        assert_eq!(response.system_prompt, "You are a vase.");
        assert!(response.saved_path.ends_with("blue_vase.json"));

        let stored = service.personality("blue vase").await.expect("stored");
        assert_eq!(stored[0].description, "A tall blue vase");
        assert_eq!(service.personalities().await.expect("names"), vec!["blue_vase".to_string()]);
    }
}
