use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::llm_client::{ChatCompletionParams, ChatProvider, Message};
use crate::prompt::{personality_prompt, PERSONALITY_SYSTEM_LINE};
use crate::store::JsonListStore;

const PERSONALITY_TEMPERATURE: f32 = 0.8;
const PERSONALITY_MAX_TOKENS: u32 = 500;

/// One generated personality as stored in `personalities/<object>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPersonality {
    pub name: String,
    pub system_prompt: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
}

pub struct PersonalityGenerator {
    provider: Arc<dyn ChatProvider>,
    store: JsonListStore<GeneratedPersonality>,
    model: String,
}

impl PersonalityGenerator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        dir: impl Into<PathBuf>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store: JsonListStore::new(dir),
            model: model.into(),
        }
    }

    /// Ask the chat provider for a personality and append it to the object's file.
    pub async fn generate(
        &self,
        object_name: &str,
        image_description: &str,
    ) -> Result<(GeneratedPersonality, PathBuf)> {
        tracing::info!("Generating personality for '{}'", object_name);

        let completion = self
            .provider
            .complete(ChatCompletionParams {
                model: self.model.clone(),
                messages: vec![
                    Message::system(PERSONALITY_SYSTEM_LINE),
                    Message::user(personality_prompt(object_name, image_description)),
                ],
                temperature: PERSONALITY_TEMPERATURE,
                max_tokens: PERSONALITY_MAX_TOKENS,
            })
            .await?;

        let personality = GeneratedPersonality {
            name: object_name.to_string(),
            system_prompt: completion.content.trim().to_string(),
            description: image_description.to_string(),
            created_at: Utc::now(),
            model: self.model.clone(),
        };

        let saved_path = self.store.append(object_name, &personality).await?;
        tracing::info!("Saved personality for '{}' to {:?}", object_name, saved_path);
        Ok((personality, saved_path))
    }

    pub async fn object_names(&self) -> Result<Vec<String>> {
        self.store.list_keys().await
    }

    pub async fn stored(&self, object_name: &str) -> Result<Option<Vec<GeneratedPersonality>>> {
        self.store.load(object_name).await
    }
}
