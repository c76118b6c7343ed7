use std::sync::Arc;

use anyhow::{Context, Result};

use crate::analysis::AnalysisService;
use crate::chat::ChatService;
use crate::config::Settings;
use crate::conversation::{build_conversation_store, ConversationStore};
use crate::generation::GenerationService;
use crate::image_client::{ImageProvider, StabilityClient};
use crate::llm_client::{ChatProvider, LlmClient};
use crate::models::ModelCatalog;
use crate::persona::PersonaService;
use crate::personality::PersonalityGenerator;

/// Everything the HTTP layer needs, wired from one `Settings` value.
pub struct BackendRuntime {
    pub settings: Arc<Settings>,
    pub chat: Arc<ChatService>,
    pub personas: Arc<PersonaService>,
    pub generation: Arc<GenerationService>,
    pub analysis: Arc<AnalysisService>,
    pub models: Arc<ModelCatalog>,
}

pub struct BackendRuntimeBuilder {
    settings: Settings,
    chat_provider: Option<Arc<dyn ChatProvider>>,
    image_provider: Option<Arc<dyn ImageProvider>>,
    conversations: Option<Arc<dyn ConversationStore>>,
}

impl BackendRuntimeBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            chat_provider: None,
            image_provider: None,
            conversations: None,
        }
    }

    pub fn with_chat_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.chat_provider = Some(provider);
        self
    }

    pub fn with_image_provider(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.image_provider = Some(provider);
        self
    }

    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let settings = Arc::new(self.settings);

        let chat_provider: Arc<dyn ChatProvider> = match self.chat_provider {
            Some(provider) => provider,
            None => Arc::new(
                LlmClient::from_settings(&settings).context("Failed to build chat provider client")?,
            ),
        };
        let image_provider: Arc<dyn ImageProvider> = match self.image_provider {
            Some(provider) => provider,
            None => Arc::new(
                StabilityClient::from_settings(&settings)
                    .context("Failed to build image provider client")?,
            ),
        };
        let conversations = self
            .conversations
            .unwrap_or_else(|| build_conversation_store(&settings));

        let generator = Arc::new(PersonalityGenerator::new(
            chat_provider.clone(),
            settings.personalities_dir(),
            settings.personality_model.clone(),
        ));
        let personas = Arc::new(PersonaService::new(settings.personas_dir(), generator));
        let chat = Arc::new(ChatService::new(
            chat_provider.clone(),
            conversations,
            personas.clone(),
            settings.default_chat_model.clone(),
        ));
        let generation = Arc::new(GenerationService::new(image_provider, settings.clone()));
        let analysis = Arc::new(AnalysisService::new(
            chat_provider.clone(),
            settings.uploads_dir(),
            settings.default_chat_model.clone(),
        ));
        let models = Arc::new(ModelCatalog::new(chat_provider));

        tracing::info!(
            "Backend ready: chat model {}, image model {}, data under {:?}",
            settings.default_chat_model,
            settings.default_image_model,
            settings.data_path()
        );

        Ok(BackendRuntime {
            settings,
            chat,
            personas,
            generation,
            analysis,
            models,
        })
    }
}

impl BackendRuntime {
    pub fn bootstrap(settings: Settings) -> Result<Self> {
        BackendRuntimeBuilder::new(settings).build()
    }
}
