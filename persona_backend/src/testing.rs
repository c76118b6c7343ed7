//! Stub providers for unit and router tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use crate::error::ProviderError;
use crate::image_client::{GeneratedImage, ImageGenerationParams, ImageProvider};
use crate::llm_client::{ChatCompletion, ChatCompletionParams, ChatProvider, ProviderModel};

pub struct StubChatProvider {
    reply: Option<String>,
    models: Vec<ProviderModel>,
    calls: Mutex<Vec<ChatCompletionParams>>,
    barrier: Option<Arc<Barrier>>,
}

impl StubChatProvider {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            models: Vec::new(),
            calls: Mutex::new(Vec::new()),
            barrier: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            models: Vec::new(),
            calls: Mutex::new(Vec::new()),
            barrier: None,
        }
    }

    pub fn with_models(mut self, models: Vec<ProviderModel>) -> Self {
        self.models = models;
        self
    }

    /// Hold each completion until `parties` calls are in flight.
    pub fn with_barrier(mut self, parties: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(parties)));
        self
    }

    pub fn calls(&self) -> Vec<ChatCompletionParams> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ChatProvider for StubChatProvider {
    async fn complete(&self, params: ChatCompletionParams) -> Result<ChatCompletion, ProviderError> {
        let model = params.model.clone();
        self.calls.lock().expect("calls lock").push(params);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        match &self.reply {
            Some(reply) => Ok(ChatCompletion {
                content: reply.clone(),
                model,
                tokens_used: 42,
                finish_reason: "stop".to_string(),
            }),
            None => Err(ProviderError::Status {
                provider: "stub",
                status: 502,
                body: "bad gateway".to_string(),
            }),
        }
    }

    async fn list_models(&self) -> Result<Vec<ProviderModel>, ProviderError> {
        if self.reply.is_none() {
            return Err(ProviderError::malformed("stub", "no models"));
        }
        Ok(self.models.clone())
    }
}

#[derive(Default)]
pub struct StubImageProvider {
    pub calls: Mutex<Vec<ImageGenerationParams>>,
}

#[async_trait]
impl ImageProvider for StubImageProvider {
    async fn generate(&self, params: ImageGenerationParams) -> Result<GeneratedImage, ProviderError> {
        let seed = params.seed;
        self.calls.lock().expect("calls lock").push(params);
        Ok(GeneratedImage {
            image_base64: "aGVsbG8=".to_string(),
            seed: seed.or(Some(1234)),
        })
    }
}
