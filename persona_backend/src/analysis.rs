use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ensure, ApiError, ApiResult};
use crate::image_data::inspect_image_bytes;
use crate::llm_client::{ChatCompletionParams, ChatProvider, Message};
use crate::prompt::{analysis_prompt, ANALYSIS_SYSTEM_LINE};
use crate::store::sanitize_name;

const ANALYSIS_TEMPERATURE: f32 = 0.5;
const ANALYSIS_MAX_TOKENS: u32 = 600;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisRequest {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub content: String,
    pub analysis: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
    pub status: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub saved_path: String,
}

pub struct AnalysisService {
    provider: Arc<dyn ChatProvider>,
    uploads_dir: PathBuf,
    model: String,
}

impl AnalysisService {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        uploads_dir: impl Into<PathBuf>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            uploads_dir: uploads_dir.into(),
            model: model.into(),
        }
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> ApiResult<AnalysisResponse> {
        ensure(!request.content.trim().is_empty(), "content must not be empty")?;

        let completion = self
            .provider
            .complete(ChatCompletionParams {
                model: self.model.clone(),
                messages: vec![
                    Message::system(ANALYSIS_SYSTEM_LINE),
                    Message::user(analysis_prompt(&request.content)),
                ],
                temperature: ANALYSIS_TEMPERATURE,
                max_tokens: ANALYSIS_MAX_TOKENS,
            })
            .await?;

        Ok(AnalysisResponse {
            content: request.content,
            analysis: completion.content.trim().to_string(),
            model: completion.model,
        })
    }

    /// Validate an uploaded image and keep a copy under the uploads directory.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> ApiResult<UploadResponse> {
        let filename = filename.trim();
        ensure(!filename.is_empty(), "No file provided")?;
        ensure(!bytes.is_empty(), "Uploaded file is empty")?;

        let summary = inspect_image_bytes(bytes)
            .map_err(|e| ApiError::validation(format!("{} is not a supported image: {e:#}", filename)))?;

        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", self.uploads_dir))?;
        let saved_path = self
            .uploads_dir
            .join(format!("{}-{}", Uuid::new_v4(), sanitize_name(filename)));
        tokio::fs::write(&saved_path, bytes)
            .await
            .with_context(|| format!("Failed to save upload to {:?}", saved_path))?;

        tracing::info!(
            "Stored upload {} ({}x{} {}) at {:?}",
            filename,
            summary.width,
            summary.height,
            summary.format,
            saved_path
        );

        Ok(UploadResponse {
            filename: filename.to_string(),
            status: "uploaded".to_string(),
            width: summary.width,
            height: summary.height,
            format: summary.format,
            saved_path: saved_path.display().to_string(),
        })
    }
}
