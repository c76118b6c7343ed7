use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analysis::{AnalysisRequest, AnalysisResponse, AnalysisService, UploadResponse};
use crate::chat::{ChatRequest, ChatResponse, ChatService};
use crate::config::Settings;
use crate::error::{ApiError, ApiResult};
use crate::generation::{GenerationRequest, GenerationResponse, GenerationService};
use crate::llm_client::Message;
use crate::models::{ModelCatalog, ModelInfo};
use crate::persona::{
    ImageAnalysisRequest, Persona, PersonaCreateRequest, PersonaService,
    PersonalityGenerationResponse,
};
use crate::personality::GeneratedPersonality;
use crate::runtime::BackendRuntime;

/// Base64 images travel inside JSON bodies.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct ServerState {
    pub chat: Arc<ChatService>,
    pub personas: Arc<PersonaService>,
    pub generation: Arc<GenerationService>,
    pub analysis: Arc<AnalysisService>,
    pub models: Arc<ModelCatalog>,
}

impl From<&BackendRuntime> for ServerState {
    fn from(runtime: &BackendRuntime) -> Self {
        Self {
            chat: runtime.chat.clone(),
            personas: runtime.personas.clone(),
            generation: runtime.generation.clone(),
            analysis: runtime.analysis.clone(),
            models: runtime.models.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    cleared: bool,
}

pub async fn serve_backend(runtime: BackendRuntime) -> Result<()> {
    let bind_addr = runtime.settings.bind_addr()?;
    let app = build_router(&runtime.settings, ServerState::from(&runtime));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!(
        "Persona backend listening on http://{}{}",
        bind_addr,
        runtime.settings.normalized_prefix()
    );
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

pub fn build_router(settings: &Settings, state: ServerState) -> Router {
    let chat = Router::new()
        .route("/send", post(send_message))
        .route(
            "/history/:conversation_id",
            get(get_history).delete(clear_history),
        );

    let persona = Router::new()
        .route("/create", post(create_persona))
        .route("/list", get(list_personas))
        .route("/generate-from-image", post(generate_from_image))
        .route("/personalities", get(list_personalities))
        .route("/personalities/:object_name", get(get_personality))
        .route("/models/free-with-images", get(list_image_models))
        .route("/:id", get(get_persona));

    let generation = Router::new().route("/generate", post(generate_image));

    let analyze = Router::new()
        .route("/analyze", post(analyze_content))
        .route("/upload", post(upload_file));

    let api = Router::new()
        .nest("/chat", chat)
        .nest("/persona", persona)
        .nest("/generation", generation)
        .nest("/analyze", analyze);

    let prefix = settings.normalized_prefix();
    let api = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    };

    Router::new()
        .route("/", get(root))
        .merge(api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(settings))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings.cors_origins();
    let methods = settings.cors_methods();
    let headers = settings.cors_headers();
    let is_any = |list: &[String]| list.iter().any(|item| item == "*");

    let allow_origin = if is_any(&origins) {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| parse_logged::<HeaderValue>(o, "origin")))
    };
    let allow_methods = if is_any(&methods) {
        AllowMethods::any()
    } else {
        AllowMethods::list(methods.iter().filter_map(|m| parse_logged::<Method>(m, "method")))
    };
    let allow_headers = if is_any(&headers) {
        AllowHeaders::any()
    } else {
        AllowHeaders::list(headers.iter().filter_map(|h| parse_logged::<HeaderName>(h, "header")))
    };

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers(allow_headers);

    // Credentials cannot be combined with wildcards.
    if is_any(&origins) || is_any(&methods) || is_any(&headers) {
        layer
    } else {
        layer.allow_credentials(true)
    }
}

fn parse_logged<T: std::str::FromStr>(raw: &str, what: &str) -> Option<T> {
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid CORS {} '{}'", what, raw);
            None
        }
    }
}

async fn root() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "API is running",
    })
}

async fn send_message(
    State(state): State<ServerState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(request) = body?;
    state.chat.send(request).await.map(Json)
}

async fn get_history(
    State(state): State<ServerState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    state.chat.history(&conversation_id).await.map(Json)
}

async fn clear_history(
    State(state): State<ServerState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<ClearResponse>> {
    let cleared = state.chat.clear(&conversation_id).await?;
    Ok(Json(ClearResponse { cleared }))
}

async fn create_persona(
    State(state): State<ServerState>,
    body: Result<Json<PersonaCreateRequest>, JsonRejection>,
) -> ApiResult<Json<Persona>> {
    let Json(request) = body?;
    state.personas.create(request).await.map(Json)
}

async fn list_personas(State(state): State<ServerState>) -> ApiResult<Json<Vec<Persona>>> {
    Ok(Json(state.personas.list().await?))
}

async fn get_persona(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Persona>> {
    state.personas.get(&id).await.map(Json)
}

async fn generate_from_image(
    State(state): State<ServerState>,
    body: Result<Json<ImageAnalysisRequest>, JsonRejection>,
) -> ApiResult<Json<PersonalityGenerationResponse>> {
    let Json(request) = body?;
    state.personas.generate_from_image(request).await.map(Json)
}

async fn list_personalities(State(state): State<ServerState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.personas.personalities().await?))
}

async fn get_personality(
    State(state): State<ServerState>,
    Path(object_name): Path<String>,
) -> ApiResult<Json<Vec<GeneratedPersonality>>> {
    state.personas.personality(&object_name).await.map(Json)
}

async fn list_image_models(State(state): State<ServerState>) -> Json<Vec<ModelInfo>> {
    Json(state.models.free_models_with_image_support().await)
}

async fn generate_image(
    State(state): State<ServerState>,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> ApiResult<Json<GenerationResponse>> {
    let Json(request) = body?;
    state.generation.generate(request).await.map(Json)
}

async fn analyze_content(
    State(state): State<ServerState>,
    body: Result<Json<AnalysisRequest>, JsonRejection>,
) -> ApiResult<Json<AnalysisResponse>> {
    let Json(request) = body?;
    state.analysis.analyze(request).await.map(Json)
}

async fn upload_file(
    State(state): State<ServerState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        return state.analysis.upload(&filename, &bytes).await.map(Json);
    }
    Err(ApiError::validation("No file provided"))
}
