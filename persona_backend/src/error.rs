use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Failure talking to an external AI provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} API key is not configured")]
    MissingApiKey { provider: &'static str },

    #[error("request to {provider} failed: {source}")]
    Network {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned a malformed response: {reason}")]
    Malformed {
        provider: &'static str,
        reason: String,
    },
}

impl ProviderError {
    pub fn malformed(provider: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            reason: reason.into(),
        }
    }
}

/// Error surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Upstream(ProviderError),

    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

pub const UPSTREAM_UNAVAILABLE_MESSAGE: &str =
    "The AI provider is currently unavailable. Please try again later.";

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Validation(message) | ApiError::NotFound(message) => message.clone(),
            ApiError::Upstream(_) => UPSTREAM_UNAVAILABLE_MESSAGE.to_string(),
            ApiError::Internal(error) => format!("An error occurred: {error:#}"),
        }
    }
}

/// Reject early with a validation error when `condition` does not hold.
pub fn ensure(condition: bool, message: impl Into<String>) -> ApiResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ApiError::validation(message))
    }
}

impl From<ProviderError> for ApiError {
    fn from(error: ProviderError) -> Self {
        ApiError::Upstream(error)
    }
}

// Provider failures that travelled through anyhow still count as upstream errors.
impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<ProviderError>() {
            Ok(provider_error) => ApiError::Upstream(provider_error),
            Err(error) => ApiError::Internal(error),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::Validation(error.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream(error) => tracing::error!("Provider call failed: {}", error),
            ApiError::Internal(error) => tracing::error!("Request failed: {:#}", error),
            ApiError::Validation(message) => tracing::debug!("Rejected request: {}", message),
            ApiError::NotFound(message) => tracing::debug!("Not found: {}", message),
        }
        let body = serde_json::json!({ "detail": self.detail() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_inside_anyhow_map_to_upstream() {
        let provider = ProviderError::malformed("OpenRouter", "no choices");
        let wrapped = anyhow::Error::new(provider).context("generating personality");
        let api_error = ApiError::from(wrapped);
        assert_eq!(api_error.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn other_errors_map_to_internal_with_text() {
        let api_error = ApiError::from(anyhow::anyhow!("disk full"));
        assert_eq!(api_error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.detail(), "An error occurred: disk full");
    }

    #[test]
    fn upstream_detail_hides_provider_body() {
        let api_error = ApiError::from(ProviderError::Status {
            provider: "Stability",
            status: 401,
            body: "secret-ish details".to_string(),
        });
        assert_eq!(api_error.detail(), UPSTREAM_UNAVAILABLE_MESSAGE);
    }

    #[test]
    fn ensure_builds_validation_errors() {
        assert!(ensure(true, "never").is_ok());
        let err = ensure(false, "temperature must be between 0 and 2").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
