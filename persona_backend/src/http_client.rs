use anyhow::{anyhow, Result};
use std::time::Duration;

/// Chat completion calls give up after this long.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(30);
/// Image generation is slower; allow a full minute.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);
/// Model catalogue listing.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    build_http_client_with_timeout(Some(timeout))
}

pub fn build_http_client_with_timeout(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let allow_system_proxy = std::env::var("PERSONA_ENABLE_SYSTEM_PROXY")
        .map(|value| crate::config::parse_flag(&value))
        .unwrap_or(false);

    if allow_system_proxy {
        // Proxy discovery can panic on some platforms.
        if let Ok(Ok(client)) = std::panic::catch_unwind(|| attempt_build(timeout, false)) {
            return Ok(client);
        }

        tracing::warn!(
            "HTTP client initialization with system proxy discovery failed; retrying with no_proxy"
        );
    }

    match std::panic::catch_unwind(|| attempt_build(timeout, true)) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(error)) => Err(anyhow!(
            "Failed to initialize HTTP client (no_proxy fallback returned error): {}",
            error
        )),
        Err(_) => Err(anyhow!(
            "Failed to initialize HTTP client (no_proxy fallback panicked)"
        )),
    }
}

fn attempt_build(
    timeout: Option<Duration>,
    no_proxy: bool,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
