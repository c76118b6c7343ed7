use anyhow::{Context, Result};
use persona_backend::config::Settings;
use persona_backend::runtime::BackendRuntime;
use persona_backend::server::serve_backend;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // A missing .env is fine; real env vars still apply.
    let dotenv_path = dotenvy::dotenv().ok();

    let (settings, load_warnings) = Settings::load();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.default_log_filter("persona_backend"))),
        )
        .init();

    for warning in load_warnings {
        tracing::warn!("{}", warning);
    }

    if let Some(path) = dotenv_path {
        tracing::info!("Loaded environment from {:?}", path);
    }

    let runtime =
        BackendRuntime::bootstrap(settings).context("failed to bootstrap backend runtime")?;

    tracing::info!("Starting standalone persona backend");

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime))
}
