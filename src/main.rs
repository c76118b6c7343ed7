mod api;
mod ui;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use eframe::egui;
use tracing_subscriber::EnvFilter;

use persona_backend::config::Settings;
use persona_backend::runtime::BackendRuntime;
use persona_backend::server::serve_backend;

use api::ApiClient;
use ui::app::PersonaApp;

/// Persona studio: starts the local API backend and opens the desktop UI.
#[derive(Debug, Parser)]
#[command(name = "persona_studio", version)]
struct Cli {
    /// Run only the HTTP backend in the foreground.
    #[arg(long, conflicts_with = "no_backend")]
    backend_only: bool,

    /// Open the UI against an already running backend.
    #[arg(long)]
    no_backend: bool,

    /// Wait this long after starting the backend before opening the UI.
    #[arg(long, default_value_t = 2000)]
    startup_delay_ms: u64,

    /// Environment file read at startup and written by the settings window.
    #[arg(long, env = "PERSONA_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_loaded = cli.env_file.exists() && dotenvy::from_path(&cli.env_file).is_ok();
    let (settings, load_warnings) = Settings::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.default_log_filter("persona_studio"))),
        )
        .init();

    for warning in load_warnings {
        tracing::warn!("{}", warning);
    }

    if !env_loaded {
        tracing::info!("No env file at {}, using defaults", cli.env_file.display());
    }
    if settings.openrouter_api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY is not set; chat and persona generation will fail");
    }

    tracing::info!("Persona studio starting...");
    tracing::info!("Backend API: {}", settings.backend_url());

    if cli.backend_only {
        return run_backend(settings);
    }

    if !cli.no_backend {
        let backend_settings = settings.clone();
        std::thread::Builder::new()
            .name("persona-backend".to_string())
            .spawn(move || {
                if let Err(e) = run_backend(backend_settings) {
                    tracing::error!("Backend stopped: {:#}", e);
                }
            })
            .context("failed to spawn backend thread")?;

        std::thread::sleep(Duration::from_millis(cli.startup_delay_ms));
    }

    let api_client = ApiClient::from_settings(&settings);
    tracing::info!("UI talking to {}", api_client.base_url());
    let env_path = cli.env_file;

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_title("AI Persona Generator"),
        ..Default::default()
    };

    eframe::run_native(
        "AI Persona Generator",
        native_options,
        Box::new(move |cc| {
            let app = PersonaApp::new(cc, api_client, settings, env_path)?;
            Ok(Box::new(app))
        }),
    )
    .map_err(|e| anyhow!("UI error: {}", e))
}

fn run_backend(settings: Settings) -> Result<()> {
    let backend = BackendRuntime::bootstrap(settings)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start backend runtime")?;
    runtime.block_on(serve_backend(backend))
}
