use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use gbridge_core::{BridgeConfig, BridgeEngine, UpstreamClientConfig, WreqChatBackend};
use gbridge_router::bridge_router;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("gbridge failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let config_found = cli.config.exists();
    let mut config = BridgeConfig::load(&cli.config)?;
    config.overlay(cli.overrides());
    init_tracing(&config.server.log_level);

    if !config_found {
        warn!(
            event = "config_missing",
            path = %cli.config.display(),
            "config file not found, using defaults"
        );
    }
    config.validate()?;
    if config.openai_api_key.is_empty() {
        warn!(
            event = "api_key_missing",
            "no backend api key configured; requests go out without authorization"
        );
    }
    info!(
        event = "config_loaded",
        base_url = %config.openai_base_url,
        default_model = %config.default_openai_model,
        mappings = config.model_mapping.len(),
        detailed_logs = config.logging.enable_detailed_logs,
        access_logs = config.logging.enable_access_logs
    );

    let backend = WreqChatBackend::new(UpstreamClientConfig::from_config(&config))?;
    let engine = BridgeEngine::new(
        Arc::new(backend),
        config.model_map(),
        config.logging.enable_detailed_logs,
    );
    let app = bridge_router(Arc::new(engine), config.logging.enable_access_logs);

    let bind = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gbridge={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
