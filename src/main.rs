//! Study Relay server
//!
//! Entry point for the realtime event stream and attachment intake service.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;

use study_relay::{config::AppConfig, server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before anything reads the environment
    let _ = dotenv();

    telemetry::init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    tracing::debug!(name: "config.loaded", address = %config.bind_address(), "Configuration loaded");

    server::start_server(Arc::new(config)).await
}
