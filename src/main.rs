//! twa-auth runner
//!
//! Starts a Mini App session from the launch URL, keeps it alive in the
//! background, and exits on Ctrl-C.

#![deny(clippy::all)]

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use twa_auth::host::{HostShell, NoopHost, TracingHost};
use twa_auth::navigation::BrowserNavigator;
use twa_auth::storage::{FileStorage, Storage};
use twa_auth::{BackgroundTasks, Config, InitOutcome, Session};

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nSet TWA_BASE_URL to the Mini App origin, e.g.");
            eprintln!("  TWA_BASE_URL=https://app.example.com");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);

    info!("Starting {} v{}", config.app.name, config.app.version);

    if let Err(e) = run(config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn run(config: Config) -> Result<()> {
    let page = launch_url(&config)?;
    let storage = open_storage(&config)?;
    let host = launch_host();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let session = Arc::new(Session::new(
        config,
        storage,
        host,
        Arc::new(BrowserNavigator),
    )?);

    match session.init(&page) {
        InitOutcome::Ready { saved } => info!(saved, "Session ready"),
        InitOutcome::Redirected(redirect) => {
            info!("Launch redirected: {:?}", redirect);
            return Ok(());
        }
    }

    runtime.block_on(async move {
        let tasks = BackgroundTasks::start(Arc::clone(&session));

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;

        info!("Shutting down");
        tasks.stop().await;
        Ok(())
    })
}

/// The launch URL from `TWA_PAGE_URL`, defaulting to the app root.
fn launch_url(config: &Config) -> Result<Url> {
    match env::var("TWA_PAGE_URL") {
        Ok(raw) => Url::parse(&raw).with_context(|| format!("Invalid TWA_PAGE_URL: {}", raw)),
        Err(_) => config
            .base_url()?
            .join(&config.auth.link_prefix)
            .context("Invalid link prefix"),
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let storage = match &config.auth.storage_path {
        Some(path) => FileStorage::new(path),
        None => FileStorage::open_default()?,
    };
    info!("Using storage at {:?}", storage.path());
    Ok(Arc::new(storage))
}

/// Simulate the host when `TWA_INIT_DATA` is provided.
fn launch_host() -> Arc<dyn HostShell> {
    match env::var("TWA_INIT_DATA") {
        Ok(init_data) if !init_data.is_empty() => {
            let platform = env::var("TWA_PLATFORM").unwrap_or_else(|_| "tdesktop".to_string());
            Arc::new(TracingHost::new(Some(init_data), platform))
        }
        _ => Arc::new(NoopHost),
    }
}
