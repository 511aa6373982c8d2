mod api;
mod capture;
mod db;
mod inspector;
mod models;
mod recorder;
mod settings;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use api::AppState;
use capture::{CaptureOrchestrator, DownloadsDir};
use db::Database;
use inspector::{NavigationWatcher, PageSession, HOST_PATTERN};
use recorder::RecorderController;
use settings::SettingsStore;

/// Daemon configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the control API listens on.
    pub bind: String,
    /// WebDriver endpoint used to reach the browser.
    pub webdriver_url: String,
    /// Chrome debugger address to attach to an already-running browser,
    /// passed through to the driver when set.
    pub debugger_address: Option<String>,
    /// Where settings and the recordings index live.
    pub data_dir: PathBuf,
    /// Where captures and recordings are delivered.
    pub download_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var_os("FRAMEGRAB_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|dir| dir.join("framegrab"))
                .context("no platform data directory; set FRAMEGRAB_DATA_DIR")?,
        };

        Ok(Self {
            bind: std::env::var("FRAMEGRAB_BIND").unwrap_or_else(|_| "127.0.0.1:8765".to_string()),
            webdriver_url: std::env::var("FRAMEGRAB_WEBDRIVER")
                .unwrap_or_else(|_| "http://127.0.0.1:9515".to_string()),
            debugger_address: std::env::var("FRAMEGRAB_DEBUGGER_ADDRESS").ok(),
            data_dir,
            download_dir: std::env::var_os("FRAMEGRAB_DOWNLOAD_DIR").map(PathBuf::from),
        })
    }
}

pub async fn run(config: AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

    let database = Database::new(config.data_dir.join("framegrab.sqlite3"))?;

    let settings_path = config.data_dir.join("settings.json");
    let settings = Arc::new(SettingsStore::new(settings_path)?);

    let downloads = match &config.download_dir {
        Some(dir) => DownloadsDir::new(dir.clone()),
        None => DownloadsDir::resolve().unwrap_or_else(|| {
            warn!("no downloads directory found, delivering into the data dir");
            DownloadsDir::new(config.data_dir.join("captures"))
        }),
    };
    let delivery_dir = downloads.path().clone();

    let page = Arc::new(PageSession::new(
        config.webdriver_url.clone(),
        HOST_PATTERN,
        config.debugger_address.clone(),
    ));

    let orchestrator = Arc::new(CaptureOrchestrator::new(
        page.clone(),
        Arc::new(downloads),
        settings.clone(),
    ));

    let recorder = Arc::new(RecorderController::new(
        page.clone(),
        database.clone(),
        delivery_dir,
    ));

    let mut watcher = NavigationWatcher::new();
    let watcher_status = watcher.status();
    watcher.start(page.clone())?;

    let state = AppState {
        orchestrator,
        recorder: recorder.clone(),
        settings,
        db: database,
        watcher: watcher_status,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind control API on {}", config.bind))?;
    info!("control API listening on {}", config.bind);

    let router = api::router(state);
    tokio::select! {
        result = async move { axum::serve(listener, router).await } => {
            result.context("control API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    // Leave no orphaned ffmpeg behind.
    if let Some(active) = recorder.current().await {
        warn!("stopping recording {active} on shutdown");
        if let Err(err) = recorder.stop(Some(active)).await {
            warn!("failed to stop recording {active}: {err:#}");
        }
    }

    watcher.stop().await?;

    Ok(())
}
