//! Navigation watcher.
//!
//! The host page is a single-page application, so the tab never reloads
//! between videos. The watcher polls the page URL; whenever it changes it
//! re-runs the video-placement check with bounded retries and publishes the
//! result, so trigger surfaces can tell whether a capture would currently
//! find anything.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use anyhow::{bail, Context, Result};
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use super::page::{Delivery, FrameSource};
use super::probe;
use super::WATCH_PATTERN;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

pub const PLACEMENT_POLL_MS: u64 = 500;
pub const MAX_PLACEMENT_TRIES: u32 = 20;

/// Shared readiness snapshot the control surface reports.
#[derive(Default)]
pub struct WatcherStatus {
    ready: AtomicBool,
    page_url: RwLock<Option<String>>,
}

impl WatcherStatus {
    pub fn video_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn page_url(&self) -> Option<String> {
        self.page_url.read().unwrap().clone()
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    fn set_page_url(&self, url: Option<String>) {
        *self.page_url.write().unwrap() = url;
    }
}

pub struct NavigationWatcher {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    status: Arc<WatcherStatus>,
}

impl NavigationWatcher {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            status: Arc::new(WatcherStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<WatcherStatus> {
        self.status.clone()
    }

    pub fn start(&mut self, source: Arc<dyn FrameSource>) -> Result<()> {
        if self.handle.is_some() {
            bail!("navigation watcher already running");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let status = self.status.clone();

        let handle = tokio::spawn(watch_loop(source, status, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("navigation watcher task failed to join")?;
        }
        Ok(())
    }
}

impl Default for NavigationWatcher {
    fn default() -> Self {
        Self::new()
    }
}

async fn watch_loop(
    source: Arc<dyn FrameSource>,
    status: Arc<WatcherStatus>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(PLACEMENT_POLL_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_url: Option<String> = None;
    let mut tries: u32 = 0;
    let mut exhausted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let url = source.location().await.delivered();

                if url != last_url {
                    log_info!("navigation observed: {:?} -> {:?}", last_url, url);
                    last_url = url.clone();
                    status.set_page_url(url.clone());
                    status.set_ready(false);
                    tries = 0;
                    exhausted = false;
                }

                let Some(url) = url else {
                    // Page unreachable; readiness is meaningless until it
                    // answers again.
                    status.set_ready(false);
                    continue;
                };

                if !url.contains(WATCH_PATTERN) {
                    status.set_ready(false);
                    continue;
                }

                if status.video_ready() || exhausted {
                    continue;
                }

                tries += 1;
                match source.measurements().await {
                    Delivery::Delivered(m) => {
                        let rect = probe::video_rect(&m.rect, m.masthead_bottom);
                        if !rect.is_empty() {
                            log_info!("video rectangle available after {tries} placement checks");
                            status.set_ready(true);
                        } else if tries >= MAX_PLACEMENT_TRIES {
                            log_warn!("giving up on video placement after {tries} checks");
                            exhausted = true;
                        }
                    }
                    Delivery::ContentError(reason) => {
                        if tries >= MAX_PLACEMENT_TRIES {
                            log_warn!("giving up on video placement: {reason}");
                            exhausted = true;
                        }
                    }
                    Delivery::Unreachable => {
                        status.set_ready(false);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("navigation watcher shutting down");
                break;
            }
        }
    }
}
