//! Capture orchestration: the single-frame protocol with its fallback chain,
//! and burst sequencing on top of it.
//!
//! Every failure is contained here. Trigger surfaces fire a request and get
//! no error back; a capture that cannot complete is logged and skipped.
//! Captures on one orchestrator are serialized: a trigger that lands while a
//! burst is running waits for the burst to finish instead of interleaving
//! with it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Local;
use tokio::{sync::Mutex, time::Duration};
use uuid::Uuid;

use crate::inspector::{
    frame, probe, Delivery, FrameRequest, FrameSource, OutputFormat, VideoInfo,
};
use crate::settings::{CaptureSettings, SettingsStore};

use super::crop;
use super::delivery::DeliverySink;
use super::filename;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Single,
    Burst,
    /// Toolbar trigger; resolves to `Single` or `Burst` from settings.
    AutoToolbar,
}

/// Terminal state of one frame's capture attempt. Both variants are
/// successful resolutions from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Submitted for download under this filename.
    Delivered(String),
    /// Abandoned with a reason; siblings in a burst are unaffected.
    Skipped(String),
}

pub struct CaptureOrchestrator {
    source: Arc<dyn FrameSource>,
    sink: Arc<dyn DeliverySink>,
    settings: Arc<SettingsStore>,
    capture_lock: Mutex<()>,
    /// Names ad-hoc single captures; owned here so separate orchestrators
    /// never share a counter.
    sequence: AtomicU64,
}

impl CaptureOrchestrator {
    pub fn new(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn DeliverySink>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            source,
            sink,
            settings,
            capture_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Entry point for every trigger surface. Never returns an error; the
    /// download side effect is the only observable result.
    pub async fn handle_capture(&self, mode: CaptureMode, format: OutputFormat) {
        let settings = self.settings.capture();
        let mode = resolve_mode(mode, &settings);
        let run_id = Uuid::new_v4();

        let _serialized = self.capture_lock.lock().await;
        log_info!("capture {run_id} start ({mode:?}, {format:?})");

        match mode {
            CaptureMode::Burst => {
                let outcomes = self.capture_burst(&settings, format).await;
                let delivered = outcomes
                    .iter()
                    .filter(|o| matches!(o, CaptureOutcome::Delivered(_)))
                    .count();
                log_info!(
                    "capture {run_id} done: {delivered}/{} frames delivered",
                    outcomes.len()
                );
            }
            CaptureMode::Single | CaptureMode::AutoToolbar => {
                match self.capture_single(None, None, &settings, format).await {
                    CaptureOutcome::Delivered(name) => {
                        log_info!("capture {run_id} done: {name}");
                    }
                    CaptureOutcome::Skipped(reason) => {
                        log_warn!("capture {run_id} skipped: {reason}");
                    }
                }
            }
        }
    }

    /// One frame: video info, direct rasterization, screenshot+crop
    /// fallback, naming, delivery.
    async fn capture_single(
        &self,
        index: Option<u32>,
        base_title: Option<&str>,
        settings: &CaptureSettings,
        format: OutputFormat,
    ) -> CaptureOutcome {
        let effective_index = index.unwrap_or_else(|| self.next_sequence());

        let info = match self.source.measurements().await {
            Delivery::Delivered(m) => probe::video_info(&m),
            Delivery::Unreachable => {
                log_warn!("video info unreachable, skipping capture");
                return CaptureOutcome::Skipped("page unreachable".into());
            }
            Delivery::ContentError(reason) => {
                log_info!("no capturable video: {reason}");
                return CaptureOutcome::Skipped(reason);
            }
        };

        let (bytes, used_direct) = match self.direct_frame(&info, format).await {
            Delivery::Delivered(raster) => (raster.bytes, true),
            unavailable => {
                if let Delivery::ContentError(reason) = &unavailable {
                    log_info!("direct frame unavailable ({reason}), falling back to screenshot");
                } else {
                    log_info!("direct frame unreachable, falling back to screenshot");
                }

                let screenshot = match self.source.viewport_screenshot().await {
                    Delivery::Delivered(bytes) => bytes,
                    _ => {
                        log_warn!("viewport screenshot unavailable, skipping frame");
                        return CaptureOutcome::Skipped("viewport screenshot unavailable".into());
                    }
                };

                match crop::crop_to_rect(&screenshot, &info.rect, info.device_pixel_ratio, format)
                {
                    Ok(bytes) => (bytes, false),
                    Err(err) => {
                        log_error!("fallback crop failed: {err:#}");
                        return CaptureOutcome::Skipped(format!("fallback crop failed: {err}"));
                    }
                }
            }
        };

        let effective_title = if settings.use_title_in_filename {
            base_title.map(str::to_string).or_else(|| info.title.clone())
        } else {
            Some("capture".to_string())
        };

        let name = filename::build_filename(
            effective_title.as_deref(),
            Some(effective_index),
            &info.host,
            &info.channel,
            Local::now().naive_local(),
            format.extension(),
        );

        // Delivery-facility failure is non-fatal; the capture still
        // resolves.
        if let Err(err) = self.sink.deliver(&name, &bytes).await {
            log_error!("download submission failed for {name}: {err:#}");
        }

        log_info!(
            "frame {effective_index} saved as {name} ({})",
            if used_direct {
                "direct video frame"
            } else {
                "viewport crop"
            }
        );

        CaptureOutcome::Delivered(name)
    }

    async fn direct_frame(
        &self,
        info: &VideoInfo,
        format: OutputFormat,
    ) -> Delivery<frame::RasterFrame> {
        match frame::capture_surface(info) {
            Some((width, height)) => {
                self.source
                    .capture_frame(FrameRequest {
                        width,
                        height,
                        format,
                    })
                    .await
            }
            None => Delivery::ContentError("video has zero resolution".into()),
        }
    }

    /// Strictly sequential burst: frame i+1 only starts after frame i has
    /// been submitted, with the configured pause between frames. A failed
    /// frame is skipped; the burst never aborts early.
    async fn capture_burst(
        &self,
        settings: &CaptureSettings,
        format: OutputFormat,
    ) -> Vec<CaptureOutcome> {
        let info = match self.source.measurements().await {
            Delivery::Delivered(m) => probe::video_info(&m),
            Delivery::Unreachable => {
                log_warn!("video info unreachable, burst abandoned");
                return Vec::new();
            }
            Delivery::ContentError(reason) => {
                log_info!("no capturable video for burst: {reason}");
                return Vec::new();
            }
        };

        let base_title = if settings.use_title_in_filename {
            info.title.clone()
        } else {
            Some("capture".to_string())
        };

        let frame_count = settings.frame_count.max(1);
        let interval = Duration::from_millis(settings.interval_ms);
        let mut outcomes = Vec::with_capacity(frame_count as usize);

        for ordinal in 1..=frame_count {
            outcomes.push(
                self.capture_single(Some(ordinal), base_title.as_deref(), settings, format)
                    .await,
            );

            if ordinal < frame_count && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        outcomes
    }

    fn next_sequence(&self) -> u32 {
        (self.sequence.fetch_add(1, Ordering::Relaxed) + 1) as u32
    }
}

fn resolve_mode(mode: CaptureMode, settings: &CaptureSettings) -> CaptureMode {
    match mode {
        CaptureMode::AutoToolbar => {
            if settings.use_burst_for_toolbar {
                CaptureMode::Burst
            } else {
                CaptureMode::Single
            }
        }
        other => other,
    }
}
