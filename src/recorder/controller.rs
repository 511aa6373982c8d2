//! Region-recording controller.
//!
//! Owns the ffmpeg child processes and the current-recording id, so separate
//! controllers never share recording state. Stopping writes `q` to ffmpeg's
//! stdin and waits for a clean exit so the container is finalized properly,
//! killing only as a last resort.

use std::{collections::HashMap, path::PathBuf, process::Stdio, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::{io::AsyncWriteExt, process::Child, sync::Mutex, time::Duration};

use crate::db::Database;
use crate::inspector::{probe, Delivery, FrameSource};
use crate::models::NewRecording;

use super::ffmpeg;

const STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct StartedRecording {
    pub recording_id: i64,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoppedRecording {
    pub recording_id: i64,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToggleOutcome {
    Started(StartedRecording),
    Stopped(StoppedRecording),
}

#[derive(Default)]
struct RecorderInner {
    current: Option<i64>,
    children: HashMap<i64, Child>,
}

pub struct RecorderController {
    source: Arc<dyn FrameSource>,
    db: Database,
    output_dir: PathBuf,
    inner: Mutex<RecorderInner>,
}

impl RecorderController {
    pub fn new(source: Arc<dyn FrameSource>, db: Database, output_dir: PathBuf) -> Self {
        Self {
            source,
            db,
            output_dir,
            inner: Mutex::new(RecorderInner::default()),
        }
    }

    pub async fn current(&self) -> Option<i64> {
        self.inner.lock().await.current
    }

    /// Probes the page for the video's screen region and starts an ffmpeg
    /// grab of it.
    pub async fn start(&self, fps: Option<u32>) -> Result<StartedRecording> {
        let m = match self.source.measurements().await {
            Delivery::Delivered(m) => m,
            Delivery::Unreachable => bail!("page unreachable, cannot locate recording region"),
            Delivery::ContentError(reason) => bail!("cannot start recording: {reason}"),
        };

        let region = ffmpeg::even_region(probe::record_region(&m));
        ffmpeg::validate_region(&region)?;

        let fps = fps.unwrap_or(ffmpeg::DEFAULT_FPS).max(1);
        let title = m.title.clone().filter(|t| !t.is_empty());
        let filename = ffmpeg::recording_filename(title.as_deref(), Local::now().naive_local());

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;
        let output = self.output_dir.join(&filename);

        let recording_id = self
            .db
            .insert_recording(&NewRecording {
                title: title.unwrap_or_default(),
                url: m.href.clone(),
                started_at: Utc::now(),
                path: output.to_string_lossy().into_owned(),
                region,
                fps,
            })
            .await?;

        let child = ffmpeg::grab_command(&region, fps, &output)?
            .stdin(Stdio::piped())
            .spawn()
            .context("failed to start ffmpeg (not found on PATH?)")?;

        {
            let mut inner = self.inner.lock().await;
            inner.children.insert(recording_id, child);
            inner.current = Some(recording_id);
        }

        info!(
            "recording {recording_id} started: {}x{} at ({},{}) {fps}fps -> {}",
            region.width,
            region.height,
            region.x,
            region.y,
            output.display()
        );

        Ok(StartedRecording {
            recording_id,
            path: output.to_string_lossy().into_owned(),
        })
    }

    /// Stops the given recording, or the current one when no id is passed.
    pub async fn stop(&self, recording_id: Option<i64>) -> Result<StoppedRecording> {
        let (recording_id, mut child) = {
            let mut inner = self.inner.lock().await;
            let id = recording_id
                .or(inner.current)
                .ok_or_else(|| anyhow!("no active recording"))?;
            let child = inner
                .children
                .remove(&id)
                .ok_or_else(|| anyhow!("no active process for recording {id}"))?;
            if inner.current == Some(id) {
                inner.current = None;
            }
            (id, child)
        };

        // Ask ffmpeg to finish the file properly before resorting to a kill.
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }

        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!("recording {recording_id} ffmpeg exited with {status}");
            }
            Ok(Err(err)) => {
                warn!("recording {recording_id} wait failed: {err}");
            }
            Err(_) => {
                warn!("recording {recording_id} did not exit within grace period, killing");
                if let Err(err) = child.kill().await {
                    warn!("failed to kill ffmpeg for recording {recording_id}: {err}");
                }
            }
        }

        let path = self.db.finalize_recording(recording_id, Utc::now()).await?;

        info!("recording {recording_id} stopped: {path:?}");

        Ok(StoppedRecording { recording_id, path })
    }

    /// One-button behavior: start when idle, stop the current recording
    /// otherwise.
    pub async fn toggle(&self, fps: Option<u32>) -> Result<ToggleOutcome> {
        let active = self.current().await;
        match active {
            None => Ok(ToggleOutcome::Started(self.start(fps).await?)),
            Some(id) => Ok(ToggleOutcome::Stopped(self.stop(Some(id)).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{FrameRequest, RasterFrame};
    use crate::inspector::probe::PageMeasurements;
    use async_trait::async_trait;

    struct UnreachablePage;

    #[async_trait]
    impl FrameSource for UnreachablePage {
        async fn measurements(&self) -> Delivery<PageMeasurements> {
            Delivery::Unreachable
        }

        async fn capture_frame(&self, _request: FrameRequest) -> Delivery<RasterFrame> {
            Delivery::Unreachable
        }

        async fn viewport_screenshot(&self) -> Delivery<Vec<u8>> {
            Delivery::Unreachable
        }

        async fn location(&self) -> Delivery<String> {
            Delivery::Unreachable
        }
    }

    fn controller(dir: &tempfile::TempDir) -> RecorderController {
        let db = Database::new(dir.path().join("recordings.sqlite3")).unwrap();
        RecorderController::new(Arc::new(UnreachablePage), db, dir.path().join("clips"))
    }

    #[tokio::test]
    async fn stop_without_active_recording_errors() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = controller(&dir);

        let err = recorder.stop(None).await.unwrap_err();
        assert!(err.to_string().contains("no active recording"));

        let err = recorder.stop(Some(42)).await.unwrap_err();
        assert!(err.to_string().contains("no active process"));
    }

    #[tokio::test]
    async fn start_requires_reachable_page() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = controller(&dir);

        let err = recorder.start(None).await.unwrap_err();
        assert!(err.to_string().contains("unreachable"));
        assert_eq!(recorder.current().await, None);
    }
}
