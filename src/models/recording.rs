use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::inspector::RecordRegion;

/// A finished or in-progress region recording as stored in the index.
#[derive(Debug, Clone, Serialize)]
pub struct Recording {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub path: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub fps: u32,
    pub tags: String,
    pub note: String,
}

/// Fields known at recording start; the rest is filled in on stop.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub title: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub path: String,
    pub region: RecordRegion,
    pub fps: u32,
}
