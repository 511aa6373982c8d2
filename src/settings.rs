use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

pub const DEFAULT_FRAME_COUNT: u32 = 5;
pub const DEFAULT_INTERVAL_MS: u64 = 200;

/// Capture preferences as the rest of the daemon consumes them: already
/// merged over defaults and clamped, so readers never see a malformed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub frame_count: u32,
    pub interval_ms: u64,
    pub use_burst_for_toolbar: bool,
    pub use_title_in_filename: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            frame_count: DEFAULT_FRAME_COUNT,
            interval_ms: DEFAULT_INTERVAL_MS,
            use_burst_for_toolbar: false,
            use_title_in_filename: true,
        }
    }
}

/// The record as it arrives from disk or from a save request. Every field is
/// optional and numeric fields are signed, so partial records merge
/// field-by-field and out-of-range values coerce instead of failing the read.
#[derive(Debug, Default, Deserialize)]
pub struct RawCaptureSettings {
    pub frame_count: Option<i64>,
    pub interval_ms: Option<i64>,
    pub use_burst_for_toolbar: Option<bool>,
    pub use_title_in_filename: Option<bool>,
}

impl From<RawCaptureSettings> for CaptureSettings {
    fn from(raw: RawCaptureSettings) -> Self {
        let defaults = CaptureSettings::default();
        Self {
            frame_count: raw
                .frame_count
                .map(|n| n.clamp(1, i64::from(u32::MAX)) as u32)
                .unwrap_or(defaults.frame_count),
            interval_ms: raw
                .interval_ms
                .map(|n| n.max(0) as u64)
                .unwrap_or(defaults.interval_ms),
            use_burst_for_toolbar: raw
                .use_burst_for_toolbar
                .unwrap_or(defaults.use_burst_for_toolbar),
            use_title_in_filename: raw
                .use_title_in_filename
                .unwrap_or(defaults.use_title_in_filename),
        }
    }
}

/// On-disk document. Capture settings live under a single named key so the
/// file can grow other sections without disturbing existing readers.
#[derive(Debug, Default, Deserialize)]
struct RawSettingsDoc {
    capture: Option<RawCaptureSettings>,
}

#[derive(Debug, Serialize)]
struct SettingsDoc<'a> {
    capture: &'a CaptureSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<CaptureSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings from {}", path.display()))?;
            parse_settings(&contents)
        } else {
            CaptureSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn capture(&self) -> CaptureSettings {
        self.data.read().unwrap().clone()
    }

    /// Coerces, persists, and returns the effective record.
    pub fn update_capture(&self, raw: RawCaptureSettings) -> Result<CaptureSettings> {
        let settings = CaptureSettings::from(raw);
        {
            let mut guard = self.data.write().unwrap();
            *guard = settings.clone();
            self.persist(&guard)?;
        }
        Ok(settings)
    }

    fn persist(&self, data: &CaptureSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&SettingsDoc { capture: data })?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write settings to {}", self.path.display()))
    }
}

/// An unreadable or partial document never fails the reader; missing fields
/// fall back to defaults one by one.
fn parse_settings(contents: &str) -> CaptureSettings {
    let doc: RawSettingsDoc = serde_json::from_str(contents).unwrap_or_default();
    doc.capture.map(CaptureSettings::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_record_yields_exact_defaults() {
        let settings = parse_settings("");
        assert_eq!(settings, CaptureSettings::default());
        assert_eq!(settings.frame_count, 5);
        assert_eq!(settings.interval_ms, 200);
        assert!(!settings.use_burst_for_toolbar);
        assert!(settings.use_title_in_filename);
    }

    #[test]
    fn partial_record_merges_field_by_field() {
        let settings = parse_settings(r#"{"capture": {"frame_count": 9}}"#);
        assert_eq!(settings.frame_count, 9);
        assert_eq!(settings.interval_ms, DEFAULT_INTERVAL_MS);
        assert!(settings.use_title_in_filename);

        let settings = parse_settings(r#"{"capture": {"use_burst_for_toolbar": true}}"#);
        assert_eq!(settings.frame_count, DEFAULT_FRAME_COUNT);
        assert!(settings.use_burst_for_toolbar);
    }

    #[test]
    fn out_of_range_values_are_coerced() {
        let settings = parse_settings(r#"{"capture": {"frame_count": 0, "interval_ms": -50}}"#);
        assert_eq!(settings.frame_count, 1);
        assert_eq!(settings.interval_ms, 0);

        let settings = parse_settings(r#"{"capture": {"frame_count": -3}}"#);
        assert_eq!(settings.frame_count, 1);
    }

    #[test]
    fn garbage_document_falls_back_to_defaults() {
        assert_eq!(parse_settings("not json at all"), CaptureSettings::default());
        assert_eq!(parse_settings(r#"{"capture": 42}"#), CaptureSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update_capture(RawCaptureSettings {
                frame_count: Some(3),
                interval_ms: Some(150),
                use_burst_for_toolbar: Some(true),
                use_title_in_filename: None,
            })
            .unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        let settings = reloaded.capture();
        assert_eq!(settings.frame_count, 3);
        assert_eq!(settings.interval_ms, 150);
        assert!(settings.use_burst_for_toolbar);
        assert!(settings.use_title_in_filename);
    }
}
