//! Final delivery of an encoded frame.
//!
//! The platform download facility of the source design becomes a sink
//! writing into the user's downloads directory. A missing or failing sink is
//! logged and tolerated; captures never fail on delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::PathBuf;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<()>;
}

/// Writes delivered files straight into a directory, no prompting.
pub struct DownloadsDir {
    dir: PathBuf,
}

impl DownloadsDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The platform downloads directory, with a home-relative fallback.
    pub fn resolve() -> Option<Self> {
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
            .map(Self::new)
    }

    pub fn path(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl DeliverySink for DownloadsDir {
    async fn deliver(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        info!("delivered {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_bytes_under_filename() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DownloadsDir::new(dir.path().join("nested"));

        sink.deliver("clip_001.jpg", b"frame").await.unwrap();

        let written = std::fs::read(dir.path().join("nested/clip_001.jpg")).unwrap();
        assert_eq!(written, b"frame");
    }
}
