use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::PostStore;
use crate::constants::METADATA_SUFFIX;
use crate::post::{PostRecord, Shortcode};

/// Post store on the local filesystem.
///
/// Layout: `<root>/<shortcode>/<shortcode>_metadata.json` beside the media
/// files of that post.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open the store, creating the root directory if needed.
    ///
    /// The root is canonicalized so every recorded path is absolute.
    pub async fn open(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", root.display()))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .with_context(|| format!("Failed to resolve cache directory: {}", root.display()))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything stored for `shortcode`.
    #[must_use]
    pub fn post_dir(&self, shortcode: &Shortcode) -> PathBuf {
        self.root.join(shortcode.as_str())
    }

    /// Path of the sidecar record for `shortcode`.
    #[must_use]
    pub fn metadata_path(&self, shortcode: &Shortcode) -> PathBuf {
        self.post_dir(shortcode)
            .join(format!("{shortcode}{METADATA_SUFFIX}"))
    }

    async fn read_record(path: &Path) -> Result<PostRecord> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[async_trait]
impl PostStore for DiskStore {
    async fn get(&self, shortcode: &Shortcode) -> Result<Option<PostRecord>> {
        let path = self.metadata_path(shortcode);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to check {}", path.display()))
            }
        }

        let record = Self::read_record(&path).await?;
        debug!(shortcode = %shortcode, path = %path.display(), "Loaded cached record");
        Ok(Some(record))
    }

    async fn put(&self, record: &PostRecord) -> Result<()> {
        let dir = self.post_dir(&record.shortcode);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create post directory: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(record).context("Failed to serialize record")?;
        let path = self.metadata_path(&record.shortcode);
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!(shortcode = %record.shortcode, path = %path.display(), "Saved record");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PostRecord>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read cache directory: {}", self.root.display()))?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path().join(format!("{name}{METADATA_SUFFIX}"));
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable record: {e:#}"),
            }
        }

        records.sort_by(|a, b| a.shortcode.cmp(&b.shortcode));
        Ok(records)
    }

    async fn media_path(&self, shortcode: &Shortcode, file_name: &str) -> Result<PathBuf> {
        let dir = self.post_dir(shortcode);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create post directory: {}", dir.display()))?;
        Ok(dir.join(file_name))
    }

    async fn retain_media(&self, shortcode: &Shortcode, keep: &[PathBuf]) -> Result<usize> {
        let dir = self.post_dir(shortcode);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(0);
        }

        let sidecar = self.metadata_path(shortcode);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read post directory: {}", dir.display()))?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() || path == sidecar || keep.contains(&path) {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            debug!(shortcode = %shortcode, path = %path.display(), "Removed stale media file");
            removed += 1;
        }

        Ok(removed)
    }
}
