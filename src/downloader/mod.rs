//! The download-and-cache workflow.
//!
//! One run resolves the shortcode, consults the store, fetches and persists
//! on a miss, and finally checks that every recorded file still exists.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::PostStore;
use crate::error::DownloadError;
use crate::fetcher::{MediaPayload, PostFetcher, RemotePost};
use crate::fs_utils;
use crate::links;
use crate::post::{PostRecord, Shortcode};

mod locks;

pub use locks::{ShortcodeGuard, ShortcodeLocks};

/// Where a returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Remote,
}

/// A usable post: its record with only existing files, and its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub record: PostRecord,
    pub origin: Origin,
}

/// Runs the workflow against an injected strategy and store.
pub struct Downloader {
    fetcher: Arc<dyn PostFetcher>,
    store: Arc<dyn PostStore>,
    locks: ShortcodeLocks,
}

impl Downloader {
    #[must_use]
    pub fn new(fetcher: Arc<dyn PostFetcher>, store: Arc<dyn PostStore>) -> Self {
        Self {
            fetcher,
            store,
            locks: ShortcodeLocks::new(),
        }
    }

    /// Resolve `url` to a usable post, from cache when possible.
    pub async fn download(&self, url: &str) -> Result<Download, DownloadError> {
        self.run(url, true).await
    }

    /// Like [`Downloader::download`] but always fetches, replacing any cached record.
    pub async fn refetch(&self, url: &str) -> Result<Download, DownloadError> {
        self.run(url, false).await
    }

    /// Every stored post that still has at least one file, ordered by shortcode.
    pub async fn saved_posts(&self) -> Result<Vec<PostRecord>, DownloadError> {
        let records = self
            .store
            .list()
            .await
            .map_err(|e| DownloadError::filesystem(&e))?;

        let mut usable = Vec::with_capacity(records.len());
        for record in records {
            let record = verify_files(record).await;
            if !record.file_paths.is_empty() {
                usable.push(record);
            }
        }
        Ok(usable)
    }

    async fn run(&self, url: &str, use_cache: bool) -> Result<Download, DownloadError> {
        let url = url.trim();
        let shortcode = links::extract_shortcode(url).ok_or_else(|| {
            DownloadError::Validation("could not extract post shortcode".to_string())
        })?;

        let _guard = self.locks.acquire(shortcode.as_str()).await;

        if use_cache {
            if let Some(record) = self.cached(&shortcode).await {
                info!(shortcode = %shortcode, "Cache hit");
                let record = verify_files(record).await;
                return finish(record, Origin::Cache);
            }
            debug!(shortcode = %shortcode, "Cache miss");
        }

        if !links::validate(url) {
            return Err(DownloadError::Validation(
                "unsupported Instagram link".to_string(),
            ));
        }

        info!(shortcode = %shortcode, strategy = self.fetcher.name(), "Fetching post");
        let remote = self
            .fetcher
            .fetch_post(&shortcode)
            .await
            .map_err(|e| {
                warn!(shortcode = %shortcode, "Fetch failed: {e:#}");
                DownloadError::from_fetch_failure(format!("{e:#}"))
            })?;

        let record = self.persist(&shortcode, remote).await?;
        info!(
            shortcode = %shortcode,
            files = record.file_paths.len(),
            "Post saved"
        );

        let record = verify_files(record).await;
        finish(record, Origin::Remote)
    }

    /// Cached record, or `None` when absent or unreadable.
    async fn cached(&self, shortcode: &Shortcode) -> Option<PostRecord> {
        match self.store.get(shortcode).await {
            Ok(record) => record,
            Err(e) => {
                warn!(shortcode = %shortcode, "Ignoring unusable cache entry: {e:#}");
                None
            }
        }
    }

    /// Write every media item into the store and save the record.
    async fn persist(
        &self,
        shortcode: &Shortcode,
        remote: RemotePost,
    ) -> Result<PostRecord, DownloadError> {
        let RemotePost {
            username,
            caption,
            likes,
            comments,
            is_video,
            video_view_count,
            date,
            media,
            staging,
        } = remote;

        let mut file_paths: Vec<PathBuf> = Vec::with_capacity(media.len());
        for (index, item) in media.into_iter().enumerate() {
            let file_name = format!("{shortcode}_{}.{}", index + 1, item.extension);
            let dest = self
                .store
                .media_path(shortcode, &file_name)
                .await
                .map_err(|e| DownloadError::filesystem(&e))?;

            // Only complete files ever appear under their final name
            let partial = partial_path(&dest);
            let stored = match self.write_media(item.payload, &partial).await {
                Ok(()) => tokio::fs::rename(&partial, &dest).await.map_err(|e| {
                    DownloadError::Filesystem(format!(
                        "Failed to move {} into place: {e}",
                        dest.display()
                    ))
                }),
                Err(e) => Err(e),
            };
            if let Err(e) = stored {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }

            debug!(shortcode = %shortcode, path = %dest.display(), "Stored media file");
            file_paths.push(dest);
        }

        // Staged files have all been moved out
        drop(staging);

        let record = PostRecord {
            shortcode: shortcode.clone(),
            username,
            caption,
            likes,
            comments,
            is_video,
            video_view_count: if is_video { video_view_count } else { 0 },
            date,
            file_paths,
        };

        match self.store.retain_media(shortcode, &record.file_paths).await {
            Ok(0) => {}
            Ok(removed) => debug!(shortcode = %shortcode, removed, "Removed stale media files"),
            Err(e) => warn!(shortcode = %shortcode, "Failed to remove stale media files: {e:#}"),
        }

        self.store
            .put(&record)
            .await
            .map_err(|e| DownloadError::filesystem(&e))?;

        Ok(record)
    }

    /// Write one media payload to `dest`.
    async fn write_media(&self, payload: MediaPayload, dest: &Path) -> Result<(), DownloadError> {
        match payload {
            MediaPayload::Bytes(bytes) => tokio::fs::write(dest, bytes).await.map_err(|e| {
                DownloadError::Filesystem(format!("Failed to write {}: {e}", dest.display()))
            }),
            MediaPayload::Staged(src) => fs_utils::move_file(&src, dest)
                .await
                .map_err(|e| DownloadError::filesystem(&e)),
            // A failed asset download is never a missing post
            MediaPayload::Url(url) => self
                .fetcher
                .fetch_media(&url, dest)
                .await
                .map(|_| ())
                .map_err(|e| DownloadError::Fetch(format!("{e:#}"))),
        }
    }
}

/// `<dest>.part`, where a media file is written before it is moved into place.
fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Drop recorded paths that no longer exist, and repeats, keeping order.
async fn verify_files(mut record: PostRecord) -> PostRecord {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(record.file_paths.len());

    for path in record.file_paths {
        if !seen.insert(path.clone()) {
            continue;
        }
        if fs_utils::is_file(&path).await {
            kept.push(path);
        } else {
            warn!(shortcode = %record.shortcode, path = %path.display(), "Cached file is missing");
        }
    }

    record.file_paths = kept;
    record
}

fn finish(record: PostRecord, origin: Origin) -> Result<Download, DownloadError> {
    if record.file_paths.is_empty() {
        return Err(DownloadError::EmptyResult {
            from_cache: origin == Origin::Cache,
        });
    }
    Ok(Download { record, origin })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskStore;
    use crate::fetcher::RemoteMedia;
    use crate::post::MediaKind;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fetcher returning canned results and counting calls.
    struct StubFetcher {
        calls: AtomicUsize,
        failure: Option<String>,
        media: Vec<(MediaKind, &'static str)>,
        media_failure: Option<String>,
    }

    impl StubFetcher {
        fn with_media(media: Vec<(MediaKind, &'static str)>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: None,
                media,
                media_failure: None,
            }
        }

        /// One video behind a URL whose download breaks off with `message`.
        fn broken_asset(message: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: None,
                media: vec![(MediaKind::Video, "mp4")],
                media_failure: Some(message.to_string()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: Some(message.to_string()),
                media: Vec::new(),
                media_failure: None,
            }
        }
    }

    #[async_trait]
    impl PostFetcher for StubFetcher {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_post(&self, _shortcode: &Shortcode) -> anyhow::Result<RemotePost> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.failure {
                anyhow::bail!("{message}");
            }
            Ok(RemotePost {
                username: "carol".to_string(),
                caption: Some("caption".to_string()),
                likes: 5,
                comments: 1,
                is_video: false,
                video_view_count: 42,
                date: Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap(),
                media: self
                    .media
                    .iter()
                    .map(|(kind, ext)| RemoteMedia {
                        kind: *kind,
                        extension: (*ext).to_string(),
                        payload: if self.media_failure.is_some() {
                            MediaPayload::Url("https://cdn.example/clip.mp4".to_string())
                        } else {
                            MediaPayload::Bytes(b"data".to_vec())
                        },
                    })
                    .collect(),
                staging: None,
            })
        }

        async fn fetch_media(&self, _url: &str, dest: &Path) -> anyhow::Result<u64> {
            tokio::fs::write(dest, b"rem").await?;
            if let Some(message) = &self.media_failure {
                anyhow::bail!("{message}");
            }
            tokio::fs::write(dest, b"remote").await?;
            Ok(6)
        }
    }

    async fn setup(fetcher: StubFetcher) -> (Downloader, Arc<StubFetcher>, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::open(temp.path()).await.unwrap();
        let fetcher = Arc::new(fetcher);
        let downloader = Downloader::new(fetcher.clone(), Arc::new(store));
        (downloader, fetcher, temp)
    }

    #[tokio::test]
    async fn test_files_named_by_index() {
        let (downloader, _, _temp) =
            setup(StubFetcher::with_media(vec![(MediaKind::Image, "jpg"), (MediaKind::Image, "png")]))
                .await;

        let download = downloader
            .download("https://www.instagram.com/p/GAL1/")
            .await
            .unwrap();

        let names: Vec<String> = download
            .record
            .file_paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["GAL1_1.jpg", "GAL1_2.png"]);
        assert_eq!(download.origin, Origin::Remote);
        // Views only count for videos
        assert_eq!(download.record.video_view_count, 0);
    }

    #[tokio::test]
    async fn test_missing_shortcode_is_validation_error() {
        let (downloader, fetcher, _temp) =
            setup(StubFetcher::with_media(vec![(MediaKind::Image, "jpg")])).await;

        let err = downloader
            .download("https://instagram.com/stories/alice/123/")
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Validation(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_shape_rejected_before_fetch() {
        let (downloader, fetcher, _temp) =
            setup(StubFetcher::with_media(vec![(MediaKind::Image, "jpg")])).await;

        let err = downloader
            .download("https://example.com/p/ABC123")
            .await
            .unwrap_err();

        assert_eq!(err, DownloadError::Validation("unsupported Instagram link".to_string()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failures_are_classified() {
        let cases = [
            ("Login required to view post", "private"),
            ("Not found: post X", "not_found"),
            ("socket closed", "fetch_error"),
        ];
        for (message, kind) in cases {
            let (downloader, _, _temp) = setup(StubFetcher::failing(message)).await;
            let err = downloader
                .download("https://instagram.com/p/X/")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{message}");
        }
    }

    #[tokio::test]
    async fn test_fetch_with_no_media_is_empty_result() {
        let (downloader, _, _temp) = setup(StubFetcher::with_media(vec![])).await;

        let err = downloader
            .download("https://instagram.com/p/EMPTY/")
            .await
            .unwrap_err();
        assert_eq!(err, DownloadError::EmptyResult { from_cache: false });
    }

    #[tokio::test]
    async fn test_refetch_bypasses_cache() {
        let (downloader, fetcher, _temp) =
            setup(StubFetcher::with_media(vec![(MediaKind::Video, "mp4")])).await;
        let url = "https://instagram.com/reel/R1/";

        downloader.download(url).await.unwrap();
        let again = downloader.refetch(url).await.unwrap();

        assert_eq!(again.origin, Origin::Remote);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_refetched() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::open(temp.path()).await.unwrap();
        let code = Shortcode::new("CORRUPT");
        tokio::fs::create_dir_all(store.post_dir(&code)).await.unwrap();
        tokio::fs::write(store.metadata_path(&code), "{").await.unwrap();

        let fetcher = Arc::new(StubFetcher::with_media(vec![(MediaKind::Image, "jpg")]));
        let downloader = Downloader::new(fetcher.clone(), Arc::new(store));

        let download = downloader
            .download("https://instagram.com/p/CORRUPT/")
            .await
            .unwrap();
        assert_eq!(download.origin, Origin::Remote);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verify_files_drops_missing_and_repeats() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        let b = temp.path().join("b.jpg");
        tokio::fs::write(&a, b"a").await.unwrap();

        let record = PostRecord {
            shortcode: Shortcode::new("V"),
            username: String::new(),
            caption: None,
            likes: 0,
            comments: 0,
            is_video: false,
            video_view_count: 0,
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            file_paths: vec![a.clone(), b, a.clone()],
        };

        assert_eq!(verify_files(record).await.file_paths, vec![a]);
    }

    #[tokio::test]
    async fn test_saved_posts_skips_unusable() {
        let (downloader, _, _temp) =
            setup(StubFetcher::with_media(vec![(MediaKind::Image, "jpg")])).await;

        let kept = downloader.download("https://instagram.com/p/KEEP/").await.unwrap();
        let gone = downloader.download("https://instagram.com/p/GONE/").await.unwrap();
        tokio::fs::remove_file(&gone.record.file_paths[0]).await.unwrap();

        let saved = downloader.saved_posts().await.unwrap();
        assert_eq!(saved, vec![kept.record]);
    }

    #[tokio::test]
    async fn test_asset_failure_is_fetch_error_and_leaves_nothing() {
        let (downloader, _, temp) = setup(StubFetcher::broken_asset(
            "Media download returned error: HTTP status client error (404 Not Found)",
        ))
        .await;

        let err = downloader
            .download("https://instagram.com/p/BROKE/")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch_error");

        let store = DiskStore::open(temp.path()).await.unwrap();
        let dir = store.post_dir(&Shortcode::new("BROKE"));
        assert!(!dir.join("BROKE_1.mp4").exists());
        assert!(!dir.join("BROKE_1.mp4.part").exists());
        assert!(!store.metadata_path(&Shortcode::new("BROKE")).exists());
    }

    #[tokio::test]
    async fn test_refetch_removes_stale_media() {
        let (downloader, _, temp) =
            setup(StubFetcher::with_media(vec![(MediaKind::Image, "jpg"), (MediaKind::Image, "jpg")]))
                .await;
        let url = "https://instagram.com/p/STALE/";

        let first = downloader.download(url).await.unwrap();
        let store = DiskStore::open(temp.path()).await.unwrap();
        let stray = store.post_dir(&Shortcode::new("STALE")).join("STALE_3.webp");
        tokio::fs::write(&stray, b"old").await.unwrap();

        let again = downloader.refetch(url).await.unwrap();

        assert!(!stray.exists());
        assert_eq!(again.record.file_paths, first.record.file_paths);
        assert!(again.record.file_paths.iter().all(|p| p.is_file()));
        assert!(store.metadata_path(&Shortcode::new("STALE")).is_file());
    }
}
