//! Strategies for pulling a post's metadata and media from Instagram.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::config::{Config, FetchStrategy};
use crate::post::{MediaKind, Shortcode};

pub mod direct;
pub mod gallerydl;

pub use direct::DirectFetcher;
pub use gallerydl::GalleryDlFetcher;

/// Post metadata and media as returned by a strategy.
#[derive(Debug)]
pub struct RemotePost {
    pub username: String,
    pub caption: Option<String>,
    pub likes: u64,
    pub comments: u64,
    pub is_video: bool,
    pub video_view_count: u64,
    pub date: DateTime<Utc>,
    /// Media in delivery order.
    pub media: Vec<RemoteMedia>,
    /// Scratch directory owning any `MediaPayload::Staged` files; removed on drop.
    pub staging: Option<TempDir>,
}

/// One media asset of a remote post.
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    pub kind: MediaKind,
    /// File extension without the dot.
    pub extension: String,
    pub payload: MediaPayload,
}

/// Where the bytes of a media asset come from.
#[derive(Debug, Clone)]
pub enum MediaPayload {
    /// Raw bytes already in memory.
    Bytes(Vec<u8>),
    /// File already on local disk, to be moved into the cache.
    Staged(PathBuf),
    /// Remote URL, pulled with [`PostFetcher::fetch_media`].
    Url(String),
}

/// A way of fetching Instagram posts.
#[async_trait]
pub trait PostFetcher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Fetch metadata and media for `shortcode`.
    ///
    /// Errors mention "Login required" for posts that need a session and
    /// "Not found" for missing posts.
    async fn fetch_post(&self, shortcode: &Shortcode) -> Result<RemotePost>;

    /// Stream a `MediaPayload::Url` asset to `dest`, returning bytes written.
    async fn fetch_media(&self, url: &str, dest: &Path) -> Result<u64> {
        let _ = dest;
        anyhow::bail!("{} does not download media URLs ({url})", self.name())
    }
}

/// Build the strategy selected in `config`.
pub fn from_config(config: &Config) -> Result<Arc<dyn PostFetcher>> {
    Ok(match config.fetch_strategy {
        FetchStrategy::GalleryDl => Arc::new(GalleryDlFetcher::from_config(config)),
        FetchStrategy::Direct => Arc::new(DirectFetcher::from_config(config)?),
    })
}
