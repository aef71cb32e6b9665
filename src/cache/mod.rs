//! Persistence of post records and their media.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::post::{PostRecord, Shortcode};

mod disk;

pub use disk::DiskStore;

/// Key-value store of post records, keyed by shortcode.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Load the record for `shortcode`, or `None` if nothing is stored.
    async fn get(&self, shortcode: &Shortcode) -> Result<Option<PostRecord>>;

    /// Store `record`, replacing any previous record for its shortcode.
    async fn put(&self, record: &PostRecord) -> Result<()>;

    /// Every stored record that can be read.
    async fn list(&self) -> Result<Vec<PostRecord>>;

    /// Location for a media file of `shortcode`, with its parent directory created.
    async fn media_path(&self, shortcode: &Shortcode, file_name: &str) -> Result<PathBuf>;

    /// Delete media files of `shortcode` that are not in `keep`, returning
    /// how many were removed.
    async fn retain_media(&self, shortcode: &Shortcode, keep: &[PathBuf]) -> Result<usize>;
}
