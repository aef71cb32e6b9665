use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{MediaPayload, PostFetcher, RemoteMedia, RemotePost};
use crate::config::Config;
use crate::constants::RECORD_DATE_FORMAT;
use crate::links::canonical_post_url;
use crate::post::{MediaKind, Shortcode};

/// Fetches posts by running gallery-dl into a scratch directory.
///
/// gallery-dl only supports cookies.txt files, so that is the one way to pass
/// a session through.
#[derive(Debug, Clone)]
pub struct GalleryDlFetcher {
    binary: String,
    cookies_file: Option<PathBuf>,
    max_file_size: u64,
}

impl GalleryDlFetcher {
    #[must_use]
    pub fn new(binary: String, cookies_file: Option<PathBuf>, max_file_size: u64) -> Self {
        Self {
            binary,
            cookies_file,
            max_file_size,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gallery_dl_path.clone(),
            config.cookies_file_path.clone(),
            config.max_file_size,
        )
    }

    fn build_args(&self, url: &str, work_dir: &Path) -> Vec<String> {
        let mut args = vec![
            url.to_string(),
            "--directory".to_string(),
            work_dir.to_string_lossy().to_string(),
            "--write-metadata".to_string(),
            // Zero-padded so lexical order is delivery order
            "--filename".to_string(),
            "{num:>03}.{extension}".to_string(),
            "--no-mtime".to_string(),
            "--filesize-max".to_string(),
            self.max_file_size.to_string(),
        ];

        if let Some(cookies_path) = &self.cookies_file {
            if !cookies_path.exists() {
                warn!(path = %cookies_path.display(), "Cookies file specified but does not exist, continuing without cookies");
            } else if cookies_path.is_dir() {
                warn!(path = %cookies_path.display(), "Cookies path is a directory, continuing without cookies");
            } else {
                debug!(path = %cookies_path.display(), "Using cookies file for gallery-dl download");
                args.push("--cookies".to_string());
                args.push(cookies_path.to_string_lossy().to_string());
            }
        }

        args
    }
}

#[async_trait]
impl PostFetcher for GalleryDlFetcher {
    fn name(&self) -> &'static str {
        "gallery-dl"
    }

    async fn fetch_post(&self, shortcode: &Shortcode) -> Result<RemotePost> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("insta-relay-{shortcode}-"))
            .tempdir()
            .context("Failed to create staging directory")?;

        let url = canonical_post_url(shortcode);
        let args = self.build_args(&url, staging.path());

        debug!(url = %url, binary = %self.binary, "Running gallery-dl");

        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(staging.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.binary))?
            .wait_with_output()
            .await
            .context("Failed to wait for gallery-dl")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gallery-dl failed: {}", stderr.trim());
        }

        let post = collect_staged(staging.path(), self.max_file_size).await?;
        Ok(RemotePost {
            staging: Some(staging),
            ..post
        })
    }
}

/// Gather media files and metadata gallery-dl left in `dir`.
///
/// Fails if any media file is larger than `max_file_size` bytes.
async fn collect_staged(dir: &Path, max_file_size: u64) -> Result<RemotePost> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context("Failed to read staging directory")?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();

    let mut metadata = None;
    let mut media = Vec::new();

    for name in names {
        let path = dir.join(&name);
        if name.ends_with(".json") {
            if metadata.is_none() {
                let content = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str::<serde_json::Value>(&content) {
                    Ok(json) => metadata = Some(json),
                    Err(e) => warn!(file = %name, error = %e, "Ignoring unparseable gallery-dl metadata"),
                }
            }
            continue;
        }

        let Some(kind) = MediaKind::from_path(&path) else {
            debug!(file = %name, "Skipping non-media file");
            continue;
        };
        let size = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        if size > max_file_size {
            anyhow::bail!("Media file {name} is {size} bytes, over the {max_file_size} byte limit");
        }
        let extension = path
            .extension()
            .map_or_else(|| kind.default_extension().to_string(), |e| e.to_string_lossy().to_lowercase());

        media.push(RemoteMedia {
            kind,
            extension,
            payload: MediaPayload::Staged(path),
        });
    }

    if media.is_empty() {
        anyhow::bail!("gallery-dl produced no media files");
    }

    let json = metadata.unwrap_or(serde_json::Value::Null);
    let is_video = post_is_video(&json, &media);

    Ok(RemotePost {
        username: json
            .get("username")
            .or_else(|| json.get("owner"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        caption: json
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        likes: count_field(&json, "likes"),
        comments: count_field(&json, "comments"),
        is_video,
        video_view_count: if is_video {
            count_field(&json, "video_view_count")
        } else {
            0
        },
        date: post_date(&json),
        media,
        staging: None,
    })
}

/// Post-level video flag: the metadata's post type when present, otherwise
/// true only for a single video.
fn post_is_video(json: &serde_json::Value, media: &[RemoteMedia]) -> bool {
    if let Some(typename) = json.get("typename").and_then(|v| v.as_str()) {
        return typename.to_lowercase().contains("video");
    }
    if let Some(flag) = json.get("is_video").and_then(serde_json::Value::as_bool) {
        return flag;
    }
    matches!(media, [only] if only.kind == MediaKind::Video)
}

fn count_field(json: &serde_json::Value, key: &str) -> u64 {
    json.get(key).and_then(serde_json::Value::as_u64).unwrap_or(0)
}

fn post_date(json: &serde_json::Value) -> DateTime<Utc> {
    let parsed = ["post_date", "date"]
        .iter()
        .filter_map(|key| json.get(*key).and_then(|v| v.as_str()))
        .find_map(|raw| NaiveDateTime::parse_from_str(raw, RECORD_DATE_FORMAT).ok());

    parsed.map_or_else(
        || {
            warn!("gallery-dl metadata has no usable post date, using current time");
            Utc::now()
        },
        |naive| naive.and_utc(),
    )
}
