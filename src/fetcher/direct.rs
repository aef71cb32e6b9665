use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{MediaPayload, PostFetcher, RemoteMedia, RemotePost};
use crate::config::Config;
use crate::constants::BROWSER_USER_AGENT;
use crate::post::{MediaKind, Shortcode};

/// GraphQL document id of the web client's single-post query.
const POST_DOC_ID: &str = "8845758582119845";
/// Application id sent by instagram.com's own web client.
const WEB_APP_ID: &str = "936619743392459";

/// Fetches post metadata from Instagram's public GraphQL endpoint and pulls
/// each asset from its CDN URL.
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: reqwest::Client,
    base_url: String,
    max_file_size: u64,
}

impl DirectFetcher {
    pub fn new(base_url: &str, max_file_size: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_file_size,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.instagram_base_url, config.max_file_size)
    }

    /// Write the response body to `dest`, stopping at the size limit.
    async fn stream_to_file(&self, response: reqwest::Response, dest: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read media body")?;
            written += chunk.len() as u64;
            if written > self.max_file_size {
                anyhow::bail!("Media exceeds the {} byte limit", self.max_file_size);
            }
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<GraphqlData>,
    #[serde(default)]
    require_login: bool,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphqlData {
    xdt_shortcode_media: Option<MediaNode>,
}

#[derive(Debug, Deserialize)]
struct MediaNode {
    owner: Owner,
    #[serde(default)]
    edge_media_to_caption: Edges<CaptionNode>,
    edge_media_preview_like: Option<Counter>,
    edge_liked_by: Option<Counter>,
    edge_media_to_parent_comment: Option<Counter>,
    edge_media_to_comment: Option<Counter>,
    #[serde(default)]
    is_video: bool,
    video_view_count: Option<u64>,
    taken_at_timestamp: i64,
    display_url: Option<String>,
    video_url: Option<String>,
    edge_sidecar_to_children: Option<Edges<ChildNode>>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Edges<T> {
    edges: Vec<Edge<T>>,
}

impl<T> Default for Edges<T> {
    fn default() -> Self {
        Self { edges: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct CaptionNode {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Counter {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ChildNode {
    #[serde(default)]
    is_video: bool,
    display_url: Option<String>,
    video_url: Option<String>,
}

impl MediaNode {
    fn into_remote_post(self, shortcode: &Shortcode) -> Result<RemotePost> {
        let date = DateTime::from_timestamp(self.taken_at_timestamp, 0)
            .with_context(|| format!("Post {shortcode} has an invalid timestamp"))?;

        let media: Vec<RemoteMedia> = match self.edge_sidecar_to_children {
            Some(children) => children
                .edges
                .into_iter()
                .filter_map(|edge| {
                    remote_media(edge.node.is_video, edge.node.video_url, edge.node.display_url)
                })
                .collect(),
            None => remote_media(self.is_video, self.video_url, self.display_url)
                .into_iter()
                .collect(),
        };

        if media.is_empty() {
            anyhow::bail!("Instagram response for post {shortcode} lists no media");
        }

        let count = |c: Option<Counter>| c.map_or(0, |c| c.count);

        Ok(RemotePost {
            username: self.owner.username,
            caption: self
                .edge_media_to_caption
                .edges
                .into_iter()
                .next()
                .map(|edge| edge.node.text)
                .filter(|text| !text.is_empty()),
            likes: count(self.edge_media_preview_like.or(self.edge_liked_by)),
            comments: count(
                self.edge_media_to_parent_comment
                    .or(self.edge_media_to_comment),
            ),
            is_video: self.is_video,
            video_view_count: if self.is_video {
                self.video_view_count.unwrap_or(0)
            } else {
                0
            },
            date,
            media,
            staging: None,
        })
    }
}

fn remote_media(
    is_video: bool,
    video_url: Option<String>,
    display_url: Option<String>,
) -> Option<RemoteMedia> {
    let (kind, url) = match (is_video, video_url, display_url) {
        (true, Some(url), _) => (MediaKind::Video, url),
        (_, _, Some(url)) => (MediaKind::Image, url),
        _ => return None,
    };
    Some(RemoteMedia {
        kind,
        extension: url_extension(&url).unwrap_or_else(|| kind.default_extension().to_string()),
        payload: MediaPayload::Url(url),
    })
}

/// Extension of the last path segment of `url`, if it looks like one.
fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let ext = Path::new(parsed.path()).extension()?.to_str()?.to_lowercase();
    let plausible = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plausible.then_some(ext)
}

#[async_trait]
impl PostFetcher for DirectFetcher {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch_post(&self, shortcode: &Shortcode) -> Result<RemotePost> {
        let url = format!("{}/graphql/query", self.base_url);
        let variables = serde_json::json!({ "shortcode": shortcode.as_str() }).to_string();

        debug!(shortcode = %shortcode, url = %url, "Querying Instagram");

        let response = self
            .client
            .post(&url)
            .header("X-IG-App-ID", WEB_APP_ID)
            .form(&[("variables", variables.as_str()), ("doc_id", POST_DOC_ID)])
            .send()
            .await
            .context("Failed to query Instagram")?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                anyhow::bail!("Login required to view post {shortcode}")
            }
            StatusCode::NOT_FOUND => anyhow::bail!("Not found: post {shortcode}"),
            status if !status.is_success() => {
                anyhow::bail!("Instagram returned {status} for post {shortcode}")
            }
            _ => {}
        }

        let body: GraphqlResponse = response
            .json()
            .await
            .context("Failed to parse Instagram response")?;

        if body.require_login {
            anyhow::bail!("Login required to view post {shortcode}");
        }
        if body.status.as_deref() == Some("fail") {
            anyhow::bail!(
                "Instagram refused the request: {}",
                body.message.as_deref().unwrap_or("no reason given")
            );
        }

        let node = body
            .data
            .and_then(|d| d.xdt_shortcode_media)
            .with_context(|| format!("Not found: post {shortcode} has no media node"))?;

        node.into_remote_post(shortcode)
    }

    async fn fetch_media(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to download media")?
            .error_for_status()
            .context("Media download returned error")?;

        if let Some(len) = response.content_length() {
            if len > self.max_file_size {
                anyhow::bail!(
                    "Media is {len} bytes, over the {} byte limit",
                    self.max_file_size
                );
            }
        }

        let result = self.stream_to_file(response, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        let written = result?;

        debug!(url = %url, path = %dest.display(), bytes = written, "Downloaded media");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(json: serde_json::Value) -> MediaNode {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(
            url_extension("https://cdn.example/v/t51/123_n.jpg?stp=dst&_nc=1").as_deref(),
            Some("jpg")
        );
        assert_eq!(url_extension("https://cdn.example/a/b.MP4").as_deref(), Some("mp4"));
        assert_eq!(url_extension("https://cdn.example/a/b"), None);
        assert_eq!(url_extension("https://cdn.example/a/b.not-an-ext"), None);
        assert_eq!(url_extension("not a url"), None);
    }

    #[test]
    fn test_single_video_node() {
        let post = node(serde_json::json!({
            "owner": {"username": "alice"},
            "edge_media_to_caption": {"edges": [{"node": {"text": "hi"}}]},
            "edge_media_preview_like": {"count": 10},
            "edge_media_to_parent_comment": {"count": 2},
            "is_video": true,
            "video_view_count": 500,
            "taken_at_timestamp": 1_704_110_400,
            "display_url": "https://cdn.example/thumb.jpg",
            "video_url": "https://cdn.example/clip.mp4"
        }))
        .into_remote_post(&Shortcode::new("XYZ789"))
        .unwrap();

        assert_eq!(post.username, "alice");
        assert_eq!(post.caption.as_deref(), Some("hi"));
        assert_eq!((post.likes, post.comments), (10, 2));
        assert!(post.is_video);
        assert_eq!(post.video_view_count, 500);
        assert_eq!(post.date.to_rfc3339(), "2024-01-01T12:00:00+00:00");
        assert_eq!(post.media.len(), 1);
        assert_eq!(post.media[0].kind, MediaKind::Video);
        assert_eq!(post.media[0].extension, "mp4");
    }

    #[test]
    fn test_sidecar_node_keeps_child_order() {
        let post = node(serde_json::json!({
            "owner": {"username": "bob"},
            "edge_liked_by": {"count": 3},
            "edge_media_to_comment": {"count": 1},
            "is_video": false,
            "video_view_count": 99,
            "taken_at_timestamp": 0,
            "display_url": "https://cdn.example/cover.jpg",
            "edge_sidecar_to_children": {"edges": [
                {"node": {"is_video": false, "display_url": "https://cdn.example/1.jpg"}},
                {"node": {"is_video": true, "display_url": "https://cdn.example/2.jpg",
                          "video_url": "https://cdn.example/2.mp4"}},
                {"node": {"is_video": false, "display_url": "https://cdn.example/3.webp"}}
            ]}
        }))
        .into_remote_post(&Shortcode::new("SIDE"))
        .unwrap();

        assert!(post.caption.is_none());
        assert_eq!((post.likes, post.comments), (3, 1));
        assert_eq!(post.video_view_count, 0);
        let urls: Vec<&str> = post
            .media
            .iter()
            .map(|m| match &m.payload {
                MediaPayload::Url(u) => u.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/1.jpg",
                "https://cdn.example/2.mp4",
                "https://cdn.example/3.webp"
            ]
        );
        assert_eq!(post.media[2].extension, "webp");
    }

    #[test]
    fn test_node_without_media_fails() {
        let result = node(serde_json::json!({
            "owner": {"username": "bob"},
            "taken_at_timestamp": 0
        }))
        .into_remote_post(&Shortcode::new("NONE"));
        assert!(result.is_err());
    }
}
