use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{CAPTION_PREVIEW_CHARS, RECORD_DATE_FORMAT};

/// Opaque token identifying one Instagram post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shortcode(String);

impl Shortcode {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Shortcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a downloaded media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a file by its extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let mime = mime_guess::from_path(path).first()?;
        if mime.type_() == mime_guess::mime::IMAGE {
            Some(Self::Image)
        } else if mime.type_() == mime_guess::mime::VIDEO {
            Some(Self::Video)
        } else {
            None
        }
    }

    /// Extension used when the source gives no better hint.
    #[must_use]
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
        }
    }
}

/// One downloaded file belonging to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: Option<MediaKind>,
}

/// Cached metadata and media list for one post.
///
/// Field order is the on-disk order of the sidecar JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub shortcode: Shortcode,
    pub username: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub video_view_count: u64,
    #[serde(with = "record_date")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub file_paths: Vec<PathBuf>,
}

impl PostRecord {
    /// Caption cut to a short preview, with `...` appended when shortened.
    #[must_use]
    pub fn caption_preview(&self) -> Option<String> {
        let caption = self.caption.as_deref()?;
        if caption.chars().count() > CAPTION_PREVIEW_CHARS {
            let head: String = caption.chars().take(CAPTION_PREVIEW_CHARS).collect();
            Some(format!("{head}..."))
        } else {
            Some(caption.to_string())
        }
    }

    /// Publish date in sidecar format.
    #[must_use]
    pub fn date_display(&self) -> String {
        self.date.format(RECORD_DATE_FORMAT).to_string()
    }

    /// Files in delivery order, each tagged with its kind.
    #[must_use]
    pub fn assets(&self) -> Vec<MediaAsset> {
        self.file_paths
            .iter()
            .map(|path| MediaAsset {
                kind: MediaKind::from_path(path),
                path: path.clone(),
            })
            .collect()
    }
}

mod record_date {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::constants::RECORD_DATE_FORMAT;

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format(RECORD_DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, RECORD_DATE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> PostRecord {
        PostRecord {
            shortcode: Shortcode::new("ABC123"),
            username: "alice".to_string(),
            caption: Some("سلام دنیا".to_string()),
            likes: 10,
            comments: 2,
            is_video: true,
            video_view_count: 500,
            date: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            file_paths: vec![PathBuf::from("/cache/ABC123/ABC123_1.mp4")],
        }
    }

    #[test]
    fn test_sidecar_layout() {
        let json = serde_json::to_string_pretty(&sample()).unwrap();

        // Non-Latin captions are written as-is
        assert!(json.contains("سلام دنیا"));
        assert!(json.contains(r#""date": "2024-01-01 12:00:00""#));

        let keys = [
            "shortcode",
            "username",
            "caption",
            "likes",
            "comments",
            "is_video",
            "video_view_count",
            "date",
            "file_paths",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| json.find(&format!("\"{k}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sidecar_parses_back() {
        let json = serde_json::to_string(&sample()).unwrap();
        let parsed: PostRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_sidecar_null_caption() {
        let json = r#"{
            "shortcode": "X1",
            "username": "bob",
            "caption": null,
            "likes": 0,
            "comments": 0,
            "is_video": false,
            "video_view_count": 0,
            "date": "2023-05-06 07:08:09",
            "file_paths": []
        }"#;
        let parsed: PostRecord = serde_json::from_str(json).unwrap();
        assert!(parsed.caption.is_none());
        assert_eq!(parsed.date_display(), "2023-05-06 07:08:09");
    }

    #[test]
    fn test_sidecar_rejects_bad_date() {
        let json = r#"{"shortcode": "X1", "username": "bob", "date": "yesterday"}"#;
        assert!(serde_json::from_str::<PostRecord>(json).is_err());
    }

    #[test]
    fn test_caption_preview() {
        let mut record = sample();
        record.caption = Some("a".repeat(150));
        let preview = record.caption_preview().unwrap();
        assert_eq!(preview.chars().count(), 103);
        assert!(preview.ends_with("..."));

        record.caption = Some("short".to_string());
        assert_eq!(record.caption_preview().unwrap(), "short");

        record.caption = None;
        assert!(record.caption_preview().is_none());
    }

    #[test]
    fn test_media_kind_from_path() {
        assert_eq!(MediaKind::from_path(Path::new("a.jpg")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("a.PNG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("a.webp")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("a.mp4")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("a.mov")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("a.json")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_assets_keep_order() {
        let mut record = sample();
        record.file_paths = vec![PathBuf::from("b_1.jpg"), PathBuf::from("b_2.mp4")];
        let assets = record.assets();
        assert_eq!(assets[0].kind, Some(MediaKind::Image));
        assert_eq!(assets[1].kind, Some(MediaKind::Video));
        assert_eq!(assets[1].path, PathBuf::from("b_2.mp4"));
    }
}
