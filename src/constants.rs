//! Shared constants used across the application.

/// User agent string used for requests to Instagram.
///
/// A realistic desktop browser user agent; the public endpoints refuse
/// obviously scripted clients.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Largest file the Telegram Bot API accepts from a local Bot API server (2 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Caption characters shown before a preview is cut off.
pub const CAPTION_PREVIEW_CHARS: usize = 100;

/// Suffix of the per-post sidecar record file.
pub const METADATA_SUFFIX: &str = "_metadata.json";

/// Timestamp format used in sidecar records.
pub const RECORD_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
