//! Instagram link recognition.
//!
//! `validate` and `extract_shortcode` are independent searches. Story links
//! validate but carry no shortcode, and the shortcode search is unanchored.

use regex::Regex;

use crate::post::Shortcode;

static PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![
        // Posts
        Regex::new(r"^https?://(www\.)?instagram\.com/p/[A-Za-z0-9_-]+/?").unwrap(),
        // Reels
        Regex::new(r"^https?://(www\.)?instagram\.com/reel/[A-Za-z0-9_-]+/?").unwrap(),
        // Instagram TV
        Regex::new(r"^https?://(www\.)?instagram\.com/tv/[A-Za-z0-9_-]+/?").unwrap(),
        // Stories
        Regex::new(r"^https?://(www\.)?instagram\.com/stories/[A-Za-z0-9_.]+/[0-9]+/?").unwrap(),
    ]
});

// Tried in order, first match wins.
static SHORTCODE_PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![
        Regex::new(r"/p/([A-Za-z0-9_-]+)").unwrap(),
        Regex::new(r"/reel/([A-Za-z0-9_-]+)").unwrap(),
        Regex::new(r"/tv/([A-Za-z0-9_-]+)").unwrap(),
    ]
});

/// Check whether `url` is a supported Instagram post, reel, TV or story link.
#[must_use]
pub fn validate(url: &str) -> bool {
    PATTERNS.iter().any(|p| p.is_match(url))
}

/// Pull the post shortcode out of a `/p/`, `/reel/` or `/tv/` link.
#[must_use]
pub fn extract_shortcode(url: &str) -> Option<Shortcode> {
    SHORTCODE_PATTERNS.iter().find_map(|p| {
        p.captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| Shortcode::new(m.as_str()))
    })
}

/// Cheap pre-filter for chat messages that look like Instagram links.
#[must_use]
pub fn mentions_instagram(text: &str) -> bool {
    text.contains("instagram.com")
}

/// Canonical post URL for a shortcode.
#[must_use]
pub fn canonical_post_url(shortcode: &Shortcode) -> String {
    format!("https://www.instagram.com/p/{shortcode}/")
}
