use thiserror::Error;

/// Outcome of a failed download workflow run.
///
/// Every failure path of the workflow ends in one of these; callers decide
/// how to present them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The link is malformed, unsupported, or carries no shortcode.
    #[error("invalid link: {0}")]
    Validation(String),
    /// The post does not exist or was deleted.
    #[error("post not found: {0}")]
    NotFound(String),
    /// The post needs a logged-in session.
    #[error("post is private: {0}")]
    Private(String),
    /// Any other remote failure, message kept verbatim.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// Neither the fetch nor the cache produced a usable file.
    #[error("no usable files (from cache: {from_cache})")]
    EmptyResult { from_cache: bool },
    /// Reading or writing the cache directory failed.
    #[error("cache storage error: {0}")]
    Filesystem(String),
}

impl DownloadError {
    /// Classify a strategy failure by its message.
    #[must_use]
    pub fn from_fetch_failure(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("login required") {
            Self::Private(message)
        } else if lower.contains("not found") {
            Self::NotFound(message)
        } else {
            Self::Fetch(message)
        }
    }

    /// Filesystem error from any cache-layer failure.
    #[must_use]
    pub fn filesystem(err: &anyhow::Error) -> Self {
        Self::Filesystem(format!("{err:#}"))
    }

    /// Stable tag for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Private(_) => "private",
            Self::Fetch(_) => "fetch_error",
            Self::EmptyResult { .. } => "empty_result",
            Self::Filesystem(_) => "filesystem",
        }
    }
}
