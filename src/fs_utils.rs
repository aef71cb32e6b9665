use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Move a file, falling back to copy-and-delete when a rename crosses filesystems.
///
/// Staging directories live under the system temp dir, which is often a
/// different mount than the cache root.
pub async fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    match tokio::fs::rename(src, dst).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "Rename failed, copying instead"
            );
        }
    }

    tokio::fs::copy(src, dst).await.with_context(|| {
        format!("Failed to copy {} to {}", src.display(), dst.display())
    })?;
    tokio::fs::remove_file(src)
        .await
        .with_context(|| format!("Failed to remove staged file: {}", src.display()))?;

    Ok(())
}

/// Whether `path` currently names a regular file.
pub async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_creates_parent() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("staged.jpg");
        let dst = temp.path().join("nested").join("dir").join("final.jpg");
        tokio::fs::write(&src, b"jpeg").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!is_file(&src).await);
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let result = move_file(&temp.path().join("nope"), &temp.path().join("dst")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_is_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.mp4");
        tokio::fs::write(&file, b"x").await.unwrap();

        assert!(is_file(&file).await);
        assert!(!is_file(temp.path()).await);
        assert!(!is_file(&temp.path().join("missing")).await);
    }
}
