//! Filesystem utilities for segment handling and output verification.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Attempts a fast rename first; on EXDEV falls back to copy-and-delete,
/// staging the copy next to the destination so the final rename stays
/// atomic on the destination filesystem.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Copy file to destination (via temp file) then delete source.
async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await?;

    fs::rename(&tmp_dst, dst).await.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_dst);
        MediaError::from(e)
    })?;

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Make `dst` refer to the contents of `src` without re-encoding:
/// a symlink where the platform allows it, a copy otherwise.
pub async fn link_or_copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref().to_path_buf();
    let dst = dst.as_ref().to_path_buf();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    if dst.exists() {
        fs::remove_file(&dst).await?;
    }

    #[cfg(unix)]
    {
        match fs::symlink(&src, &dst).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(
                    "Symlink failed, falling back to copy: {} -> {}: {}",
                    src.display(),
                    dst.display(),
                    e
                );
            }
        }
    }

    fs::copy(&src, &dst).await?;
    Ok(())
}

/// Verify that an output file exists and is non-empty.
pub async fn verify_non_empty(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    match fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(MediaError::EmptyOutput(path.to_path_buf())),
        Err(_) => Err(MediaError::EmptyOutput(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.mp4");
        let dst = dir.path().join("dest.mp4");

        fs::write(&src, b"test content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists(), "Source file should be removed");
        assert!(dst.exists(), "Destination file should exist");
    }

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.mp4");
        let dst = dir.path().join("results").join("owner").join("dest.mp4");

        fs::write(&src, b"test content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn test_link_or_copy_preserves_content() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("segment.mp4");
        let dst = dir.path().join("segments").join("segment_000.mp4");

        fs::write(&src, b"segment bytes").await.unwrap();

        link_or_copy(&src, &dst).await.unwrap();

        assert_eq!(fs::read(&dst).await.unwrap(), b"segment bytes");
        // Source must survive; the segment only borrows it
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_verify_non_empty() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.mp4");
        let full = dir.path().join("full.mp4");
        fs::write(&empty, b"").await.unwrap();
        fs::write(&full, b"data").await.unwrap();

        assert!(verify_non_empty(&empty).await.is_err());
        assert!(verify_non_empty(dir.path().join("missing.mp4")).await.is_err());
        assert_eq!(verify_non_empty(&full).await.unwrap(), 4);
    }

    #[test]
    fn test_is_cross_device_error() {
        let exdev_error = std::io::Error::from_raw_os_error(18);
        assert!(is_cross_device_error(&exdev_error));

        let not_found = std::io::Error::from_raw_os_error(2);
        assert!(!is_cross_device_error(&not_found));
    }
}
