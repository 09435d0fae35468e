//! Filesystem helpers for output artifacts.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Suffix of the audio-less intermediate written next to the output.
pub const INTERMEDIATE_SUFFIX: &str = "_temp_no_audio";

/// `<dir>/<stem>_temp_no_audio.<ext>` for an output path.
pub fn intermediate_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{}{}.{}", stem, INTERMEDIATE_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, INTERMEDIATE_SUFFIX),
    };
    output.with_file_name(name)
}

/// `path` with symlinks and `.`/`..` resolved. Paths that do not exist yet
/// resolve through their parent directory.
pub fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// Reject an output whose final file or intermediate would land on the
/// source video.
pub fn check_output_paths(source: &Path, output: &Path) -> MediaResult<()> {
    let source = resolve_path(source);
    if resolve_path(output) == source {
        return Err(MediaError::invalid(format!(
            "output_path resolves to the source video {}",
            source.display()
        )));
    }
    if resolve_path(&intermediate_path(output)) == source {
        return Err(MediaError::invalid(format!(
            "the intermediate for {} would overwrite the source video {}",
            output.display(),
            source.display()
        )));
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_if_exists(path: &Path) -> MediaResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Move a file from `src` to `dst`, replacing `dst` and handling
/// cross-device moves.
///
/// Tries a rename first. On EXDEV it copies to a temporary file beside
/// `dst`, renames that into place and deletes the source.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    // Windows refuses to rename over an existing file.
    if cfg!(windows) {
        remove_if_exists(dst).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is error code 18 on Linux/macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Copy failed during cross-device move: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source after cross-device move: {}: {}",
            src.display(),
            e
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_intermediate_path() {
        assert_eq!(
            intermediate_path(Path::new("/out/clip.mp4")),
            PathBuf::from("/out/clip_temp_no_audio.mp4")
        );
        assert_eq!(
            intermediate_path(Path::new("clip")),
            PathBuf::from("clip_temp_no_audio")
        );
    }

    #[tokio::test]
    async fn test_check_output_paths() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("clip_temp_no_audio.mgr");
        tokio::fs::write(&source, b"video").await.unwrap();

        let clash = check_output_paths(&source, &temp_dir.path().join("clip.mgr"));
        assert!(matches!(clash, Err(MediaError::InvalidParameter(_))));

        let dotted = temp_dir.path().join(".").join("clip_temp_no_audio.mgr");
        let same = check_output_paths(&source, &dotted);
        assert!(matches!(same, Err(MediaError::InvalidParameter(_))));

        check_output_paths(&source, &temp_dir.path().join("out/clip.mgr")).unwrap();
        check_output_paths(&source, &temp_dir.path().join("marked.mgr")).unwrap();
    }

    #[tokio::test]
    async fn test_move_file_same_device() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("source.mgr");
        let dst = temp_dir.path().join("nested/dir/dest.mgr");

        tokio::fs::write(&src, b"test content").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"test content");
    }

    #[tokio::test]
    async fn test_move_file_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("new.mgr");
        let dst = temp_dir.path().join("old.mgr");
        tokio::fs::write(&src, b"new").await.unwrap();
        tokio::fs::write(&dst, b"old").await.unwrap();

        move_file(&src, &dst).await.unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_remove_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone");
        remove_if_exists(&path).await.unwrap();
        tokio::fs::write(&path, b"x").await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
