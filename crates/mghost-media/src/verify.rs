//! Output integrity checks.
//!
//! A writer whose codec failed to initialise can still leave a file behind,
//! typically a bare container header. These checks make sure such artifacts
//! are reported and removed rather than returned as success.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use mghost_models::VideoInfo;

use crate::error::{MediaError, MediaResult};
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::video::VideoBackend;

/// Check that `path` exists and is larger than `min_bytes`. Returns its size.
pub async fn verify_output(path: &Path, min_bytes: u64) -> MediaResult<u64> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };

    if size == 0 {
        return Err(MediaError::EmptyOutput(path.to_path_buf()));
    }
    if size <= min_bytes {
        return Err(MediaError::TruncatedOutput {
            path: path.to_path_buf(),
            size,
            min_bytes,
        });
    }

    debug!(path = %path.display(), size, "Output passed size check");
    Ok(size)
}

/// Fail if `output` is byte-identical to `source`.
pub async fn ensure_modified(source: &Path, output: &Path) -> MediaResult<()> {
    let source_len = tokio::fs::metadata(source).await?.len();
    let output_len = tokio::fs::metadata(output).await?.len();
    if source_len != output_len {
        return Ok(());
    }

    if sha256_file(source).await? == sha256_file(output).await? {
        return Err(MediaError::UnmodifiedOutput(output.to_path_buf()));
    }
    Ok(())
}

/// SHA-256 digest of a file's contents.
pub async fn sha256_file(path: &Path) -> MediaResult<[u8; 32]> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Remove a corrupt artifact. Failures are logged, not returned.
pub async fn discard_corrupt(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => warn!(path = %path.display(), "Removed corrupt output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove corrupt output"),
    }
}

/// Read final output metadata, retrying transient failures. After the
/// retries are exhausted returns size-only metadata with a note.
pub async fn probe_metadata(
    backend: &dyn VideoBackend,
    path: &Path,
    retry: &RetryConfig,
) -> VideoInfo {
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

    let result = retry_async(
        retry,
        |e: &MediaError| !matches!(e, MediaError::FileNotFound(_)),
        || async move { backend.open_reader(path).await.map(|r| *r.metadata()) },
    )
    .await;

    match result {
        RetryResult::Success(meta) => {
            VideoInfo::complete(meta.width, meta.height, meta.fps, meta.frame_count, size)
        }
        RetryResult::Failed { error, attempts } => {
            warn!(
                path = %path.display(),
                attempts,
                error = %error,
                "Could not read output metadata, returning partial info"
            );
            VideoInfo::partial(
                size,
                format!("metadata unavailable after {} attempt(s): {}", attempts, error),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::video::{RawBackend, VideoSink, WriterTarget};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_verify_output_thresholds() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.mp4");
        assert!(matches!(
            verify_output(&missing, 256).await,
            Err(MediaError::EmptyOutput(_))
        ));

        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            verify_output(&empty, 256).await,
            Err(MediaError::EmptyOutput(_))
        ));

        let header_only = dir.path().join("header.mp4");
        std::fs::write(&header_only, vec![0u8; 256]).unwrap();
        assert!(matches!(
            verify_output(&header_only, 256).await,
            Err(MediaError::TruncatedOutput { size: 256, .. })
        ));

        let ok = dir.path().join("ok.mp4");
        std::fs::write(&ok, vec![0u8; 257]).unwrap();
        assert_eq!(verify_output(&ok, 256).await.unwrap(), 257);
    }

    #[tokio::test]
    async fn test_ensure_modified() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        let copy = dir.path().join("copy.bin");
        let changed = dir.path().join("changed.bin");
        std::fs::write(&source, vec![1u8; 1000]).unwrap();
        std::fs::write(&copy, vec![1u8; 1000]).unwrap();
        let mut bytes = vec![1u8; 1000];
        bytes[500] = 2;
        std::fs::write(&changed, bytes).unwrap();

        assert!(matches!(
            ensure_modified(&source, &copy).await,
            Err(MediaError::UnmodifiedOutput(_))
        ));
        assert!(ensure_modified(&source, &changed).await.is_ok());
    }

    #[tokio::test]
    async fn test_discard_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.mp4");
        std::fs::write(&path, b"x").unwrap();
        discard_corrupt(&path).await;
        assert!(!path.exists());
        discard_corrupt(&path).await;
    }

    #[tokio::test]
    async fn test_probe_metadata_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.mgr");
        let target = WriterTarget {
            width: 4,
            height: 4,
            fps: 10.0,
        };
        let backend = RawBackend::new();
        let mut sink = backend.open_writer(&path, &target, "mp4v").await.unwrap();
        for _ in 0..5 {
            sink.write_frame(&Frame::filled(4, 4, 50.0)).await.unwrap();
        }
        sink.close().await.unwrap();

        let retry = RetryConfig::new("test").with_fixed_delay(Duration::from_millis(1));
        let info = probe_metadata(&backend, &path, &retry).await;
        assert!(!info.is_partial());
        assert_eq!(info.frame_count, Some(5));
        assert_eq!(info.width, Some(4));
    }

    #[tokio::test]
    async fn test_probe_metadata_partial_after_retries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.mgr");
        std::fs::write(&path, vec![9u8; 400]).unwrap();

        let retry = RetryConfig::new("test")
            .with_max_attempts(3)
            .with_fixed_delay(Duration::from_millis(1));
        let info = probe_metadata(&RawBackend::new(), &path, &retry).await;
        assert!(info.is_partial());
        assert_eq!(info.size_bytes, 400);
        assert!(info.note.unwrap().contains("3 attempt"));
    }
}
