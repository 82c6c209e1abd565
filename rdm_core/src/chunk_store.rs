//! Chunk store (component C4) — per-segment sidecar files plus merge into
//! the final destination file.
//!
//! Grounded on `segment_grabber.rs` (append-mode writes via
//! `tokio::fs::OpenOptions`, a 256 KiB `BufWriter`) and
//! `multipart_download_strategy.rs`'s `postprocess` (spawn_blocking std
//! concatenation of ordered piece files, cleanup of the temp directory).

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::DownloadError;
use crate::segmenter::Segment;

/// Sidecar path for segment `index` of `dest_path`: `${dest_path}.chunk${i}`.
pub fn sidecar_path(dest_path: &Path, index: usize) -> PathBuf {
    let mut name = dest_path.as_os_str().to_owned();
    name.push(format!(".chunk{}", index));
    PathBuf::from(name)
}

/// Size of an existing sidecar, or 0 if it doesn't exist yet. Used on resume
/// to adopt already-downloaded progress for a segment.
pub async fn sidecar_size(dest_path: &Path, index: usize) -> u64 {
    tokio::fs::metadata(sidecar_path(dest_path, index))
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// A handle to one segment's sidecar file, append-only.
pub struct SegmentWriter {
    writer: BufWriter<tokio::fs::File>,
}

impl SegmentWriter {
    /// Opens the sidecar for segment `index`, appending if it already has
    /// bytes on it (resume) or truncating/creating fresh otherwise.
    pub async fn open(dest_path: &Path, index: usize, existing_bytes: u64) -> Result<Self, DownloadError> {
        let path = sidecar_path(dest_path, index);
        let file = if existing_bytes > 0 {
            OpenOptions::new().append(true).open(&path).await?
        } else {
            tokio::fs::File::create(&path).await?
        };
        Ok(Self {
            writer: BufWriter::with_capacity(256 * 1024, file),
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), DownloadError> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), DownloadError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Single-segment mode writer: appends/creates directly at `dest_path`
/// without a sidecar.
pub async fn open_direct(dest_path: &Path, existing_bytes: u64) -> Result<SegmentWriter, DownloadError> {
    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = if existing_bytes > 0 {
        OpenOptions::new().append(true).open(dest_path).await?
    } else {
        tokio::fs::File::create(dest_path).await?
    };
    Ok(SegmentWriter {
        writer: BufWriter::with_capacity(256 * 1024, file),
    })
}

/// Concatenates every segment's sidecar, in index order, into `dest_path`,
/// then removes the sidecars. Verifies the sum of sidecar sizes against
/// `total_size` (when known) before touching the destination file, failing
/// with `Corrupt` on mismatch — stricter than the source, which merged
/// unconditionally. Sidecars are only removed after the concatenation
/// succeeds, so a crash mid-merge leaves them intact for a later retry.
pub async fn merge(dest_path: &Path, segments: &[Segment], total_size: Option<u64>) -> Result<(), DownloadError> {
    let paths: Vec<PathBuf> = (0..segments.len())
        .map(|i| sidecar_path(dest_path, i))
        .collect();

    let mut sum = 0u64;
    for path in &paths {
        sum += tokio::fs::metadata(path).await?.len();
    }
    if let Some(total) = total_size {
        if sum != total {
            return Err(DownloadError::Corrupt(format!(
                "sidecar sizes sum to {} but expected {}",
                sum, total
            )));
        }
    }

    let dest_path = dest_path.to_owned();
    let merge_paths = paths.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&dest_path)?;
        for path in &merge_paths {
            let mut input = std::fs::File::open(path)?;
            std::io::copy(&mut input, &mut out)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| DownloadError::Corrupt(e.to_string()))??;

    for path in &paths {
        let _ = tokio::fs::remove_file(path).await;
    }
    Ok(())
}

/// Removes every sidecar for an item (used by `stop`).
pub async fn remove_sidecars(dest_path: &Path, segment_count: usize) {
    for i in 0..segment_count {
        let _ = tokio::fs::remove_file(sidecar_path(dest_path, i)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sidecar_paths_are_indexed() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("movie.mp4");
        assert_eq!(
            sidecar_path(&dest, 2),
            dir.path().join("movie.mp4.chunk2")
        );
    }

    #[tokio::test]
    async fn resume_adopts_existing_sidecar_size() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("movie.mp4");
        let mut writer = SegmentWriter::open(&dest, 0, 0).await.unwrap();
        writer.write_all(b"hello").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        assert_eq!(sidecar_size(&dest, 0).await, 5);

        let mut writer = SegmentWriter::open(&dest, 0, 5).await.unwrap();
        writer.write_all(b" world").await.unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        assert_eq!(sidecar_size(&dest, 0).await, 11);
    }

    #[tokio::test]
    async fn merge_concatenates_in_order_and_removes_sidecars() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let segments = vec![
            Segment { start: 0, end: 5 },
            Segment { start: 5, end: 11 },
        ];

        let mut w0 = SegmentWriter::open(&dest, 0, 0).await.unwrap();
        w0.write_all(b"hello").await.unwrap();
        w0.flush().await.unwrap();
        let mut w1 = SegmentWriter::open(&dest, 1, 0).await.unwrap();
        w1.write_all(b" world").await.unwrap();
        w1.flush().await.unwrap();
        drop(w0);
        drop(w1);

        merge(&dest, &segments, Some(11)).await.unwrap();

        let contents = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(contents, b"hello world");
        assert!(!sidecar_path(&dest, 0).exists());
        assert!(!sidecar_path(&dest, 1).exists());
    }

    #[tokio::test]
    async fn merge_fails_on_size_mismatch() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let segments = vec![Segment { start: 0, end: 5 }];

        let mut w0 = SegmentWriter::open(&dest, 0, 0).await.unwrap();
        w0.write_all(b"hi").await.unwrap();
        w0.flush().await.unwrap();
        drop(w0);

        let result = merge(&dest, &segments, Some(5)).await;
        assert!(matches!(result, Err(DownloadError::Corrupt(_))));
        // Sidecar preserved after a failed merge.
        assert!(sidecar_path(&dest, 0).exists());
    }
}
