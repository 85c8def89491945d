// src/artifacts.rs
//! Turns downloaded video bytes into a file on disk the user can open.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::GenerationError;
use crate::types::VideoResource;

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes `bytes` to `<output_dir>/<id>.mp4`.
    pub async fn save(&self, id: &str, bytes: &[u8]) -> Result<VideoResource, GenerationError> {
        if bytes.is_empty() {
            return Err(GenerationError::Retrieval(
                "Failed to fetch video: the downloaded file is empty".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            GenerationError::Storage(format!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let path = self.output_dir.join(format!("{}.mp4", sanitize_file_stem(id)));
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            GenerationError::Storage(format!("Failed to save video to {}: {}", path.display(), e))
        })?;

        let sha256 = hex::encode(Sha256::digest(bytes));
        tracing::info!("🎞️ Saved {} bytes of video to {}", bytes.len(), path.display());

        Ok(VideoResource {
            path,
            size_bytes: bytes.len() as u64,
            sha256,
        })
    }
}

fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_writes_file_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("outputs"));

        let video = writer.save("20250314T092653.000Z-abc", b"mp4 bytes").await.unwrap();
        assert_eq!(video.size_bytes, 9);
        assert_eq!(tokio::fs::read(&video.path).await.unwrap(), b"mp4 bytes");
        assert_eq!(video.sha256.len(), 64);
        assert_eq!(
            video.path.file_name().and_then(|n| n.to_str()),
            Some("20250314T092653_000Z-abc.mp4")
        );
    }

    #[tokio::test]
    async fn test_empty_payload_is_a_retrieval_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let err = writer.save("x", &[]).await.unwrap_err();
        assert_eq!(err.kind(), "retrieval");
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("../etc/passwd"), "___etc_passwd");
    }
}
