// types.rs - Request and record types shared by the client, workflow and history store
use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::GenerationError;
use crate::voices;

/// Largest logo/mascot image accepted for upload.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Image sent alongside the prompt, already base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data_base64: String,
    pub mime_type: String,
    pub source: Option<PathBuf>,
}

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Result<Self, GenerationError> {
        if bytes.is_empty() {
            return Err(GenerationError::Validation("The image file is empty.".to_string()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(GenerationError::Validation(format!(
                "The image is {} bytes; the limit is 10MB.",
                bytes.len()
            )));
        }
        Ok(Self {
            data_base64: BASE64_STANDARD.encode(bytes),
            mime_type: mime_type.into(),
            source: None,
        })
    }

    /// Loads a PNG, JPG or SVG from disk, deriving the mime type from the extension.
    pub async fn from_file(path: &Path) -> Result<Self, GenerationError> {
        let mime_type = mime_type_for(path).ok_or_else(|| {
            GenerationError::Validation(format!(
                "Unsupported image type for {}. Use PNG, JPG or SVG.",
                path.display()
            ))
        })?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            GenerationError::Validation(format!("Failed to read image {}: {}", path.display(), e))
        })?;

        let mut payload = Self::from_bytes(&bytes, mime_type)?;
        payload.source = Some(path.to_path_buf());
        Ok(payload)
    }

    /// How the image is referred to from a history record: the source path
    /// when known, otherwise an inline data URL.
    pub fn reference(&self) -> String {
        match &self.source {
            Some(path) => path.display().to_string(),
            None => format!("data:{};base64,{}", self.mime_type, self.data_base64),
        }
    }
}

pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// A validated generation request. Immutable once built.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    image: ImagePayload,
    voice_id: String,
}

impl GenerationRequest {
    /// Rejects an empty prompt, a missing image or a voice outside the catalog.
    pub fn new(
        prompt: impl Into<String>,
        image: Option<ImagePayload>,
        voice_id: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let prompt = prompt.into();
        let voice_id = voice_id.into();

        if prompt.trim().is_empty() {
            return Err(GenerationError::Validation(
                "Please fill in the prompt and attach an image.".to_string(),
            ));
        }
        let image = match image {
            Some(image) if !image.data_base64.is_empty() => image,
            _ => {
                return Err(GenerationError::Validation(
                    "Please fill in the prompt and attach an image.".to_string(),
                ))
            }
        };
        if voices::find_voice(&voice_id).is_none() {
            return Err(GenerationError::Validation(format!("Unknown voice: {}", voice_id)));
        }

        Ok(Self { prompt, image, voice_id })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn image(&self) -> &ImagePayload {
        &self.image
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    pub fn voice_name(&self) -> &'static str {
        voices::find_voice(&self.voice_id)
            .map(|v| v.name)
            .unwrap_or("Unknown")
    }
}

/// Locally addressable handle for a downloaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResource {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// One successful generation, as persisted in the history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub prompt: String,
    pub image_reference: String,
    pub voice_name: String,
    pub video_reference: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(id: String, request: &GenerationRequest, video: &VideoResource, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            prompt: request.prompt().to_string(),
            image_reference: request.image().reference(),
            voice_name: request.voice_name().to_string(),
            video_reference: video.path.display().to_string(),
            created_at,
        }
    }
}

/// Unique, time-ordered record id: millisecond timestamp plus a random suffix.
pub fn new_record_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%S%.3fZ"), &suffix[..8])
}
