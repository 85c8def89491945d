use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::{Settings, VideoOutputConfig};
use crate::credentials::ApiKey;
use crate::error::{classify, ErrorClass, ErrorPayload, GenerationError};
use crate::jobs::{JobHandle, JobStatus};
use crate::types::GenerationRequest;

/// Remote long-running video generation.
#[async_trait]
pub trait VideoGenerationApi: Send + Sync {
    /// Starts a job. Never retried, so a failure here creates no remote work.
    async fn submit(&self, request: &GenerationRequest, key: &ApiKey) -> Result<JobHandle, GenerationError>;

    /// Current server-side state of a job. Safe to call repeatedly.
    async fn poll(&self, handle: &JobHandle, key: &ApiKey) -> Result<JobStatus, GenerationError>;

    /// Downloads the finished video.
    async fn fetch_artifact(&self, locator: &str, key: &ApiKey) -> Result<Vec<u8>, GenerationError>;
}

/// Wraps the user's idea in the fixed creative brief sent to the model.
pub fn compose_prompt(prompt: &str) -> String {
    format!(
        "Crie um vídeo de propaganda animado com duração de 15 a 30 segundos baseado no seguinte: \"{}\". \
O vídeo deve incorporar o logotipo/mascote fornecido com animações dinâmicas como entrada, brilho e movimento. \
Inclua textos sobrepostos com slogans e chamadas para ação. O estilo deve ser vibrante e moderno.",
        prompt
    )
}

// ============================================================================
// WIRE STRUCTURES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PredictLongRunningRequest {
    pub instances: Vec<VideoInstance>,
    pub parameters: VideoParameters,
}

#[derive(Debug, Serialize)]
pub struct VideoInstance {
    pub prompt: String,
    pub image: InlineImage,
}

#[derive(Debug, Serialize)]
pub struct InlineImage {
    #[serde(rename = "bytesBase64Encoded")]
    pub bytes_base64_encoded: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
pub struct VideoParameters {
    #[serde(rename = "sampleCount")]
    pub sample_count: u32,
    pub resolution: String,
    #[serde(rename = "aspectRatio")]
    pub aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<Value>,
    pub response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
pub struct OperationResponse {
    #[serde(rename = "generateVideoResponse")]
    pub generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateVideoResponse {
    #[serde(rename = "generatedSamples", default)]
    pub generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratedSample {
    pub video: Option<VideoFile>,
}

#[derive(Debug, Deserialize)]
pub struct VideoFile {
    pub uri: Option<String>,
}

impl Operation {
    /// Maps a decoded operation onto a job status.
    pub fn into_status(self) -> JobStatus {
        if !self.done {
            return JobStatus::Running;
        }
        if let Some(error) = self.error {
            return JobStatus::Failed {
                payload: ErrorPayload::Structured(serde_json::json!({ "error": error })),
            };
        }

        let uri = self
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| v.uri);

        match uri {
            Some(locator) => JobStatus::Succeeded { locator },
            None => JobStatus::Failed {
                payload: ErrorPayload::Text("No video URI found in the operation response.".to_string()),
            },
        }
    }
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiVideoClient {
    client: Client,
    base_url: String,
    model: String,
    output: VideoOutputConfig,
    retry_window: Duration,
}

impl GeminiVideoClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, output: VideoOutputConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            output,
            retry_window: Duration::from_secs(60),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.base_url.clone(), settings.model.clone(), settings.output.clone())
    }

    pub fn build_request(&self, request: &GenerationRequest) -> PredictLongRunningRequest {
        PredictLongRunningRequest {
            instances: vec![VideoInstance {
                prompt: compose_prompt(request.prompt()),
                image: InlineImage {
                    bytes_base64_encoded: request.image().data_base64.clone(),
                    mime_type: request.image().mime_type.clone(),
                },
            }],
            parameters: VideoParameters {
                sample_count: self.output.number_of_videos,
                resolution: self.output.resolution.clone(),
                aspect_ratio: self.output.aspect_ratio.clone(),
            },
        }
    }

    fn backoff_config(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
            multiplier: 2.0,
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        }
    }

    /// GET with retries on connection failures and 500/502/503. Returns the
    /// final status and body; callers decide what a non-2xx means.
    async fn get_with_retry(&self, url: &str) -> Result<(StatusCode, Vec<u8>), String> {
        let operation = || async {
            let response = self
                .client
                .get(url)
                .timeout(Duration::from_secs(120))
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("Gemini connection error (retrying): {}", e);
                        backoff::Error::transient(format!("Connection error: {}", e))
                    } else {
                        backoff::Error::permanent(format!("Request error: {}", e))
                    }
                })?;

            let status = response.status();
            if matches!(status.as_u16(), 500 | 502 | 503) {
                let text = response.text().await.unwrap_or_default();
                tracing::warn!("Gemini returned {} (retrying): {}", status, text);
                return Err(backoff::Error::transient(format!("API error ({}): {}", status, text)));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| backoff::Error::permanent(format!("Failed to read response: {}", e)))?;
            Ok((status, body.to_vec()))
        };

        retry(self.backoff_config(), operation).await
    }
}

fn with_key(url: &str, key: &ApiKey) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", url, separator, urlencoding::encode(key.expose()))
}

#[async_trait]
impl VideoGenerationApi for GeminiVideoClient {
    async fn submit(&self, request: &GenerationRequest, key: &ApiKey) -> Result<JobHandle, GenerationError> {
        let url = with_key(
            &format!("{}/models/{}:predictLongRunning", self.base_url, self.model),
            key,
        );
        let body = self.build_request(request);

        tracing::info!(
            "🎬 Submitting video job to {} ({} {}, image {})",
            self.model,
            self.output.resolution,
            self.output.aspect_ratio,
            request.image().mime_type
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Submission(format!("Request error: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Submission(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            tracing::error!("Video submission rejected ({}): {}", status, text);
            return Err(GenerationError::Submission(text));
        }

        let operation: Operation = serde_json::from_str(&text).map_err(|e| {
            GenerationError::Submission(format!("error decoding response body: {}", e))
        })?;
        tracing::debug!("Operation started: {}", operation.name);
        Ok(JobHandle::new(operation.name))
    }

    async fn poll(&self, handle: &JobHandle, key: &ApiKey) -> Result<JobStatus, GenerationError> {
        let url = with_key(&format!("{}/{}", self.base_url, handle.as_str()), key);

        let (status, body) = self.get_with_retry(&url).await.map_err(GenerationError::Poll)?;
        let text = String::from_utf8_lossy(&body);
        if !status.is_success() {
            tracing::error!("Operation status query failed ({}): {}", status, text);
            return Err(GenerationError::Poll(text.into_owned()));
        }

        let operation: Operation = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Poll(format!("error decoding response body: {}", e)))?;
        Ok(operation.into_status())
    }

    async fn fetch_artifact(&self, locator: &str, key: &ApiKey) -> Result<Vec<u8>, GenerationError> {
        let url = with_key(locator, key);

        let (status, body) = self.get_with_retry(&url).await.map_err(GenerationError::Retrieval)?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).into_owned();
            tracing::error!("Fetch video error: {}", text);
            return Err(match classify(&text) {
                ErrorClass::CredentialInvalid => GenerationError::Credential(text),
                ErrorClass::QuotaExceeded => GenerationError::Quota(text),
                ErrorClass::Unclassified => GenerationError::Retrieval(format!(
                    "Failed to fetch video: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                )),
            });
        }

        tracing::info!("✅ Downloaded {} bytes of video", body.len());
        Ok(body)
    }
}
