// src/config.rs
//! Runtime settings, read from the environment (and `.env` via dotenvy).

use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::ApiKey;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "veo-3.1-fast-generate-preview";
pub const DEFAULT_RESOLUTION: &str = "720p";
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 90;

/// Output shape requested from the video model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutputConfig {
    pub number_of_videos: u32,
    pub resolution: String,
    pub aspect_ratio: String,
}

impl Default for VideoOutputConfig {
    fn default() -> Self {
        Self {
            number_of_videos: 1,
            resolution: DEFAULT_RESOLUTION.to_string(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<ApiKey>,
    pub base_url: String,
    pub model: String,
    pub output: VideoOutputConfig,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub history_path: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            output: VideoOutputConfig::default(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            history_path: PathBuf::from("history.json"),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from any variable source; `from_env` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("API_KEY"))
            .and_then(ApiKey::new);

        let poll_secs = parse_or(non_empty("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS);
        let max_poll_attempts = parse_or(non_empty("MAX_POLL_ATTEMPTS"), "MAX_POLL_ATTEMPTS", DEFAULT_MAX_POLL_ATTEMPTS);

        Self {
            api_key,
            base_url: non_empty("GEMINI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: non_empty("VEO_MODEL").unwrap_or(defaults.model),
            output: VideoOutputConfig {
                number_of_videos: 1,
                resolution: non_empty("VIDEO_RESOLUTION").unwrap_or(defaults.output.resolution),
                aspect_ratio: non_empty("VIDEO_ASPECT_RATIO").unwrap_or(defaults.output.aspect_ratio),
            },
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            max_poll_attempts: max_poll_attempts.max(1),
            history_path: non_empty("HISTORY_PATH").map(PathBuf::from).unwrap_or(defaults.history_path),
            output_dir: non_empty("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Configuration - API key: {}, model: {}, output: {} {}, poll every {}s (max {} checks)",
            if self.api_key.is_some() { "✅" } else { "❌" },
            self.model,
            self.output.resolution,
            self.output.aspect_ratio,
            self.poll_interval.as_secs(),
            self.max_poll_attempts
        );
    }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match raw {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Invalid {}='{}', using default {}", name, value, default);
                default
            }
        },
        None => default,
    }
}
