// lib.rs - Main library file that exports all modules
pub mod artifacts;
pub mod config;
pub mod credentials;
pub mod error;
pub mod history;
pub mod jobs;
pub mod types;
pub mod veo_client;
pub mod voices;
pub mod workflow;

// Re-export commonly used types for convenience
pub use artifacts::ArtifactWriter;
pub use config::Settings;
pub use credentials::{ApiKey, CredentialGate, KeySelector, StaticKeySelector, TerminalKeySelector};
pub use error::{ErrorPayload, GenerationError};
pub use history::{HistoryError, HistoryStore};
pub use jobs::{GenerationJob, JobHandle, JobStatus};
pub use types::*;
pub use veo_client::{GeminiVideoClient, VideoGenerationApi};
pub use voices::{VoiceCategory, VoiceOption};
pub use workflow::{ExecutorConfig, GenerationOutcome, GenerationWorkflow, WorkflowEvent, WorkflowFailure, WorkflowState};
