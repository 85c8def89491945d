// src/jobs/mod.rs
//! Remote generation jobs: the opaque handle, what a status query returns,
//! and the client-side record of one in-flight operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorPayload;

/// Opaque operation name handed out by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one status query.
#[derive(Debug, Clone)]
pub enum JobStatus {
    /// Job is still running remotely
    Running,
    /// Job finished and produced a video at `locator`
    Succeeded { locator: String },
    /// Job finished with an error
    Failed { payload: ErrorPayload },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Client-side view of one submitted operation. Only poll observations
/// mutate it, and nothing changes once it is done.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub handle: JobHandle,
    pub done: bool,
    pub error: Option<ErrorPayload>,
    pub locator: Option<String>,
    pub polls: u32,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn new(handle: JobHandle) -> Self {
        Self {
            handle,
            done: false,
            error: None,
            locator: None,
            polls: 0,
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Records a poll result. Returns `true` only for the observation that
    /// made the job terminal; later observations are ignored.
    pub fn observe(&mut self, status: &JobStatus) -> bool {
        if self.done {
            tracing::debug!("Ignoring status for finished job {}", self.handle);
            return false;
        }
        self.polls += 1;

        match status {
            JobStatus::Running => false,
            JobStatus::Succeeded { locator } => {
                self.locator = Some(locator.clone());
                self.finish();
                true
            }
            JobStatus::Failed { payload } => {
                self.error = Some(payload.clone());
                self.finish();
                true
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.completed_at = Some(Utc::now());
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.submitted_at).num_milliseconds() as f64 / 1000.0
    }
}
