// WorkflowState - Lifecycle of one generation, from request to terminal outcome
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stages of a single generation. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Submitting,
    Polling,
    Fetching,
    Succeeded,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Succeeded | WorkflowState::Failed)
    }

    /// Whether `self -> next` is a legal step.
    pub fn can_advance_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Idle, Submitting)
                | (Submitting, Polling)
                | (Submitting, Failed)
                | (Polling, Fetching)
                | (Polling, Failed)
                | (Fetching, Succeeded)
                | (Fetching, Failed)
        )
    }

    /// Moves to `next`, or returns the rejected pair.
    pub fn advance(&mut self, next: WorkflowState) -> Result<(), (WorkflowState, WorkflowState)> {
        if self.can_advance_to(next) {
            *self = next;
            Ok(())
        } else {
            Err((*self, next))
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Submitting => "submitting",
            WorkflowState::Polling => "polling",
            WorkflowState::Fetching => "fetching",
            WorkflowState::Succeeded => "succeeded",
            WorkflowState::Failed => "failed",
        }
    }
}

/// Progress notification pushed to whoever is watching the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StateChanged {
        from: WorkflowState,
        to: WorkflowState,
        timestamp: DateTime<Utc>,
    },
    PollTick {
        attempt: u32,
        max_attempts: u32,
        elapsed_seconds: f64,
    },
    VideoReady {
        record_id: String,
        path: PathBuf,
    },
}
