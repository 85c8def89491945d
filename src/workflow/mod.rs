// Workflow orchestration - submit, poll, fetch, persist
pub mod executor;
pub mod state;

pub use executor::{ExecutorConfig, GenerationOutcome, GenerationWorkflow, WorkflowFailure};
pub use state::{WorkflowEvent, WorkflowState};
