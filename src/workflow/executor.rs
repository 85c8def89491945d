// Executor - Drives one generation: submit → poll → fetch → persist
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::state::{WorkflowEvent, WorkflowState};
use crate::artifacts::ArtifactWriter;
use crate::config::{Settings, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS};
use crate::credentials::{ApiKey, CredentialGate};
use crate::error::{classify, derive_message, ErrorClass, ErrorPayload, GenerationError};
use crate::history::HistoryStore;
use crate::jobs::GenerationJob;
use crate::types::{new_record_id, GenerationRequest, HistoryRecord, ImagePayload, VideoResource};
use crate::veo_client::VideoGenerationApi;

/// Polling knobs
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl From<&Settings> for ExecutorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            max_poll_attempts: settings.max_poll_attempts,
        }
    }
}

/// Everything produced by a successful run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub record: HistoryRecord,
    pub video: VideoResource,
    pub job: GenerationJob,
}

/// A failed run, reduced to one displayable message.
#[derive(Debug, Clone)]
pub struct WorkflowFailure {
    pub error: GenerationError,
    pub user_message: String,
    pub state: WorkflowState,
}

impl std::fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message)
    }
}

impl std::error::Error for WorkflowFailure {}

/// Single-use state machine for one generation request. `run` consumes it;
/// a new request always gets a fresh instance.
pub struct GenerationWorkflow {
    api: Arc<dyn VideoGenerationApi>,
    gate: Arc<CredentialGate>,
    history: Arc<HistoryStore>,
    artifacts: ArtifactWriter,
    config: ExecutorConfig,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    state: WorkflowState,
}

impl GenerationWorkflow {
    pub fn new(
        api: Arc<dyn VideoGenerationApi>,
        gate: Arc<CredentialGate>,
        history: Arc<HistoryStore>,
        artifacts: ArtifactWriter,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            api,
            gate,
            history,
            artifacts,
            config,
            cancel: CancellationToken::new(),
            events: None,
            state: WorkflowState::Idle,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, sender: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Validates raw form input, then runs. Invalid input fails in `Idle`
    /// without touching the network.
    pub async fn submit_form(
        self,
        prompt: &str,
        image: Option<ImagePayload>,
        voice_id: &str,
    ) -> Result<GenerationOutcome, WorkflowFailure> {
        match GenerationRequest::new(prompt, image, voice_id) {
            Ok(request) => self.run(request).await,
            Err(error) => {
                warn!("Generation request rejected: {}", error);
                Err(self.fail_without_network(error))
            }
        }
    }

    pub async fn run(mut self, request: GenerationRequest) -> Result<GenerationOutcome, WorkflowFailure> {
        let key = match self.preflight() {
            Ok(key) => key,
            Err(error) => return Err(self.fail_without_network(error)),
        };

        info!("🚀 Starting video generation (voice: {})", request.voice_name());

        match self.execute(&request, &key).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if error.is_credential() {
                    self.gate.revoke();
                }
                if !self.state.is_terminal() {
                    self.transition(WorkflowState::Failed);
                }
                let user_message = error.user_message();
                error!("❌ Video generation failed [{}]: {}", error.kind(), error);
                Err(WorkflowFailure {
                    error,
                    user_message,
                    state: self.state,
                })
            }
        }
    }

    fn preflight(&self) -> Result<ApiKey, GenerationError> {
        if !self.gate.is_present() {
            return Err(GenerationError::MissingCredential);
        }
        self.gate.api_key().ok_or(GenerationError::MissingCredential)
    }

    fn fail_without_network(&self, error: GenerationError) -> WorkflowFailure {
        WorkflowFailure {
            user_message: error.user_message(),
            error,
            state: self.state,
        }
    }

    async fn execute(&mut self, request: &GenerationRequest, key: &ApiKey) -> Result<GenerationOutcome, GenerationError> {
        self.transition(WorkflowState::Submitting);
        let handle = self
            .cancellable(self.api.submit(request, key))
            .await
            .map_err(GenerationError::reclassify)?;
        info!("📨 Job submitted: {}", handle);

        let mut job = GenerationJob::new(handle);
        self.transition(WorkflowState::Polling);
        let locator = self.poll_until_done(&mut job, key).await?;

        self.transition(WorkflowState::Fetching);
        let bytes = self
            .cancellable(self.api.fetch_artifact(&locator, key))
            .await
            .map_err(GenerationError::reclassify)?;

        let created_at = Utc::now();
        let id = new_record_id(created_at);
        let video = self.artifacts.save(&id, &bytes).await?;
        let record = HistoryRecord::new(id, request, &video, created_at);
        self.history.append(record.clone()).await?;

        self.transition(WorkflowState::Succeeded);
        self.emit(WorkflowEvent::VideoReady {
            record_id: record.id.clone(),
            path: video.path.clone(),
        });
        info!(
            "✅ Video ready after {:.1}s and {} status check(s): {}",
            job.elapsed_seconds(),
            job.polls,
            video.path.display()
        );

        Ok(GenerationOutcome { record, video, job })
    }

    async fn poll_until_done(&self, job: &mut GenerationJob, key: &ApiKey) -> Result<String, GenerationError> {
        let max_attempts = self.config.max_poll_attempts;

        for attempt in 1..=max_attempts {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("🛑 Polling cancelled for job {}", job.handle);
                    return Err(GenerationError::Cancelled);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let status = self
                .cancellable(self.api.poll(&job.handle, key))
                .await
                .map_err(GenerationError::reclassify)?;
            tracing::debug!("Job {} status check {}/{}: {:?}", job.handle, attempt, max_attempts, status);
            self.emit(WorkflowEvent::PollTick {
                attempt,
                max_attempts,
                elapsed_seconds: job.elapsed_seconds(),
            });

            if job.observe(&status) {
                if let Some(payload) = &job.error {
                    return Err(poll_failure(payload));
                }
                if let Some(locator) = &job.locator {
                    return Ok(locator.clone());
                }
            }
        }

        Err(GenerationError::Timeout { attempts: max_attempts })
    }

    async fn cancellable<T, F>(&self, operation: F) -> Result<T, GenerationError>
    where
        F: Future<Output = Result<T, GenerationError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GenerationError::Cancelled),
            result = operation => result,
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        let from = self.state;
        match self.state.advance(next) {
            Ok(()) => {
                info!("🔄 Generation {} → {}", from.label(), next.label());
                self.emit(WorkflowEvent::StateChanged {
                    from,
                    to: next,
                    timestamp: Utc::now(),
                });
            }
            Err((from, to)) => warn!("Ignoring illegal transition {} → {}", from.label(), to.label()),
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(sender) = &self.events {
            // The watcher may have gone away; the workflow carries on regardless.
            let _ = sender.send(event);
        }
    }
}

/// Turns a remote job failure into the matching error variant. The message is
/// derived here once and must not be reclassified again.
fn poll_failure(payload: &ErrorPayload) -> GenerationError {
    let message = derive_message(payload);
    match classify(&message) {
        ErrorClass::CredentialInvalid => GenerationError::Credential(message),
        ErrorClass::QuotaExceeded => GenerationError::Quota(message),
        ErrorClass::Unclassified => GenerationError::Poll(format!("Video generation failed: {}", message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{KeySelector, StaticKeySelector};
    use crate::error::{CREDENTIAL_INVALID_MESSAGE, QUOTA_EXCEEDED_MESSAGE};
    use crate::jobs::{JobHandle, JobStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// In-memory remote service. The last scripted status repeats forever.
    struct ScriptedApi {
        submit: Mutex<Result<JobHandle, GenerationError>>,
        statuses: Mutex<VecDeque<Result<JobStatus, GenerationError>>>,
        fetch: Mutex<Result<Vec<u8>, GenerationError>>,
        submit_calls: AtomicUsize,
        poll_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<Result<JobStatus, GenerationError>>) -> Self {
            Self {
                submit: Mutex::new(Ok(JobHandle::new("models/veo/operations/op-1"))),
                statuses: Mutex::new(statuses.into()),
                fetch: Mutex::new(Ok(b"\x00\x00\x00\x18ftypmp42".to_vec())),
                submit_calls: AtomicUsize::new(0),
                poll_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            }
        }

        fn succeeding() -> Self {
            Self::new(vec![
                Ok(JobStatus::Running),
                Ok(JobStatus::Running),
                Ok(succeeded()),
            ])
        }

        fn with_submit(self, result: Result<JobHandle, GenerationError>) -> Self {
            *self.submit.lock().unwrap() = result;
            self
        }

        fn with_fetch(self, result: Result<Vec<u8>, GenerationError>) -> Self {
            *self.fetch.lock().unwrap() = result;
            self
        }

        fn calls(&self) -> (usize, usize, usize) {
            (
                self.submit_calls.load(Ordering::SeqCst),
                self.poll_calls.load(Ordering::SeqCst),
                self.fetch_calls.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl VideoGenerationApi for ScriptedApi {
        async fn submit(&self, _request: &GenerationRequest, _key: &ApiKey) -> Result<JobHandle, GenerationError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            self.submit.lock().unwrap().clone()
        }

        async fn poll(&self, _handle: &JobHandle, _key: &ApiKey) -> Result<JobStatus, GenerationError> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses.front().cloned().unwrap_or(Ok(JobStatus::Running))
            }
        }

        async fn fetch_artifact(&self, _locator: &str, _key: &ApiKey) -> Result<Vec<u8>, GenerationError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.fetch.lock().unwrap().clone()
        }
    }

    fn succeeded() -> JobStatus {
        JobStatus::Succeeded {
            locator: "https://files.test/v1beta/files/abc:download?alt=media".to_string(),
        }
    }

    fn failed(payload: ErrorPayload) -> JobStatus {
        JobStatus::Failed { payload }
    }

    struct Harness {
        api: Arc<ScriptedApi>,
        gate: Arc<CredentialGate>,
        history: Arc<HistoryStore>,
        dir: TempDir,
    }

    impl Harness {
        async fn new(api: ScriptedApi) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let selector: Arc<dyn KeySelector> = Arc::new(StaticKeySelector::new(ApiKey::new("test-key")));
            let gate = Arc::new(CredentialGate::new(None, Some(selector)));
            gate.probe().await;
            let history = Arc::new(HistoryStore::open(dir.path().join("history.json")).await);
            Self {
                api: Arc::new(api),
                gate,
                history,
                dir,
            }
        }

        fn workflow(&self) -> GenerationWorkflow {
            GenerationWorkflow::new(
                self.api.clone(),
                self.gate.clone(),
                self.history.clone(),
                ArtifactWriter::new(self.dir.path().join("outputs")),
                ExecutorConfig {
                    poll_interval: Duration::from_millis(1),
                    max_poll_attempts: 5,
                },
            )
        }
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, Some(image()), "female_1").unwrap()
    }

    fn image() -> ImagePayload {
        ImagePayload::from_bytes(b"png bytes", "image/png").unwrap()
    }

    #[tokio::test]
    async fn test_success_creates_one_record_first_in_history() {
        let h = Harness::new(ScriptedApi::succeeding()).await;
        h.workflow().run(request("Padaria Pão Quente")).await.unwrap();

        let outcome = h.workflow().run(request("Pizzaria do Zé")).await.unwrap();

        let records = h.history.list_all().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], outcome.record);
        assert_eq!(records[0].prompt, "Pizzaria do Zé");
        assert_eq!(records[0].voice_name, "Sarah");
        assert_eq!(records[1].prompt, "Padaria Pão Quente");
        assert!(outcome.video.path.exists());
        assert_eq!(outcome.record.video_reference, outcome.video.path.display().to_string());
    }

    #[tokio::test]
    async fn test_success_walks_every_state_and_reports_progress() {
        let h = Harness::new(ScriptedApi::succeeding()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = h.workflow().with_events(tx).run(request("Academia Forte")).await.unwrap();
        assert_eq!(outcome.job.polls, 3);
        assert_eq!(h.api.calls(), (1, 3, 1));

        let mut states = Vec::new();
        let mut ticks = 0;
        let mut ready = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkflowEvent::StateChanged { to, .. } => states.push(to),
                WorkflowEvent::PollTick { .. } => ticks += 1,
                WorkflowEvent::VideoReady { .. } => ready = true,
            }
        }
        assert_eq!(
            states,
            vec![
                WorkflowState::Submitting,
                WorkflowState::Polling,
                WorkflowState::Fetching,
                WorkflowState::Succeeded
            ]
        );
        assert_eq!(ticks, 3);
        assert!(ready);
    }

    #[tokio::test]
    async fn test_invalid_form_never_reaches_network() {
        let h = Harness::new(ScriptedApi::succeeding()).await;

        let empty_prompt = h.workflow().submit_form("", Some(image()), "male_1").await.unwrap_err();
        assert_eq!(empty_prompt.error.kind(), "validation");
        assert_eq!(empty_prompt.state, WorkflowState::Idle);

        let no_image = h.workflow().submit_form("Pizzaria", None, "male_1").await.unwrap_err();
        assert_eq!(no_image.error.kind(), "validation");

        assert_eq!(h.api.calls(), (0, 0, 0));
        assert!(h.history.is_empty().await);
    }

    #[tokio::test]
    async fn test_poll_failure_not_found_revokes_credential() {
        let api = ScriptedApi::new(vec![
            Ok(JobStatus::Running),
            Ok(failed(ErrorPayload::Structured(json!({ "message": "Requested entity was not found" })))),
        ]);
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.user_message, CREDENTIAL_INVALID_MESSAGE);
        assert!(failure.error.is_credential());
        assert_eq!(failure.state, WorkflowState::Failed);
        assert!(!h.gate.is_present());
        assert_eq!(h.api.calls().2, 0);
        assert!(h.history.is_empty().await);
    }

    #[tokio::test]
    async fn test_retrieval_quota_keeps_credential() {
        let api = ScriptedApi::new(vec![Ok(succeeded())]).with_fetch(Err(GenerationError::Retrieval(
            r#"{"error":{"code":429,"message":"You exceeded your current quota","status":"RESOURCE_EXHAUSTED"}}"#
                .to_string(),
        )));
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.error.kind(), "quota");
        assert_eq!(failure.user_message, QUOTA_EXCEEDED_MESSAGE);
        assert!(h.gate.is_present());
        assert!(h.history.is_empty().await);
    }

    #[tokio::test]
    async fn test_double_encoded_poll_error_is_unwrapped() {
        let inner = json!({ "error": { "code": 400, "message": "API key not valid" } }).to_string();
        let api = ScriptedApi::new(vec![Ok(failed(ErrorPayload::Text(inner)))]);
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert!(failure.error.is_credential());
        assert_eq!(failure.error.to_string(), "API key not valid");
        assert!(!h.gate.is_present());
    }

    #[tokio::test]
    async fn test_poll_error_unwraps_only_one_level() {
        let innermost = json!({ "error": { "message": "API key not valid" } }).to_string();
        let wrapped = json!({ "error": { "message": innermost } }).to_string();
        let api = ScriptedApi::new(vec![Ok(failed(ErrorPayload::Text(wrapped)))]);
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert!(failure.error.is_credential());
        assert_eq!(failure.error, GenerationError::Credential(innermost));
    }

    #[tokio::test]
    async fn test_submission_credential_error_revokes() {
        let api = ScriptedApi::succeeding().with_submit(Err(GenerationError::Submission(
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key."}}"#.to_string(),
        )));
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(
            failure.error,
            GenerationError::Credential("API key not valid. Please pass a valid API key.".to_string())
        );
        assert_eq!(failure.user_message, CREDENTIAL_INVALID_MESSAGE);
        assert!(!h.gate.is_present());
        assert_eq!(h.api.calls(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_gate_without_selector_uses_configured_key() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(ScriptedApi::succeeding());
        let gate = Arc::new(CredentialGate::new(ApiKey::new("env-key"), None));
        assert!(gate.probe().await);
        let history = Arc::new(HistoryStore::open(dir.path().join("history.json")).await);

        let workflow = GenerationWorkflow::new(
            api.clone(),
            gate,
            history.clone(),
            ArtifactWriter::new(dir.path().join("outputs")),
            ExecutorConfig {
                poll_interval: Duration::from_millis(1),
                max_poll_attempts: 5,
            },
        );

        workflow.run(request("Pizzaria")).await.unwrap();
        assert_eq!(api.calls(), (1, 3, 1));
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn test_generic_poll_failure_keeps_remote_message() {
        let api = ScriptedApi::new(vec![Ok(failed(ErrorPayload::Structured(
            json!({ "code": 3, "message": "The prompt was blocked by safety filters." }),
        )))]);
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.error.kind(), "poll");
        assert_eq!(
            failure.user_message,
            "Video generation failed: The prompt was blocked by safety filters."
        );
        assert!(h.gate.is_present());
    }

    #[tokio::test]
    async fn test_submission_failure_goes_straight_to_failed() {
        let api = ScriptedApi::succeeding().with_submit(Err(GenerationError::Submission(
            r#"{"error":{"code":400,"message":"Image format not supported"}}"#.to_string(),
        )));
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.error, GenerationError::Submission("Image format not supported".to_string()));
        assert_eq!(failure.state, WorkflowState::Failed);
        assert_eq!(h.api.calls(), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_terminal_status_repeats_without_duplicate_records() {
        let h = Harness::new(ScriptedApi::new(vec![Ok(succeeded())])).await;
        let outcome = h.workflow().run(request("Pizzaria")).await.unwrap();

        // The remote keeps answering "done"; re-polling changes nothing locally.
        let mut job = outcome.job.clone();
        let key = ApiKey::new("test-key").unwrap();
        for _ in 0..3 {
            let status = h.api.poll(&job.handle, &key).await.unwrap();
            assert!(status.is_terminal());
            assert!(!job.observe(&status));
        }

        assert_eq!(h.history.len().await, 1);
        assert_eq!(h.api.calls().2, 1);
    }

    #[tokio::test]
    async fn test_polling_times_out() {
        let h = Harness::new(ScriptedApi::new(vec![Ok(JobStatus::Running)])).await;
        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.error, GenerationError::Timeout { attempts: 5 });
        assert_eq!(h.api.calls(), (1, 5, 0));
        assert!(h.gate.is_present());
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let h = Harness::new(ScriptedApi::new(vec![Ok(JobStatus::Running)])).await;
        let token = CancellationToken::new();
        let workflow = GenerationWorkflow::new(
            h.api.clone(),
            h.gate.clone(),
            h.history.clone(),
            ArtifactWriter::new(h.dir.path().join("outputs")),
            ExecutorConfig {
                poll_interval: Duration::from_millis(5),
                max_poll_attempts: 10_000,
            },
        )
        .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let failure = workflow.run(request("Pizzaria")).await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(failure.error, GenerationError::Cancelled);
        assert_eq!(failure.state, WorkflowState::Failed);
        assert!(h.history.is_empty().await);
        assert_eq!(h.api.calls().2, 0);
    }

    #[tokio::test]
    async fn test_revoked_gate_blocks_submission() {
        let h = Harness::new(ScriptedApi::succeeding()).await;
        h.gate.revoke();

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.error, GenerationError::MissingCredential);
        assert_eq!(failure.state, WorkflowState::Idle);
        assert_eq!(h.api.calls(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_fetch_credential_error_revokes() {
        let api = ScriptedApi::new(vec![Ok(succeeded())]).with_fetch(Err(GenerationError::Credential(
            "API key not valid. Please pass a valid API key.".to_string(),
        )));
        let h = Harness::new(api).await;

        let failure = h.workflow().run(request("Pizzaria")).await.unwrap_err();
        assert_eq!(failure.user_message, CREDENTIAL_INVALID_MESSAGE);
        assert!(!h.gate.is_present());
        assert!(h.history.is_empty().await);
    }
}
