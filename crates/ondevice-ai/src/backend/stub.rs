//! Scripted native models for tests
//!
//! Both stubs record what they were asked to do so tests can assert on the
//! prompts, selectors and download attempts that reached the "device".

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;

use super::{
    BackendError, DownloadStatus, DownloadStream, FeatureClient, InferenceRequest, OutputType,
    SystemAvailability, SystemModel, TokenStream,
};
use crate::constants::feature_status;
use crate::types::GenerationParams;

/// A prompt as received by a stub
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRecord {
    pub instructions: Option<String>,
    pub prompt: String,
    pub params: GenerationParams,
}

fn scripted_tokens(
    tokens: Arc<Vec<String>>,
    delay: Duration,
    fail_after: Option<usize>,
) -> TokenStream {
    Box::pin(stream::unfold(Some(0usize), move |state| {
        let tokens = tokens.clone();
        async move {
            let index = state?;
            tokio::time::sleep(delay).await;
            if fail_after == Some(index) {
                return Some((
                    Err(BackendError::Inference("stream interrupted".to_string())),
                    None,
                ));
            }
            let token = tokens.get(index)?.clone();
            Some((Ok(token), Some(index + 1)))
        }
    }))
}

// ============================================================================
// System model
// ============================================================================

/// Scripted [`SystemModel`]
pub struct StubSystemModel {
    availability: Mutex<SystemAvailability>,
    response: String,
    tokens: Arc<Vec<String>>,
    token_delay: Duration,
    fail_after: Option<usize>,
    probe_delay: Option<Duration>,
    prompts: Mutex<Vec<PromptRecord>>,
    prewarms: AtomicUsize,
}

impl StubSystemModel {
    pub fn new() -> Self {
        Self {
            availability: Mutex::new(SystemAvailability::Available),
            response: "Hello! How can I help?".to_string(),
            tokens: Arc::new(
                ["Once", " upon", " a", " time"]
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
            ),
            token_delay: Duration::from_millis(1),
            fail_after: None,
            probe_delay: None,
            prompts: Mutex::new(Vec::new()),
            prewarms: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(self, reason: &str) -> Self {
        *self.availability.lock() = SystemAvailability::Unavailable {
            reason: reason.to_string(),
        };
        self
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = Arc::new(tokens.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Fail the stream in place of the token at `index`
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_after = Some(index);
        self
    }

    /// Make `availability()` take this long
    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<PromptRecord> {
        self.prompts.lock().clone()
    }

    pub fn prewarm_count(&self) -> usize {
        self.prewarms.load(Ordering::SeqCst)
    }

    fn record(&self, instructions: Option<&str>, prompt: &str, params: &GenerationParams) {
        self.prompts.lock().push(PromptRecord {
            instructions: instructions.map(str::to_string),
            prompt: prompt.to_string(),
            params: *params,
        });
    }
}

impl Default for StubSystemModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemModel for StubSystemModel {
    async fn availability(&self) -> SystemAvailability {
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        self.availability.lock().clone()
    }

    async fn prewarm(&self, _instructions: Option<&str>) -> Result<(), BackendError> {
        self.prewarms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn respond(
        &self,
        instructions: Option<&str>,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        self.record(instructions, prompt, params);
        Ok(self.response.clone())
    }

    async fn stream_response(
        &self,
        instructions: Option<String>,
        prompt: String,
        params: GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        self.record(instructions.as_deref(), &prompt, &params);
        Ok(scripted_tokens(
            self.tokens.clone(),
            self.token_delay,
            self.fail_after,
        ))
    }
}

// ============================================================================
// Feature client
// ============================================================================

/// Scripted [`FeatureClient`]
///
/// A completed download flips the reported status to available.
pub struct StubFeatureClient {
    status: Arc<AtomicI32>,
    candidates: Vec<String>,
    inference_output: Option<Vec<String>>,
    tokens: Arc<Vec<String>>,
    token_delay: Duration,
    download_steps: Vec<DownloadStatus>,
    download_step_delay: Duration,
    context_missing: bool,
    downloads: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl StubFeatureClient {
    pub fn new() -> Self {
        Self {
            status: Arc::new(AtomicI32::new(feature_status::AVAILABLE)),
            candidates: vec!["Generated text.".to_string()],
            inference_output: None,
            tokens: Arc::new(vec!["Hi".to_string(), " there".to_string()]),
            token_delay: Duration::from_millis(1),
            download_steps: vec![
                DownloadStatus::Started {
                    total_bytes: Some(100),
                },
                DownloadStatus::Progress {
                    bytes_downloaded: 50,
                },
                DownloadStatus::Progress {
                    bytes_downloaded: 100,
                },
                DownloadStatus::Completed,
            ],
            download_step_delay: Duration::from_millis(5),
            context_missing: false,
            downloads: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status(self, code: i32) -> Self {
        self.status.store(code, Ordering::SeqCst);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Fixed `run_inference` output instead of the selector-derived one
    pub fn with_inference_output(mut self, output: Vec<String>) -> Self {
        self.inference_output = Some(output);
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = Arc::new(tokens.iter().map(|t| t.to_string()).collect());
        self
    }

    /// End the download with a failure instead of completion
    pub fn failing_download(mut self, cause: &str) -> Self {
        self.download_steps.pop();
        self.download_steps
            .push(DownloadStatus::Failed(cause.to_string()));
        self
    }

    pub fn with_download_step_delay(mut self, delay: Duration) -> Self {
        self.download_step_delay = delay;
        self
    }

    /// Report a missing host context from `run_inference`
    pub fn without_context(mut self) -> Self {
        self.context_missing = true;
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> i32 {
        self.status.load(Ordering::SeqCst)
    }

    /// Change the reported status, e.g. to finish a platform-driven download
    pub fn set_status(&self, code: i32) {
        self.status.store(code, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Output-type selectors received by `run_inference`, in order
    pub fn selectors(&self) -> Vec<OutputType> {
        self.requests.lock().iter().map(|r| r.output_type).collect()
    }

    fn transform(request: &InferenceRequest) -> String {
        match request.output_type {
            OutputType::Shorten => request
                .text
                .split_whitespace()
                .take(3)
                .collect::<Vec<_>>()
                .join(" "),
            OutputType::Elaborate => format!("{} In more detail, that is the plan.", request.text),
            other => format!("{:?}: {}", other, request.text),
        }
    }
}

impl Default for StubFeatureClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureClient for StubFeatureClient {
    async fn check_status(&self) -> Result<i32, BackendError> {
        Ok(self.status.load(Ordering::SeqCst))
    }

    async fn download(&self) -> Result<DownloadStream, BackendError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.status
            .store(feature_status::DOWNLOADING, Ordering::SeqCst);

        let status = self.status.clone();
        let steps = Arc::new(self.download_steps.clone());
        let delay = self.download_step_delay;
        Ok(Box::pin(stream::unfold(0usize, move |index| {
            let status = status.clone();
            let steps = steps.clone();
            async move {
                tokio::time::sleep(delay).await;
                let step = steps.get(index)?.clone();
                match step {
                    DownloadStatus::Completed => {
                        status.store(feature_status::AVAILABLE, Ordering::SeqCst)
                    }
                    DownloadStatus::Failed(_) => {
                        status.store(feature_status::DOWNLOADABLE, Ordering::SeqCst)
                    }
                    _ => {}
                }
                Some((step, index + 1))
            }
        })))
    }

    async fn generate_content(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self.candidates.clone())
    }

    async fn generate_content_stream(
        &self,
        prompt: String,
        _params: GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        self.prompts.lock().push(prompt);
        Ok(scripted_tokens(self.tokens.clone(), self.token_delay, None))
    }

    async fn run_inference(&self, request: &InferenceRequest) -> Result<Vec<String>, BackendError> {
        if self.context_missing {
            return Err(BackendError::ContextUnavailable);
        }
        self.requests.lock().push(request.clone());
        Ok(self
            .inference_output
            .clone()
            .unwrap_or_else(|| vec![Self::transform(request)]))
    }
}
