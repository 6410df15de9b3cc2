//! UniFFI bindings for the on-device text generation coordinator.
//!
//! Host apps implement the native model side ([`ForeignSystemModel`] for
//! system-managed models, [`ForeignFeatureClient`] for provisioned feature
//! models) and drive everything through [`FfiOnDeviceAi`].
//!
//! # Architecture
//!
//! Foreign trait methods are plain blocking calls; the bindings run them on
//! tokio's blocking pool. Streaming and download progress flow back through
//! sink objects ([`FfiTokenSink`], [`FfiDownloadSink`]) the host pushes into.
//! Events are buffered and polled with [`FfiOnDeviceAi::drain_events`], each
//! carrying its full payload as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Build the cdylib
//! cargo build -p ondevice-ai-uniffi --release
//!
//! # Generate Swift bindings
//! ondevice-ai-uniffi-bindgen generate --library --language swift \
//!     --out-dir ./bindings/swift target/release/libondevice_ai_ffi.dylib
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use ondevice_ai::{
    AiError, AiEvent, BackendError, Capability, CapabilitySet, ClientConfig, DownloadStatus,
    FeatureClient, GenerateOptions, GenerationParams, ImplicitModel, InferenceRequest,
    ModelAvailability, OnDeviceAi, ProvisionedModel, RewriteStyle, Session, SessionOptions,
    SummarizeOptions, SummarizeStyle, SystemAvailability, SystemModel, TokenStream,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// UniFFI scaffolding
uniffi::setup_scaffolding!();

// ============================================================================
// Error types
// ============================================================================

/// FFI-friendly error type mapping from AiError.
#[derive(Debug, Clone, uniffi::Error, thiserror::Error)]
pub enum FfiError {
    #[error("[SESSION_NOT_INITIALIZED] {message}")]
    SessionNotInitialized { message: String },

    #[error("[MODEL_UNAVAILABLE] {message}")]
    ModelUnavailable { reason: String, message: String },

    #[error("[DOWNLOAD_FAILED] {message}")]
    DownloadFailed { message: String },

    #[error("[GENERATION_FAILED] {message}")]
    GenerationFailed { message: String },

    #[error("[CONTEXT_UNAVAILABLE] {message}")]
    ContextUnavailable { message: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl FfiError {
    /// Stable code matching the core error codes
    pub fn code(&self) -> &'static str {
        use ondevice_ai::constants::codes;
        match self {
            Self::SessionNotInitialized { .. } => codes::SESSION_NOT_INITIALIZED,
            Self::ModelUnavailable { .. } => codes::MODEL_UNAVAILABLE,
            Self::DownloadFailed { .. } => codes::DOWNLOAD_FAILED,
            Self::GenerationFailed { .. } => codes::GENERATION_FAILED,
            Self::ContextUnavailable { .. } => codes::CONTEXT_UNAVAILABLE,
            Self::Cancelled => codes::CANCELLED,
            Self::InvalidConfig { .. } | Self::Other { .. } => "UNKNOWN",
        }
    }
}

impl From<AiError> for FfiError {
    fn from(err: AiError) -> Self {
        let message = err.to_string();
        match err {
            AiError::SessionNotInitialized => FfiError::SessionNotInitialized { message },
            AiError::ModelUnavailable(reason) => FfiError::ModelUnavailable {
                reason: reason.as_str().to_string(),
                message,
            },
            AiError::DownloadFailed(cause) => FfiError::DownloadFailed { message: cause },
            AiError::GenerationFailed(cause) => FfiError::GenerationFailed { message: cause },
            AiError::ContextUnavailable => FfiError::ContextUnavailable { message },
            AiError::Cancelled => FfiError::Cancelled,
        }
    }
}

impl From<FfiError> for BackendError {
    fn from(err: FfiError) -> Self {
        match err {
            FfiError::ContextUnavailable { .. } => BackendError::ContextUnavailable,
            FfiError::DownloadFailed { message } => BackendError::Download(message),
            FfiError::GenerationFailed { message } => BackendError::Inference(message),
            other => BackendError::Unknown(other.to_string()),
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for FfiError {
    fn from(err: uniffi::UnexpectedUniFFICallbackError) -> Self {
        FfiError::Other {
            message: err.reason,
        }
    }
}

pub type FfiResult<T> = Result<T, FfiError>;

// ============================================================================
// FFI Wrapper Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiCapability {
    Generate,
    Summarize,
    Rewrite,
}

impl From<FfiCapability> for Capability {
    fn from(capability: FfiCapability) -> Self {
        match capability {
            FfiCapability::Generate => Capability::Generate,
            FfiCapability::Summarize => Capability::Summarize,
            FfiCapability::Rewrite => Capability::Rewrite,
        }
    }
}

/// FFI-safe availability: `status` plus `reason` when unavailable.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiAvailability {
    pub status: String,
    pub reason: Option<String>,
}

impl From<ModelAvailability> for FfiAvailability {
    fn from(availability: ModelAvailability) -> Self {
        Self {
            status: availability.status().to_string(),
            reason: availability.reason().map(|r| r.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiSession {
    pub id: String,
    pub instructions: Option<String>,
    pub generation_epoch: u64,
}

impl From<Session> for FfiSession {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            instructions: session.instructions,
            generation_epoch: session.generation_epoch,
        }
    }
}

#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiGenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl From<FfiGenerateOptions> for GenerateOptions {
    fn from(options: FfiGenerateOptions) -> Self {
        Self {
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

/// Resolved generation parameters handed to foreign models.
#[derive(Debug, Clone, Copy, uniffi::Record)]
pub struct FfiGenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<GenerationParams> for FfiGenerationParams {
    fn from(params: GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }
}

/// Readiness as a foreign system model reports it.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSystemAvailability {
    pub available: bool,
    /// Runtime reason name when not available
    pub reason: Option<String>,
}

/// FFI-safe streaming event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAiEvent {
    /// Listener name: `onToken`, `onComplete` or `onError`
    pub event_type: String,
    pub operation: u64,
    /// Full event data as JSON
    pub event_json: String,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCapabilityInfo {
    pub capability: String,
    pub backend: String,
    pub lifecycle: String,
}

// ============================================================================
// Sinks the host pushes into
// ============================================================================

/// Receives tokens from a foreign streaming call.
///
/// `push_token` returns false once the consumer has gone away (the stream was
/// stopped); hosts should stop generating at that point.
#[derive(uniffi::Object)]
pub struct FfiTokenSink {
    tx: Mutex<Option<mpsc::UnboundedSender<Result<String, BackendError>>>>,
}

#[uniffi::export]
impl FfiTokenSink {
    pub fn push_token(&self, token: String) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Ok(token)).is_ok(),
            None => false,
        }
    }

    /// End the stream normally
    pub fn finish(&self) {
        self.tx.lock().take();
    }

    /// End the stream with an error
    pub fn fail(&self, message: String) {
        match self.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(Err(BackendError::Inference(message)));
            }
            None => log::warn!("Stream error reported after the stream ended: {}", message),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl FfiTokenSink {
    fn channel() -> (Arc<Self>, TokenStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        let tokens = Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        (sink, tokens)
    }

    /// Second sender that keeps the stream open until the foreign call returns
    fn hold(&self) -> Option<mpsc::UnboundedSender<Result<String, BackendError>>> {
        self.tx.lock().clone()
    }
}

/// Receives progress from a foreign model download.
#[derive(uniffi::Object)]
pub struct FfiDownloadSink {
    tx: Mutex<Option<mpsc::UnboundedSender<DownloadStatus>>>,
}

#[uniffi::export]
impl FfiDownloadSink {
    pub fn started(&self, total_bytes: Option<u64>) {
        self.send(DownloadStatus::Started { total_bytes });
    }

    pub fn progress(&self, bytes_downloaded: u64) {
        self.send(DownloadStatus::Progress { bytes_downloaded });
    }

    pub fn completed(&self) {
        self.send(DownloadStatus::Completed);
        self.tx.lock().take();
    }

    pub fn failed(&self, cause: String) {
        self.send(DownloadStatus::Failed(cause));
        self.tx.lock().take();
    }
}

impl FfiDownloadSink {
    fn send(&self, status: DownloadStatus) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(status);
        }
    }
}

// ============================================================================
// Foreign native models
// ============================================================================

/// A system-managed model implemented by the host.
///
/// Methods may block; they are called off the async runtime.
#[uniffi::export(with_foreign)]
pub trait ForeignSystemModel: Send + Sync {
    fn availability(&self) -> FfiSystemAvailability;

    fn prewarm(&self, instructions: Option<String>) -> Result<(), FfiError>;

    fn respond(
        &self,
        instructions: Option<String>,
        prompt: String,
        params: FfiGenerationParams,
    ) -> Result<String, FfiError>;

    /// Push tokens into `sink`, then call `finish` (or return an error)
    fn stream_response(
        &self,
        instructions: Option<String>,
        prompt: String,
        params: FfiGenerationParams,
        sink: Arc<FfiTokenSink>,
    ) -> Result<(), FfiError>;
}

/// A provisioned feature model implemented by the host.
#[uniffi::export(with_foreign)]
pub trait ForeignFeatureClient: Send + Sync {
    /// 0 unavailable, 1 downloadable, 2 downloading, 3 available
    fn check_status(&self) -> Result<i32, FfiError>;

    /// Report progress into `sink`, ending with `completed` or `failed`
    fn download(&self, sink: Arc<FfiDownloadSink>) -> Result<(), FfiError>;

    fn generate_content(
        &self,
        prompt: String,
        params: FfiGenerationParams,
    ) -> Result<Vec<String>, FfiError>;

    fn generate_content_stream(
        &self,
        prompt: String,
        params: FfiGenerationParams,
        sink: Arc<FfiTokenSink>,
    ) -> Result<(), FfiError>;

    /// Transform `text` with an output-type selector such as `THREE_BULLETS`
    fn run_inference(&self, text: String, output_type: String) -> Result<Vec<String>, FfiError>;
}

async fn run_blocking<T, F>(call: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FfiError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| BackendError::Unknown(e.to_string()))?
        .map_err(BackendError::from)
}

/// Run a foreign streaming call, returning the tokens it pushes
fn foreign_stream<F>(call: F) -> TokenStream
where
    F: FnOnce(Arc<FfiTokenSink>) -> Result<(), FfiError> + Send + 'static,
{
    let (sink, tokens) = FfiTokenSink::channel();
    let held = sink.hold();
    tokio::task::spawn_blocking(move || {
        let result = call(sink.clone());
        if let Err(e) = result {
            // The host may have called `finish` before failing; the held
            // sender still reaches the consumer.
            sink.finish();
            if let Some(tx) = held {
                let _ = tx.send(Err(BackendError::Inference(e.to_string())));
            }
        }
    });
    tokens
}

struct ForeignSystemAdapter {
    model: Arc<dyn ForeignSystemModel>,
}

#[async_trait]
impl SystemModel for ForeignSystemAdapter {
    async fn availability(&self) -> SystemAvailability {
        let model = self.model.clone();
        match tokio::task::spawn_blocking(move || model.availability()).await {
            Ok(FfiSystemAvailability {
                available: true, ..
            }) => SystemAvailability::Available,
            Ok(FfiSystemAvailability { reason, .. }) => SystemAvailability::Unavailable {
                reason: reason.unwrap_or_default(),
            },
            Err(e) => {
                log::warn!("Foreign availability call failed: {}", e);
                SystemAvailability::Unavailable {
                    reason: String::new(),
                }
            }
        }
    }

    async fn prewarm(&self, instructions: Option<&str>) -> Result<(), BackendError> {
        let model = self.model.clone();
        let instructions = instructions.map(str::to_string);
        run_blocking(move || model.prewarm(instructions)).await
    }

    async fn respond(
        &self,
        instructions: Option<&str>,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let model = self.model.clone();
        let instructions = instructions.map(str::to_string);
        let prompt = prompt.to_string();
        let params = FfiGenerationParams::from(*params);
        run_blocking(move || model.respond(instructions, prompt, params)).await
    }

    async fn stream_response(
        &self,
        instructions: Option<String>,
        prompt: String,
        params: GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        let model = self.model.clone();
        Ok(foreign_stream(move |sink| {
            model.stream_response(instructions, prompt, params.into(), sink)
        }))
    }
}

struct ForeignFeatureAdapter {
    client: Arc<dyn ForeignFeatureClient>,
}

#[async_trait]
impl FeatureClient for ForeignFeatureAdapter {
    async fn check_status(&self) -> Result<i32, BackendError> {
        let client = self.client.clone();
        run_blocking(move || client.check_status()).await
    }

    async fn download(&self) -> Result<ondevice_ai::backend::DownloadStream, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(FfiDownloadSink {
            tx: Mutex::new(Some(tx)),
        });
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = client.download(sink.clone()) {
                sink.failed(e.to_string());
            }
        });
        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|status| (status, rx))
        })))
    }

    async fn generate_content(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError> {
        let client = self.client.clone();
        let prompt = prompt.to_string();
        let params = FfiGenerationParams::from(*params);
        run_blocking(move || client.generate_content(prompt, params)).await
    }

    async fn generate_content_stream(
        &self,
        prompt: String,
        params: GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        let client = self.client.clone();
        Ok(foreign_stream(move |sink| {
            client.generate_content_stream(prompt, params.into(), sink)
        }))
    }

    async fn run_inference(&self, request: &InferenceRequest) -> Result<Vec<String>, BackendError> {
        let client = self.client.clone();
        let text = request.text.clone();
        let output_type = request.output_type.as_str().to_string();
        run_blocking(move || client.run_inference(text, output_type)).await
    }
}

// ============================================================================
// Free functions
// ============================================================================

/// Get the version of the ondevice-ai bindings.
#[uniffi::export]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// ============================================================================
// FfiOnDeviceAi - Main client object
// ============================================================================

/// Callback EventSink that buffers events for polling.
struct BufferedEventSink {
    buffer: Arc<Mutex<Vec<FfiAiEvent>>>,
}

impl ondevice_ai::EventSink for BufferedEventSink {
    fn send(&self, event: &AiEvent) -> Result<(), ondevice_ai::EventError> {
        let event_json = serde_json::to_string(event).map_err(|e| ondevice_ai::EventError {
            message: e.to_string(),
        })?;
        self.buffer.lock().push(FfiAiEvent {
            event_type: event.listener_name().to_string(),
            operation: event.operation(),
            event_json,
        });
        Ok(())
    }
}

/// The on-device text generation client handle.
///
/// # Example (Swift)
///
/// ```swift
/// let ai = try FfiOnDeviceAi.withSystemModel(model: MyModel(), configJson: nil)
/// _ = try await ai.initSession(instructions: "You are concise.")
/// let op = try await ai.startStreaming(prompt: "Tell me a story", options: nil)
/// for event in ai.drainEvents() where event.operation == op { ... }
/// ```
#[derive(uniffi::Object)]
pub struct FfiOnDeviceAi {
    client: OnDeviceAi,
    event_buffer: Arc<Mutex<Vec<FfiAiEvent>>>,
}

impl FfiOnDeviceAi {
    fn build(capabilities: CapabilitySet, config_json: Option<String>) -> FfiResult<Arc<Self>> {
        let config = match config_json {
            Some(json) => ClientConfig::from_json(&json).map_err(|e| FfiError::InvalidConfig {
                message: e.to_string(),
            })?,
            None => ClientConfig::default(),
        };

        let client = OnDeviceAi::new(capabilities, config);
        let event_buffer = Arc::new(Mutex::new(Vec::new()));
        client.add_sink(Arc::new(BufferedEventSink {
            buffer: event_buffer.clone(),
        }));

        Ok(Arc::new(Self {
            client,
            event_buffer,
        }))
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl FfiOnDeviceAi {
    /// Serve every capability from one system-managed model.
    #[uniffi::constructor]
    pub fn with_system_model(
        model: Arc<dyn ForeignSystemModel>,
        config_json: Option<String>,
    ) -> Result<Arc<Self>, FfiError> {
        let backend = Arc::new(ImplicitModel::new(Arc::new(ForeignSystemAdapter { model })));
        Self::build(CapabilitySet::shared(backend), config_json)
    }

    /// Serve each capability from its own provisioned feature client.
    #[uniffi::constructor]
    pub fn with_feature_clients(
        generate: Arc<dyn ForeignFeatureClient>,
        summarize: Arc<dyn ForeignFeatureClient>,
        rewrite: Arc<dyn ForeignFeatureClient>,
        config_json: Option<String>,
    ) -> Result<Arc<Self>, FfiError> {
        let wrap = |client| Arc::new(ProvisionedModel::new(Arc::new(ForeignFeatureAdapter { client })));
        Self::build(
            CapabilitySet::new(wrap(generate), wrap(summarize), wrap(rewrite)),
            config_json,
        )
    }

    pub async fn check_availability(&self, capability: FfiCapability) -> FfiAvailability {
        self.client
            .check_availability(capability.into())
            .await
            .into()
    }

    pub async fn download_model(&self, capability: FfiCapability) -> Result<bool, FfiError> {
        Ok(self.client.download_model(capability.into()).await?)
    }

    pub async fn init_session(&self, instructions: Option<String>) -> Result<FfiSession, FfiError> {
        let session = self
            .client
            .init_session(&SessionOptions { instructions })
            .await?;
        Ok(session.into())
    }

    pub async fn generate(
        &self,
        prompt: String,
        options: Option<FfiGenerateOptions>,
    ) -> Result<String, FfiError> {
        let options: GenerateOptions = options.unwrap_or_default().into();
        Ok(self.client.generate(&prompt, &options).await?)
    }

    /// Start streaming; returns the operation id carried by its events.
    pub async fn start_streaming(
        &self,
        prompt: String,
        options: Option<FfiGenerateOptions>,
    ) -> Result<u64, FfiError> {
        let options: GenerateOptions = options.unwrap_or_default().into();
        Ok(self.client.start_streaming(&prompt, &options).await?)
    }

    pub fn stop_streaming(&self) -> bool {
        self.client.stop_streaming()
    }

    pub fn is_streaming(&self) -> bool {
        self.client.is_streaming()
    }

    pub async fn summarize(&self, text: String, style: Option<String>) -> Result<String, FfiError> {
        let options = SummarizeOptions {
            style: style.map(SummarizeStyle::from),
        };
        Ok(self.client.summarize(&text, &options).await?)
    }

    pub async fn rewrite(&self, text: String, style: String) -> Result<String, FfiError> {
        Ok(self.client.rewrite(&text, RewriteStyle::from(style)).await?)
    }

    pub fn clear_session(&self) {
        self.client.clear_session();
    }

    /// Re-initialize after returning to the foreground.
    pub async fn resume(&self) -> Result<Option<FfiSession>, FfiError> {
        Ok(self.client.resume().await?.map(FfiSession::from))
    }

    pub fn session(&self) -> Option<FfiSession> {
        self.client.session().map(FfiSession::from)
    }

    pub fn capabilities(&self) -> Vec<FfiCapabilityInfo> {
        self.client
            .capabilities()
            .into_iter()
            .map(|info| FfiCapabilityInfo {
                capability: info.capability.as_str().to_string(),
                backend: info.backend,
                lifecycle: match info.lifecycle {
                    ondevice_ai::Lifecycle::Implicit => "implicit".to_string(),
                    ondevice_ai::Lifecycle::Provisioned => "provisioned".to_string(),
                },
            })
            .collect()
    }

    /// Take all buffered events in publish order.
    pub fn drain_events(&self) -> Vec<FfiAiEvent> {
        std::mem::take(&mut *self.event_buffer.lock())
    }
}
