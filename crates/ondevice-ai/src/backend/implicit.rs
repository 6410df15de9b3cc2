//! Backend for system-managed models
//!
//! The operating system owns the model artifact and loads/unloads it on its
//! own schedule. There is no download step, and session instructions are
//! handed to the runtime natively rather than folded into the prompt.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;

use super::{
    BackendError, CapabilityBackend, DownloadStatus, DownloadStream, InferenceRequest, Lifecycle,
    NativeStatus, PromptRequest, TokenStream,
};
use crate::constants::defaults;
use crate::types::GenerationParams;

/// Readiness as a system-managed runtime reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAvailability {
    Available,
    /// Not usable; `reason` is the runtime's own reason name
    Unavailable { reason: String },
}

/// A system-managed language model runtime
#[async_trait]
pub trait SystemModel: Send + Sync {
    async fn availability(&self) -> SystemAvailability;

    /// Load model resources ahead of the first request
    async fn prewarm(&self, _instructions: Option<&str>) -> Result<(), BackendError> {
        Ok(())
    }

    async fn respond(
        &self,
        instructions: Option<&str>,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError>;

    async fn stream_response(
        &self,
        instructions: Option<String>,
        prompt: String,
        params: GenerationParams,
    ) -> Result<TokenStream, BackendError>;
}

/// [`CapabilityBackend`] over a [`SystemModel`]
pub struct ImplicitModel {
    model: Arc<dyn SystemModel>,
}

impl ImplicitModel {
    pub fn new(model: Arc<dyn SystemModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl CapabilityBackend for ImplicitModel {
    fn name(&self) -> &'static str {
        "system-model"
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Implicit
    }

    fn default_max_tokens(&self) -> u32 {
        defaults::IMPLICIT_MAX_TOKENS
    }

    async fn probe(&self) -> Result<NativeStatus, BackendError> {
        Ok(match self.model.availability().await {
            SystemAvailability::Available => NativeStatus::System {
                available: true,
                reason: None,
            },
            SystemAvailability::Unavailable { reason } => NativeStatus::System {
                available: false,
                reason: Some(reason),
            },
        })
    }

    async fn download(&self) -> Result<DownloadStream, BackendError> {
        // The system provisions the model itself
        Ok(Box::pin(stream::once(async { DownloadStatus::Completed })))
    }

    async fn load(&self, instructions: Option<&str>) -> Result<(), BackendError> {
        self.model.prewarm(instructions).await
    }

    async fn respond(&self, request: &PromptRequest) -> Result<String, BackendError> {
        self.model
            .respond(request.instructions.as_deref(), &request.prompt, &request.params)
            .await
    }

    async fn respond_stream(&self, request: &PromptRequest) -> Result<TokenStream, BackendError> {
        self.model
            .stream_response(
                request.instructions.clone(),
                request.prompt.clone(),
                request.params,
            )
            .await
    }

    async fn run_inference(&self, _request: &InferenceRequest) -> Result<Vec<String>, BackendError> {
        Err(BackendError::Unsupported(self.name()))
    }
}
