//! Backend for explicitly provisioned feature models
//!
//! Each feature reports an integer status, downloads its own artifact, and
//! exposes either prompt generation or a selector-driven inference call.
//! The runtime has no notion of session instructions, so they are folded into
//! the prompt text.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    BackendError, CapabilityBackend, DownloadStream, InferenceRequest, Lifecycle, NativeStatus,
    PromptRequest, TokenStream,
};
use crate::constants::defaults;
use crate::types::GenerationParams;

/// A provisioned feature client (prompt, summarization or rewriting)
///
/// Clients only implement the inference methods their feature supports.
#[async_trait]
pub trait FeatureClient: Send + Sync {
    /// Feature status code, see [`crate::constants::feature_status`]
    async fn check_status(&self) -> Result<i32, BackendError>;

    async fn download(&self) -> Result<DownloadStream, BackendError>;

    /// Candidate texts for a prompt
    async fn generate_content(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<Vec<String>, BackendError> {
        Err(BackendError::Unsupported("feature client"))
    }

    async fn generate_content_stream(
        &self,
        _prompt: String,
        _params: GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        Err(BackendError::Unsupported("feature client"))
    }

    async fn run_inference(&self, _request: &InferenceRequest) -> Result<Vec<String>, BackendError> {
        Err(BackendError::Unsupported("feature client"))
    }
}

/// [`CapabilityBackend`] over a [`FeatureClient`]
pub struct ProvisionedModel {
    client: Arc<dyn FeatureClient>,
}

impl ProvisionedModel {
    pub fn new(client: Arc<dyn FeatureClient>) -> Self {
        Self { client }
    }

    fn full_prompt(request: &PromptRequest) -> String {
        match request.instructions.as_deref() {
            Some(instructions) => format!("{}\n\n{}", instructions, request.prompt),
            None => request.prompt.clone(),
        }
    }
}

#[async_trait]
impl CapabilityBackend for ProvisionedModel {
    fn name(&self) -> &'static str {
        "feature-model"
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Provisioned
    }

    fn default_max_tokens(&self) -> u32 {
        defaults::PROVISIONED_MAX_TOKENS
    }

    async fn probe(&self) -> Result<NativeStatus, BackendError> {
        self.client.check_status().await.map(NativeStatus::Feature)
    }

    async fn download(&self) -> Result<DownloadStream, BackendError> {
        self.client.download().await
    }

    async fn load(&self, _instructions: Option<&str>) -> Result<(), BackendError> {
        Ok(())
    }

    async fn respond(&self, request: &PromptRequest) -> Result<String, BackendError> {
        let prompt = Self::full_prompt(request);
        self.client
            .generate_content(&prompt, &request.params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Inference("Failed to generate content".to_string()))
    }

    async fn respond_stream(&self, request: &PromptRequest) -> Result<TokenStream, BackendError> {
        self.client
            .generate_content_stream(Self::full_prompt(request), request.params)
            .await
    }

    async fn run_inference(&self, request: &InferenceRequest) -> Result<Vec<String>, BackendError> {
        self.client.run_inference(request).await
    }
}
