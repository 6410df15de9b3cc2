//! Pluggable capability backend abstraction
//!
//! Native text models come with one of two lifecycles:
//! - **Implicit**: the operating system owns the model; it is either usable or
//!   not, and there is nothing to download ([`ImplicitModel`] over a [`SystemModel`]).
//! - **Provisioned**: each feature reports a status code, must be downloaded
//!   explicitly, and runs inference requests with an output-type selector
//!   ([`ProvisionedModel`] over a [`FeatureClient`]).
//!
//! Both are exposed through [`CapabilityBackend`], so the probe, provisioner,
//! coordinator and adapters never know which lifecycle they are driving.

pub mod implicit;
pub mod provisioned;
pub mod registry;

#[cfg(any(test, feature = "test-support"))]
pub mod stub;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::types::GenerationParams;

pub use implicit::{ImplicitModel, SystemAvailability, SystemModel};
pub use provisioned::{FeatureClient, ProvisionedModel};
pub use registry::{CapabilityInfo, CapabilitySet};

/// Error types for backend operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Host context is not available")]
    ContextUnavailable,

    #[error("Operation not supported by {0}")]
    Unsupported(&'static str),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Which model lifecycle a backend follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    /// System-managed model, nothing to provision
    Implicit,
    /// Feature model with an explicit download step
    Provisioned,
}

/// Raw readiness as a native runtime reports it, before translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeStatus {
    /// Implicit runtimes: usable, or not with a reason string
    System {
        available: bool,
        reason: Option<String>,
    },
    /// Provisioned runtimes: a feature status code
    Feature(i32),
}

/// One step of a native model download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Started { total_bytes: Option<u64> },
    Progress { bytes_downloaded: u64 },
    Completed,
    Failed(String),
}

/// Backend-specific output-shape selector for transformation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputType {
    // Summarizer
    OneBullet,
    ThreeBullets,
    Headline,
    // Rewriter
    Professional,
    Friendly,
    Shorten,
    Elaborate,
    Rephrase,
}

impl OutputType {
    /// Selector name as native feature clients spell it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneBullet => "ONE_BULLET",
            Self::ThreeBullets => "THREE_BULLETS",
            Self::Headline => "HEADLINE",
            Self::Professional => "PROFESSIONAL",
            Self::Friendly => "FRIENDLY",
            Self::Shorten => "SHORTEN",
            Self::Elaborate => "ELABORATE",
            Self::Rephrase => "REPHRASE",
        }
    }
}

/// A direct transformation request for provisioned backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub text: String,
    pub output_type: OutputType,
}

/// A prompt request for free generation
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    /// Session instructions, if any
    pub instructions: Option<String>,
    pub prompt: String,
    pub params: GenerationParams,
}

/// Token stream produced by a streaming response
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Progress stream produced by a model download
pub type DownloadStream = Pin<Box<dyn Stream<Item = DownloadStatus> + Send>>;

/// The contract every capability backend implements.
///
/// Coordinator code depends only on this trait. Backends translate their
/// native idioms (blocking calls, callbacks, status codes) into these async
/// methods; anything that blocks a thread must be moved off the runtime by
/// the backend itself.
#[async_trait]
pub trait CapabilityBackend: Send + Sync {
    // ─── IDENTITY ───────────────────────────────────────────────────

    /// Human-readable name for logs and diagnostics
    fn name(&self) -> &'static str;

    /// Which lifecycle this backend follows
    fn lifecycle(&self) -> Lifecycle;

    /// Token cap used when the caller does not pass one
    fn default_max_tokens(&self) -> u32;

    // ─── LIFECYCLE ──────────────────────────────────────────────────

    /// Query readiness in the backend's own vocabulary
    async fn probe(&self) -> Result<NativeStatus, BackendError>;

    /// Start provisioning the model artifact
    async fn download(&self) -> Result<DownloadStream, BackendError>;

    /// Load or prewarm the model for a new session
    async fn load(&self, instructions: Option<&str>) -> Result<(), BackendError>;

    // ─── INFERENCE ──────────────────────────────────────────────────

    /// Single request/response generation
    async fn respond(&self, request: &PromptRequest) -> Result<String, BackendError>;

    /// Streaming generation, one item per produced token
    async fn respond_stream(&self, request: &PromptRequest) -> Result<TokenStream, BackendError>;

    /// Direct transformation with an output-type selector, returning candidates
    async fn run_inference(&self, request: &InferenceRequest) -> Result<Vec<String>, BackendError>;
}
