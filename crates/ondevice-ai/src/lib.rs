//! On-device generative text coordinator
//!
//! This library puts one asynchronous contract in front of two kinds of
//! native text models:
//! - **System-managed** models the operating system loads on its own
//!   ([`ImplicitModel`] over a [`SystemModel`])
//! - **Provisioned** feature models with an explicit status/download
//!   lifecycle ([`ProvisionedModel`] over a [`FeatureClient`])
//!
//! It covers availability probing, model downloads, sessions, one-shot and
//! streaming generation with cancellation, summarization and rewriting.
//!
//! # Example
//!
//! ```rust,ignore
//! use ondevice_ai::{CapabilitySet, ClientConfig, ImplicitModel, OnDeviceAi, SessionOptions};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(ImplicitModel::new(system_model));
//! let client = OnDeviceAi::new(CapabilitySet::shared(backend), ClientConfig::default());
//!
//! let mut events = client.subscribe();
//! client.init_session(&SessionOptions::with_instructions("You are concise.")).await?;
//! client.start_streaming("Tell me a story", &Default::default()).await?;
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod backend;
pub mod capability;
pub mod chat;
pub mod client;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod probe;
pub mod provisioner;
pub mod session;
pub mod transform;
pub mod types;

// Re-exports for convenience
pub use backend::{
    BackendError, CapabilityBackend, CapabilityInfo, CapabilitySet, DownloadStatus, FeatureClient,
    ImplicitModel, InferenceRequest, Lifecycle, NativeStatus, OutputType, PromptRequest,
    ProvisionedModel, SystemAvailability, SystemModel, TokenStream,
};
pub use capability::CapabilityRuntime;
pub use chat::ChatTranscript;
pub use client::{OnDeviceAi, SharedClient};
pub use config::{ClientConfig, SessionPolicy};
pub use coordinator::GenerationCoordinator;
pub use error::{AiError, Result};
pub use events::{AiEvent, EventBus, EventError, EventSink, EventSubscription, SubscriptionId, VecEventSink};
pub use probe::AvailabilityProbe;
pub use provisioner::{DownloadHandle, ModelProvisioner, ProvisionOutcome, ProvisionState};
pub use session::SessionManager;
pub use transform::{Rewriter, Summarizer};
pub use types::{
    Capability, ChatMessage, ChatRole, FinishReason, GenerateOptions, GenerationParams,
    ModelAvailability, RewriteStyle, Session, SessionOptions, SummarizeOptions, SummarizeStyle,
    UnavailableReason,
};
