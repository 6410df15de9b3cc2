//! Library-wide constants
//!
//! Single source of truth for timeouts, generation defaults and the
//! native status codes the backends report.

/// Timeout configuration (in milliseconds)
pub mod timeouts {
    /// Upper bound on a single availability probe
    pub const PROBE_MS: u64 = 5_000;
    /// Upper bound on one model download attempt
    pub const DOWNLOAD_MS: u64 = 10 * 60 * 1_000;
    /// Re-probe interval while the platform downloads a model on its own
    pub const DOWNLOAD_POLL_MS: u64 = 500;
}

/// Default values for generation options
pub mod defaults {
    /// Sampling temperature when the caller does not pass one
    pub const TEMPERATURE: f32 = 0.7;
    /// Sampling temperature for summaries on the prompt-template path
    pub const SUMMARIZE_TEMPERATURE: f32 = 0.3;
    /// Response token cap for system-managed models
    pub const IMPLICIT_MAX_TOKENS: u32 = 200;
    /// Response token cap for provisioned feature models
    pub const PROVISIONED_MAX_TOKENS: u32 = 256;
}

/// Feature status codes reported by provisioned backends
pub mod feature_status {
    pub const UNAVAILABLE: i32 = 0;
    pub const DOWNLOADABLE: i32 = 1;
    pub const DOWNLOADING: i32 = 2;
    pub const AVAILABLE: i32 = 3;
}

/// Stable error codes surfaced to host code
pub mod codes {
    pub const SESSION_NOT_INITIALIZED: &str = "SESSION_NOT_INITIALIZED";
    pub const MODEL_UNAVAILABLE: &str = "MODEL_UNAVAILABLE";
    pub const DOWNLOAD_FAILED: &str = "DOWNLOAD_FAILED";
    pub const GENERATION_FAILED: &str = "GENERATION_FAILED";
    pub const CONTEXT_UNAVAILABLE: &str = "CONTEXT_UNAVAILABLE";
    pub const CANCELLED: &str = "CANCELLED";
    /// Code carried by `onError` events for failures after streaming began
    pub const GENERATION_ERROR: &str = "GENERATION_ERROR";
}
