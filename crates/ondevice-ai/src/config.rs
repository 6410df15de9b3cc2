//! Configuration types for the client facade

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{defaults, timeouts};

/// What `generate` / `start_streaming` do when no session exists
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPolicy {
    /// Reject with `SessionNotInitialized`
    #[default]
    FailFast,
    /// Initialize a session with the configured instructions, then proceed
    AutoInitialize,
}

/// Client configuration
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Budget for one availability probe before it reports `unavailable(unknown)`
    pub probe_timeout_ms: u64,
    /// Budget for one download attempt before it fails
    pub download_timeout_ms: u64,
    /// Temperature used when generate options omit one
    pub default_temperature: f32,
    /// Temperature for summaries produced through prompt templates
    pub summarize_temperature: f32,
    /// Behaviour of generation calls made before `init_session`
    pub session_policy: SessionPolicy,
    /// Instructions used for automatic and resumed sessions
    pub instructions: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: timeouts::PROBE_MS,
            download_timeout_ms: timeouts::DOWNLOAD_MS,
            default_temperature: defaults::TEMPERATURE,
            summarize_temperature: defaults::SUMMARIZE_TEMPERATURE,
            session_policy: SessionPolicy::default(),
            instructions: None,
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from JSON, filling omitted fields with defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    pub fn with_session_policy(mut self, policy: SessionPolicy) -> Self {
        self.session_policy = policy;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
