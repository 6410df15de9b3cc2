//! Common types shared by the coordinator and its callers

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One of the generation-based features, each probed and provisioned on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Generate,
    Summarize,
    Rewrite,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Self::Generate, Self::Summarize, Self::Rewrite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Summarize => "summarize",
            Self::Rewrite => "rewrite",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a capability cannot be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnavailableReason {
    AppleIntelligenceNotEnabled,
    DeviceNotEligible,
    ModelNotReady,
    DeviceNotSupported,
    Unknown,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppleIntelligenceNotEnabled => "appleIntelligenceNotEnabled",
            Self::DeviceNotEligible => "deviceNotEligible",
            Self::ModelNotReady => "modelNotReady",
            Self::DeviceNotSupported => "deviceNotSupported",
            Self::Unknown => "unknown",
        }
    }

    /// Map a reason string reported by a native runtime.
    ///
    /// Unrecognized strings become `Unknown`; this never fails.
    pub fn from_native(reason: &str) -> Self {
        match reason {
            "appleIntelligenceNotEnabled" => Self::AppleIntelligenceNotEnabled,
            "deviceNotEligible" => Self::DeviceNotEligible,
            "modelNotReady" => Self::ModelNotReady,
            "deviceNotSupported" => Self::DeviceNotSupported,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical readiness of a capability
///
/// Serializes as `{"status": "...", "reason": "..."}` where `reason` is only
/// present for `unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum ModelAvailability {
    Available,
    Downloading,
    Downloadable,
    Unavailable(UnavailableReason),
}

impl ModelAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Downloading => "downloading",
            Self::Downloadable => "downloadable",
            Self::Unavailable(_) => "unavailable",
        }
    }

    pub fn reason(&self) -> Option<UnavailableReason> {
        match self {
            Self::Unavailable(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Options accepted by `init_session`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// System prompt for the session
    #[serde(alias = "systemPrompt")]
    pub instructions: Option<String>,
}

impl SessionOptions {
    pub fn with_instructions(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
        }
    }

    /// Instructions with blank strings treated as absent
    pub fn normalized_instructions(&self) -> Option<String> {
        self.instructions
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
    }
}

/// The live configuration generation calls run against
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub instructions: Option<String>,
    pub generation_epoch: u64,
}

/// Caller-facing generation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    /// Sampling temperature in `[0, 1]`
    pub temperature: Option<f32>,
    /// Maximum response tokens; the backend's own cap applies when omitted
    pub max_tokens: Option<u32>,
}

impl GenerateOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }

    /// Fill omitted fields and clamp the temperature into `[0, 1]`
    pub fn resolve(&self, default_temperature: f32, default_max_tokens: u32) -> GenerationParams {
        let temperature = self.temperature.unwrap_or(default_temperature);
        GenerationParams {
            temperature: if temperature.is_nan() {
                default_temperature
            } else {
                temperature.clamp(0.0, 1.0)
            },
            max_tokens: self.max_tokens.unwrap_or(default_max_tokens),
        }
    }
}

/// Fully resolved parameters handed to a backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Output shape for `summarize`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum SummarizeStyle {
    #[default]
    Concise,
    Bullets,
    Headline,
}

impl SummarizeStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Bullets => "bullets",
            Self::Headline => "headline",
        }
    }
}

impl From<&str> for SummarizeStyle {
    /// Case-insensitive; unknown names fall back to `Concise`
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "bullets" => Self::Bullets,
            "headline" => Self::Headline,
            _ => Self::Concise,
        }
    }
}

impl From<String> for SummarizeStyle {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

/// Options accepted by `summarize`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizeOptions {
    pub style: Option<SummarizeStyle>,
}

impl SummarizeOptions {
    pub fn style(style: SummarizeStyle) -> Self {
        Self { style: Some(style) }
    }
}

/// Target tone or length for `rewrite`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum RewriteStyle {
    Professional,
    Friendly,
    Shorter,
    Longer,
    #[default]
    Rephrase,
}

impl RewriteStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Friendly => "friendly",
            Self::Shorter => "shorter",
            Self::Longer => "longer",
            Self::Rephrase => "rephrase",
        }
    }
}

impl From<&str> for RewriteStyle {
    /// Case-insensitive; unknown names fall back to `Rephrase`
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "professional" => Self::Professional,
            "friendly" => Self::Friendly,
            "shorter" => Self::Shorter,
            "longer" => Self::Longer,
            _ => Self::Rephrase,
        }
    }
}

impl From<String> for RewriteStyle {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

/// Why a streaming operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinishReason {
    Complete,
    Cancelled,
    MaxTokens,
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A message in a chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
