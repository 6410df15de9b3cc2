//! Availability probing
//!
//! Translates whatever a backend reports about its readiness into the
//! canonical [`ModelAvailability`]. Probing never fails: timeouts and backend
//! errors degrade to `Unavailable(Unknown)`.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{CapabilityBackend, NativeStatus};
use crate::constants::feature_status;
use crate::types::{Capability, ModelAvailability, UnavailableReason};

/// Readiness probe for one capability
#[derive(Clone)]
pub struct AvailabilityProbe {
    capability: Capability,
    backend: Arc<dyn CapabilityBackend>,
    timeout: Duration,
}

impl AvailabilityProbe {
    pub fn new(capability: Capability, backend: Arc<dyn CapabilityBackend>, timeout: Duration) -> Self {
        Self {
            capability,
            backend,
            timeout,
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Query the backend, bounded by the probe timeout
    pub async fn check(&self) -> ModelAvailability {
        match tokio::time::timeout(self.timeout, self.backend.probe()).await {
            Ok(Ok(status)) => {
                let availability = Self::translate(&status);
                log::debug!(
                    "{} availability via {}: {}",
                    self.capability,
                    self.backend.name(),
                    availability.status()
                );
                availability
            }
            Ok(Err(e)) => {
                log::warn!("{} availability check failed: {}", self.capability, e);
                ModelAvailability::Unavailable(UnavailableReason::Unknown)
            }
            Err(_) => {
                log::warn!(
                    "{} availability check timed out after {:?}",
                    self.capability,
                    self.timeout
                );
                ModelAvailability::Unavailable(UnavailableReason::Unknown)
            }
        }
    }

    /// Map a native status onto the canonical availability
    pub fn translate(status: &NativeStatus) -> ModelAvailability {
        match status {
            NativeStatus::System {
                available: true, ..
            } => ModelAvailability::Available,
            NativeStatus::System {
                available: false,
                reason,
            } => ModelAvailability::Unavailable(
                reason
                    .as_deref()
                    .map(UnavailableReason::from_native)
                    .unwrap_or(UnavailableReason::Unknown),
            ),
            NativeStatus::Feature(code) => match *code {
                feature_status::AVAILABLE => ModelAvailability::Available,
                feature_status::DOWNLOADING => ModelAvailability::Downloading,
                feature_status::DOWNLOADABLE => ModelAvailability::Downloadable,
                feature_status::UNAVAILABLE => {
                    ModelAvailability::Unavailable(UnavailableReason::DeviceNotSupported)
                }
                _ => ModelAvailability::Unavailable(UnavailableReason::Unknown),
            },
        }
    }
}
