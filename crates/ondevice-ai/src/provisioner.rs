//! Model provisioning
//!
//! Downloads a capability's model artifact at most once at a time. A second
//! request while a download runs joins the running attempt and observes the
//! same progress and outcome.
//!
//! The in-flight slot is released before the terminal state is published, so
//! anyone who sees a failure and retries starts a fresh attempt.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::backend::{CapabilityBackend, DownloadStatus};
use crate::error::{AiError, Result};
use crate::types::Capability;

/// Observable progress of one download attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ProvisionState {
    Pending,
    #[serde(rename_all = "camelCase")]
    Progress {
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },
    Completed,
    Failed { cause: String },
}

impl ProvisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// How a download attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Completed,
    Failed(String),
    /// The backend's progress stream ended without a terminal status
    Incomplete,
    /// The attempt was aborted before it finished
    Cancelled,
}

impl ProvisionOutcome {
    /// Caller-facing result: `true` on completion, `false` if the backend
    /// stopped reporting without finishing
    pub fn into_result(self) -> Result<bool> {
        match self {
            Self::Completed => Ok(true),
            Self::Incomplete => Ok(false),
            Self::Failed(cause) => Err(AiError::DownloadFailed(cause)),
            Self::Cancelled => Err(AiError::Cancelled),
        }
    }
}

/// Shared view of a running download attempt
#[derive(Clone)]
pub struct DownloadHandle {
    capability: Capability,
    state: watch::Receiver<ProvisionState>,
    outcome: Shared<BoxFuture<'static, ProvisionOutcome>>,
}

impl DownloadHandle {
    pub fn capability(&self) -> Capability {
        self.capability
    }

    /// Latest published state
    pub fn state(&self) -> ProvisionState {
        self.state.borrow().clone()
    }

    /// Wait for the next state change; `None` once the attempt is over and
    /// every state has been seen
    pub async fn changed(&mut self) -> Option<ProvisionState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Wait for the attempt to finish
    pub async fn outcome(&self) -> ProvisionOutcome {
        self.outcome.clone().await
    }
}

/// Deduplicating downloader for one capability
pub struct ModelProvisioner {
    capability: Capability,
    backend: Arc<dyn CapabilityBackend>,
    timeout: Duration,
    in_flight: Arc<Mutex<Option<DownloadHandle>>>,
}

impl ModelProvisioner {
    pub fn new(capability: Capability, backend: Arc<dyn CapabilityBackend>, timeout: Duration) -> Self {
        Self {
            capability,
            backend,
            timeout,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Start a download, or join the one already running
    pub fn download(&self) -> DownloadHandle {
        let mut slot = self.in_flight.lock();
        if let Some(handle) = slot.as_ref() {
            log::debug!("Joining in-flight {} download", self.capability);
            return handle.clone();
        }

        log::info!(
            "Starting {} model download via {}",
            self.capability,
            self.backend.name()
        );

        let (tx, rx) = watch::channel(ProvisionState::Pending);
        let backend = self.backend.clone();
        let in_flight = self.in_flight.clone();
        let capability = self.capability;
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, drive(backend, &tx)).await {
                Ok(outcome) => outcome,
                Err(_) => ProvisionOutcome::Failed("timed out".to_string()),
            };

            in_flight.lock().take();

            match &outcome {
                ProvisionOutcome::Completed => {
                    log::info!("{} model download completed", capability);
                    tx.send_replace(ProvisionState::Completed);
                }
                ProvisionOutcome::Failed(cause) => {
                    log::warn!("{} model download failed: {}", capability, cause);
                    tx.send_replace(ProvisionState::Failed {
                        cause: cause.clone(),
                    });
                }
                ProvisionOutcome::Incomplete => {
                    log::warn!("{} model download ended without a result", capability);
                }
                ProvisionOutcome::Cancelled => {}
            }
            outcome
        });

        let outcome = task
            .map(|joined| joined.unwrap_or(ProvisionOutcome::Cancelled))
            .boxed()
            .shared();

        let handle = DownloadHandle {
            capability: self.capability,
            state: rx,
            outcome,
        };
        *slot = Some(handle.clone());
        handle
    }

    /// Download (or join) and wait for the result
    pub async fn provision(&self) -> Result<bool> {
        self.download().outcome().await.into_result()
    }
}

async fn drive(
    backend: Arc<dyn CapabilityBackend>,
    tx: &watch::Sender<ProvisionState>,
) -> ProvisionOutcome {
    let mut stream = match backend.download().await {
        Ok(stream) => stream,
        Err(e) => return ProvisionOutcome::Failed(e.to_string()),
    };

    let mut total_bytes = None;
    while let Some(status) = stream.next().await {
        match status {
            DownloadStatus::Started { total_bytes: total } => {
                total_bytes = total;
                tx.send_replace(ProvisionState::Progress {
                    bytes_downloaded: 0,
                    total_bytes,
                });
            }
            DownloadStatus::Progress { bytes_downloaded } => {
                tx.send_replace(ProvisionState::Progress {
                    bytes_downloaded,
                    total_bytes,
                });
            }
            DownloadStatus::Completed => return ProvisionOutcome::Completed,
            DownloadStatus::Failed(cause) => return ProvisionOutcome::Failed(cause),
        }
    }
    ProvisionOutcome::Incomplete
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::{StubFeatureClient, StubSystemModel};
    use crate::backend::{ImplicitModel, ProvisionedModel};
    use crate::constants::feature_status;

    fn provisioner(client: Arc<StubFeatureClient>, timeout: Duration) -> ModelProvisioner {
        ModelProvisioner::new(
            Capability::Summarize,
            Arc::new(ProvisionedModel::new(client)),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_concurrent_downloads_share_one_attempt() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADABLE));
        let provisioner = provisioner(client.clone(), Duration::from_secs(5));

        let (first, second) = tokio::join!(provisioner.provision(), provisioner.provision());
        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(true));
        assert_eq!(client.download_count(), 1);
        assert_eq!(client.status(), feature_status::AVAILABLE);
        assert!(!provisioner.is_in_flight());
    }

    #[tokio::test]
    async fn test_failure_releases_slot_for_retry() {
        let client = Arc::new(
            StubFeatureClient::new()
                .with_status(feature_status::DOWNLOADABLE)
                .failing_download("network lost"),
        );
        let provisioner = provisioner(client.clone(), Duration::from_secs(5));

        assert_eq!(
            provisioner.provision().await,
            Err(AiError::DownloadFailed("network lost".to_string()))
        );
        assert!(!provisioner.is_in_flight());

        tokio_test::assert_err!(provisioner.provision().await);
        assert_eq!(client.download_count(), 2);
    }

    #[tokio::test]
    async fn test_progress_is_observable() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADABLE));
        let provisioner = provisioner(client, Duration::from_secs(5));

        let mut handle = provisioner.download();
        assert!(provisioner.is_in_flight());

        let mut states = Vec::new();
        while let Some(state) = handle.changed().await {
            let terminal = state.is_terminal();
            states.push(state);
            if terminal {
                break;
            }
        }

        assert_eq!(states.last(), Some(&ProvisionState::Completed));
        assert_eq!(handle.state(), ProvisionState::Completed);
        assert_eq!(handle.outcome().await, ProvisionOutcome::Completed);
    }

    #[tokio::test]
    async fn test_timeout_fails_attempt() {
        let client = Arc::new(
            StubFeatureClient::new()
                .with_status(feature_status::DOWNLOADABLE)
                .with_download_step_delay(Duration::from_secs(5)),
        );
        let provisioner = provisioner(client, Duration::from_millis(20));

        assert_eq!(
            provisioner.provision().await,
            Err(AiError::DownloadFailed("timed out".to_string()))
        );
        assert!(!provisioner.is_in_flight());
    }

    #[tokio::test]
    async fn test_implicit_backend_succeeds_immediately() {
        let provisioner = ModelProvisioner::new(
            Capability::Generate,
            Arc::new(ImplicitModel::new(Arc::new(StubSystemModel::new()))),
            Duration::from_secs(5),
        );
        let completed = tokio_test::assert_ok!(provisioner.provision().await);
        assert!(completed);
    }
}
