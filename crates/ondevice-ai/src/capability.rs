//! Per-capability readiness: probe plus provisioner for one backend

use std::sync::Arc;
use std::time::Duration;

use crate::backend::CapabilityBackend;
use crate::config::ClientConfig;
use crate::constants::timeouts;
use crate::error::{AiError, Result};
use crate::probe::AvailabilityProbe;
use crate::provisioner::ModelProvisioner;
use crate::types::{Capability, ModelAvailability};

/// Everything needed to make one capability usable
pub struct CapabilityRuntime {
    capability: Capability,
    backend: Arc<dyn CapabilityBackend>,
    probe: AvailabilityProbe,
    provisioner: ModelProvisioner,
    download_timeout: Duration,
}

impl CapabilityRuntime {
    pub fn new(
        capability: Capability,
        backend: Arc<dyn CapabilityBackend>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            capability,
            probe: AvailabilityProbe::new(capability, backend.clone(), config.probe_timeout()),
            provisioner: ModelProvisioner::new(
                capability,
                backend.clone(),
                config.download_timeout(),
            ),
            backend,
            download_timeout: config.download_timeout(),
        }
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn backend(&self) -> &Arc<dyn CapabilityBackend> {
        &self.backend
    }

    pub fn probe(&self) -> &AvailabilityProbe {
        &self.probe
    }

    pub fn provisioner(&self) -> &ModelProvisioner {
        &self.provisioner
    }

    /// Probe, reporting `Downloading` while our own download runs
    pub async fn availability(&self) -> ModelAvailability {
        if self.provisioner.is_in_flight() {
            return ModelAvailability::Downloading;
        }
        self.probe.check().await
    }

    /// Make the capability usable, downloading its model if needed
    ///
    /// A download the platform is already running is waited out, not
    /// started again.
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.provisioner.is_in_flight() {
            return self.provision().await;
        }
        match self.probe.check().await {
            ModelAvailability::Available => Ok(()),
            ModelAvailability::Downloadable => {
                log::info!("{} model not ready, provisioning first", self.capability);
                self.provision().await
            }
            ModelAvailability::Downloading => self.wait_for_platform_download().await,
            ModelAvailability::Unavailable(reason) => Err(AiError::ModelUnavailable(reason)),
        }
    }

    async fn provision(&self) -> Result<()> {
        if self.provisioner.provision().await? {
            Ok(())
        } else {
            Err(AiError::DownloadFailed(
                "download ended without completing".to_string(),
            ))
        }
    }

    async fn wait_for_platform_download(&self) -> Result<()> {
        log::info!(
            "{} model is already downloading, waiting for it",
            self.capability
        );
        let settled = async {
            loop {
                tokio::time::sleep(Duration::from_millis(timeouts::DOWNLOAD_POLL_MS)).await;
                let availability = self.probe.check().await;
                if availability != ModelAvailability::Downloading {
                    return availability;
                }
            }
        };

        match tokio::time::timeout(self.download_timeout, settled).await {
            Ok(ModelAvailability::Available) => Ok(()),
            Ok(ModelAvailability::Unavailable(reason)) => Err(AiError::ModelUnavailable(reason)),
            Ok(ModelAvailability::Downloadable) => Err(AiError::DownloadFailed(
                "download ended without completing".to_string(),
            )),
            Ok(ModelAvailability::Downloading) | Err(_) => {
                log::warn!("{} platform download timed out", self.capability);
                Err(AiError::DownloadFailed("timed out".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::{StubFeatureClient, StubSystemModel};
    use crate::backend::{ImplicitModel, ProvisionedModel};
    use crate::constants::feature_status;
    use crate::types::UnavailableReason;

    #[tokio::test]
    async fn test_in_flight_download_reports_downloading() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADABLE));
        let runtime = CapabilityRuntime::new(
            Capability::Rewrite,
            Arc::new(ProvisionedModel::new(client)),
            &ClientConfig::default(),
        );

        let handle = runtime.provisioner().download();
        assert_eq!(runtime.availability().await, ModelAvailability::Downloading);
        handle.outcome().await;
        assert_eq!(runtime.availability().await, ModelAvailability::Available);
    }

    #[tokio::test]
    async fn test_unavailable_is_not_provisioned() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::UNAVAILABLE));
        let runtime = CapabilityRuntime::new(
            Capability::Summarize,
            Arc::new(ProvisionedModel::new(client.clone())),
            &ClientConfig::default(),
        );

        assert_eq!(
            runtime.ensure_ready().await,
            Err(AiError::ModelUnavailable(UnavailableReason::DeviceNotSupported))
        );
        assert_eq!(client.download_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_download_is_awaited_not_restarted() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADING));
        let runtime = CapabilityRuntime::new(
            Capability::Summarize,
            Arc::new(ProvisionedModel::new(client.clone())),
            &ClientConfig::default(),
        );

        let finisher = tokio::spawn({
            let client = client.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                client.set_status(feature_status::AVAILABLE);
            }
        });

        assert_eq!(runtime.ensure_ready().await, Ok(()));
        assert_eq!(client.download_count(), 0);
        finisher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_platform_download_times_out() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADING));
        let config = ClientConfig {
            download_timeout_ms: 3_000,
            ..ClientConfig::default()
        };
        let runtime = CapabilityRuntime::new(
            Capability::Rewrite,
            Arc::new(ProvisionedModel::new(client.clone())),
            &config,
        );

        assert_eq!(
            runtime.ensure_ready().await,
            Err(AiError::DownloadFailed("timed out".to_string()))
        );
        assert_eq!(client.download_count(), 0);
    }

    #[tokio::test]
    async fn test_implicit_available_is_ready() {
        let runtime = CapabilityRuntime::new(
            Capability::Generate,
            Arc::new(ImplicitModel::new(Arc::new(StubSystemModel::new()))),
            &ClientConfig::default(),
        );
        assert_eq!(runtime.ensure_ready().await, Ok(()));
    }
}
