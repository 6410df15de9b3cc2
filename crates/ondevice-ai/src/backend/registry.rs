//! Capability registry
//!
//! Holds one backend per capability. Capabilities are independent: a
//! platform may serve all three from one system model, or give each its own
//! provisioned feature client.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::{CapabilityBackend, Lifecycle};
use crate::types::Capability;

/// Backend information for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo {
    pub capability: Capability,
    pub backend: String,
    pub lifecycle: Lifecycle,
}

/// Registry of the backend serving each capability
#[derive(Clone)]
pub struct CapabilitySet {
    backends: HashMap<Capability, Arc<dyn CapabilityBackend>>,
}

impl CapabilitySet {
    /// Register a distinct backend for each capability
    pub fn new(
        generate: Arc<dyn CapabilityBackend>,
        summarize: Arc<dyn CapabilityBackend>,
        rewrite: Arc<dyn CapabilityBackend>,
    ) -> Self {
        let mut backends: HashMap<Capability, Arc<dyn CapabilityBackend>> = HashMap::new();
        backends.insert(Capability::Generate, generate);
        backends.insert(Capability::Summarize, summarize);
        backends.insert(Capability::Rewrite, rewrite);
        Self { backends }
    }

    /// Serve every capability from the same backend
    pub fn shared(backend: Arc<dyn CapabilityBackend>) -> Self {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    /// Replace the backend for one capability
    pub fn with(mut self, capability: Capability, backend: Arc<dyn CapabilityBackend>) -> Self {
        self.backends.insert(capability, backend);
        self
    }

    /// Backend for a capability
    pub fn get(&self, capability: Capability) -> Arc<dyn CapabilityBackend> {
        // Both constructors populate every capability
        self.backends[&capability].clone()
    }

    /// Information about every registered backend, in capability order
    pub fn list(&self) -> Vec<CapabilityInfo> {
        Capability::ALL
            .iter()
            .map(|capability| {
                let backend = self.get(*capability);
                CapabilityInfo {
                    capability: *capability,
                    backend: backend.name().to_string(),
                    lifecycle: backend.lifecycle(),
                }
            })
            .collect()
    }
}
