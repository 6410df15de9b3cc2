//! Session ownership
//!
//! At most one [`Session`] is live at a time. Every (re)initialization and
//! every clear bumps the generation epoch, which is what invalidates
//! streaming operations started against an older session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::backend::CapabilityBackend;
use crate::error::Result;
use crate::types::{Session, SessionOptions};

/// Guard proving the caller holds the control lock
pub type ControlGuard<'a> = MutexGuard<'a, ()>;

/// Owner of the live session and the control lock
pub struct SessionManager {
    backend: Arc<dyn CapabilityBackend>,
    /// Serializes init, clear-with-restart and stream starts
    control: Mutex<()>,
    session: RwLock<Option<Session>>,
    epoch: AtomicU64,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn CapabilityBackend>) -> Self {
        Self {
            backend,
            control: Mutex::new(()),
            session: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Backend sessions generate against
    pub fn backend(&self) -> &Arc<dyn CapabilityBackend> {
        &self.backend
    }

    /// Acquire the control lock
    pub async fn lock_control(&self) -> ControlGuard<'_> {
        self.control.lock().await
    }

    /// Initialize or replace the session
    pub async fn init_session(&self, options: &SessionOptions) -> Result<Session> {
        let guard = self.lock_control().await;
        self.init_locked(&guard, options).await
    }

    /// Initialize or replace the session while already holding the control lock
    pub async fn init_locked(
        &self,
        _guard: &ControlGuard<'_>,
        options: &SessionOptions,
    ) -> Result<Session> {
        let instructions = options.normalized_instructions();
        self.backend.load(instructions.as_deref()).await?;

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            instructions,
            generation_epoch: epoch,
        };
        log::info!(
            "Session {} initialized (epoch {}, instructions: {})",
            session.id,
            epoch,
            session.instructions.is_some()
        );
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    /// Drop the session, if any
    pub fn clear_session(&self) {
        let previous = self.session.write().take();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = previous {
            log::info!("Session {} cleared", session.id);
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Current generation epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.session.read().is_some()
    }
}
