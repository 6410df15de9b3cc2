//! Generation coordinator
//!
//! Runs one-shot and streaming generation against the live session.
//!
//! # Streaming guarantees
//!
//! - At most one streaming operation is active; starting another supersedes
//!   (and cancels) the previous one.
//! - Token indices of one operation start at 0 and increase by one.
//! - Exactly one terminal event (`Complete` or `Error`) is published per
//!   operation, and nothing after it.
//! - An operation whose session epoch has moved on never publishes tokens;
//!   its terminal event is a `cancelled` completion.
//!
//! All of this is decided by [`OperationEmitter`] under that operation's
//! lock. Delivery to subscribers happens after the lock is released, through
//! a per-operation outbox, so a sink may call back into the client (stop the
//! stream, unsubscribe) from inside its callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::backend::{CapabilityBackend, PromptRequest};
use crate::constants::{codes, defaults};
use crate::error::{AiError, Result};
use crate::events::{AiEvent, EventBus};
use crate::session::{ControlGuard, SessionManager};
use crate::types::{FinishReason, GenerateOptions};

#[derive(Debug, Default)]
struct OperationState {
    next_index: u32,
    cancelled: bool,
    terminated: bool,
}

impl OperationState {
    fn is_done(&self) -> bool {
        self.cancelled || self.terminated
    }
}

/// Events decided but not yet delivered, in decision order
#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<AiEvent>,
    delivering: bool,
}

/// Whether a token producer should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Gatekeeper for every event of one streaming operation
pub struct OperationEmitter {
    operation: u64,
    epoch: u64,
    max_tokens: Option<u32>,
    state: Mutex<OperationState>,
    outbox: Mutex<Outbox>,
    bus: Arc<EventBus>,
    sessions: Arc<SessionManager>,
}

impl OperationEmitter {
    fn new(
        operation: u64,
        epoch: u64,
        max_tokens: Option<u32>,
        bus: Arc<EventBus>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            operation,
            epoch,
            max_tokens,
            state: Mutex::new(OperationState::default()),
            outbox: Mutex::new(Outbox::default()),
            bus,
            sessions,
        }
    }

    pub fn operation(&self) -> u64 {
        self.operation
    }

    /// Tokens emitted so far
    pub fn forwarded(&self) -> u32 {
        self.state.lock().next_index
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().is_done()
    }

    fn is_stale(&self) -> bool {
        self.sessions.epoch() != self.epoch
    }

    // Called with the state lock held; the lock order is state, then outbox.
    fn enqueue(&self, event: AiEvent) {
        self.outbox.lock().queue.push_back(event);
    }

    fn complete(&self, state: &mut OperationState, reason: FinishReason) {
        state.terminated = true;
        self.enqueue(AiEvent::Complete {
            operation: self.operation,
            total_tokens: state.next_index,
            finish_reason: reason,
        });
    }

    /// Deliver queued events in order, with no lock held during `publish`
    ///
    /// Only one caller delivers at a time. A nested or concurrent flush
    /// returns immediately and the active deliverer picks up its events.
    fn flush(&self) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.delivering {
                return;
            }
            outbox.delivering = true;
        }
        loop {
            let next = {
                let mut outbox = self.outbox.lock();
                let next = outbox.queue.pop_front();
                if next.is_none() {
                    outbox.delivering = false;
                }
                next
            };
            match next {
                Some(event) => self.bus.publish(event),
                None => return,
            }
        }
    }

    /// Publish the next token
    pub fn emit_token(&self, token: String) -> Flow {
        let flow = {
            let mut state = self.state.lock();
            if state.is_done() {
                return Flow::Stop;
            }
            if self.is_stale() {
                log::debug!("Operation {} superseded by a newer session", self.operation);
                self.complete(&mut state, FinishReason::Cancelled);
                Flow::Stop
            } else {
                self.enqueue(AiEvent::Token {
                    operation: self.operation,
                    token,
                    index: state.next_index,
                });
                state.next_index += 1;

                if self.max_tokens.is_some_and(|max| state.next_index >= max) {
                    self.complete(&mut state, FinishReason::MaxTokens);
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
        };
        self.flush();
        flow
    }

    /// End the operation normally
    pub fn finish(&self, reason: FinishReason) {
        {
            let mut state = self.state.lock();
            if state.is_done() {
                return;
            }
            let reason = if self.is_stale() {
                FinishReason::Cancelled
            } else {
                reason
            };
            self.complete(&mut state, reason);
        }
        self.flush();
    }

    /// End the operation with a backend failure
    pub fn fail(&self, message: String) {
        {
            let mut state = self.state.lock();
            if state.is_done() {
                return;
            }
            if self.is_stale() {
                self.complete(&mut state, FinishReason::Cancelled);
            } else {
                log::warn!("Operation {} failed: {}", self.operation, message);
                state.terminated = true;
                self.enqueue(AiEvent::Error {
                    operation: self.operation,
                    message,
                    code: codes::GENERATION_ERROR.to_string(),
                });
            }
        }
        self.flush();
    }

    /// Cancel the operation. Returns false if it had already ended.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_done() {
                return false;
            }
            state.cancelled = true;
            self.complete(&mut state, FinishReason::Cancelled);
        }
        self.flush();
        true
    }
}

/// An active streaming operation and the task driving it
pub struct StreamingOperation {
    emitter: Arc<OperationEmitter>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingOperation {
    pub fn id(&self) -> u64 {
        self.emitter.operation()
    }

    fn attach(&self, handle: JoinHandle<()>) {
        let mut task = self.task.lock();
        if self.emitter.is_done() {
            handle.abort();
        } else {
            *task = Some(handle);
        }
    }

    fn cancel(&self) -> bool {
        let cancelled = self.emitter.cancel();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        cancelled
    }
}

/// One-shot and streaming generation over the session's backend
pub struct GenerationCoordinator {
    sessions: Arc<SessionManager>,
    bus: Arc<EventBus>,
    active: Arc<Mutex<Option<Arc<StreamingOperation>>>>,
    next_operation: AtomicU64,
    default_temperature: f32,
}

impl GenerationCoordinator {
    pub fn new(sessions: Arc<SessionManager>, bus: Arc<EventBus>) -> Self {
        Self {
            sessions,
            bus,
            active: Arc::new(Mutex::new(None)),
            next_operation: AtomicU64::new(1),
            default_temperature: defaults::TEMPERATURE,
        }
    }

    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Single request/response generation on the live session
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        let session = self
            .sessions
            .current()
            .ok_or(AiError::SessionNotInitialized)?;
        let backend = self.sessions.backend();
        let request = PromptRequest {
            instructions: session.instructions,
            prompt: prompt.to_string(),
            params: options.resolve(self.default_temperature, backend.default_max_tokens()),
        };
        Self::respond_once(backend.as_ref(), &request).await
    }

    /// One-shot generation against any backend, without a session
    pub async fn respond_once(
        backend: &dyn CapabilityBackend,
        request: &PromptRequest,
    ) -> Result<String> {
        log::debug!(
            "One-shot generation via {} (temperature {}, max tokens {})",
            backend.name(),
            request.params.temperature,
            request.params.max_tokens
        );
        backend.respond(request).await.map_err(AiError::from)
    }

    /// Start a streaming operation, superseding any active one
    ///
    /// Returns the new operation id; events follow on the bus.
    pub async fn start_streaming(&self, prompt: &str, options: &GenerateOptions) -> Result<u64> {
        let guard = self.sessions.lock_control().await;
        self.start_locked(&guard, prompt, options)
    }

    /// [`start_streaming`](Self::start_streaming) for callers already holding
    /// the control lock
    pub fn start_locked(
        &self,
        _guard: &ControlGuard<'_>,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<u64> {
        let session = self
            .sessions
            .current()
            .ok_or(AiError::SessionNotInitialized)?;

        self.stop_streaming();

        let backend = self.sessions.backend().clone();
        let request = PromptRequest {
            instructions: session.instructions,
            prompt: prompt.to_string(),
            params: options.resolve(self.default_temperature, backend.default_max_tokens()),
        };

        let id = self.next_operation.fetch_add(1, Ordering::SeqCst);
        let emitter = Arc::new(OperationEmitter::new(
            id,
            session.generation_epoch,
            options.max_tokens,
            self.bus.clone(),
            self.sessions.clone(),
        ));
        let operation = Arc::new(StreamingOperation {
            emitter: emitter.clone(),
            task: Mutex::new(None),
        });
        *self.active.lock() = Some(operation.clone());

        log::debug!(
            "Starting streaming operation {} (epoch {})",
            id,
            session.generation_epoch
        );

        let active = self.active.clone();
        let handle = tokio::spawn(async move {
            drive_stream(backend, request, &emitter).await;

            let mut slot = active.lock();
            if slot.as_ref().is_some_and(|op| op.id() == id) {
                *slot = None;
            }
        });
        operation.attach(handle);

        Ok(id)
    }

    /// Cancel the active streaming operation
    ///
    /// Its `cancelled` completion is published before returning, unless
    /// another thread is delivering that operation's events; then it follows
    /// them. Returns false when nothing was streaming.
    pub fn stop_streaming(&self) -> bool {
        let operation = self.active.lock().take();
        match operation {
            Some(operation) => {
                log::debug!("Stopping streaming operation {}", operation.id());
                operation.cancel()
            }
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for GenerationCoordinator {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

async fn drive_stream(
    backend: Arc<dyn CapabilityBackend>,
    request: PromptRequest,
    emitter: &OperationEmitter,
) {
    if emitter.max_tokens == Some(0) {
        emitter.finish(FinishReason::MaxTokens);
        return;
    }

    let mut stream = match backend.respond_stream(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            emitter.fail(e.to_string());
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(token) if token.is_empty() => continue,
            Ok(token) => {
                if emitter.emit_token(token) == Flow::Stop {
                    return;
                }
            }
            Err(e) => {
                emitter.fail(e.to_string());
                return;
            }
        }
    }
    emitter.finish(FinishReason::Complete);
}
