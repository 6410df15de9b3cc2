//! Client facade - single entry point for host code
//!
//! [`OnDeviceAi`] composes the per-capability runtimes, the session manager,
//! the generation coordinator and the transformation adapters. Host code
//! should only talk to this type and the event subscriptions it hands out.

use std::sync::Arc;

use crate::backend::{CapabilityInfo, CapabilitySet};
use crate::capability::CapabilityRuntime;
use crate::chat::ChatTranscript;
use crate::config::{ClientConfig, SessionPolicy};
use crate::coordinator::GenerationCoordinator;
use crate::error::{AiError, Result};
use crate::events::{EventBus, EventSink, EventSubscription, SubscriptionId};
use crate::provisioner::DownloadHandle;
use crate::session::{ControlGuard, SessionManager};
use crate::transform::{Rewriter, Summarizer};
use crate::types::{
    Capability, GenerateOptions, ModelAvailability, RewriteStyle, Session, SessionOptions,
    SummarizeOptions,
};

/// The single entry point for on-device text generation.
///
/// Built once by the composition root; there is no global instance.
pub struct OnDeviceAi {
    config: ClientConfig,
    capabilities: CapabilitySet,
    generate: Arc<CapabilityRuntime>,
    bus: Arc<EventBus>,
    sessions: Arc<SessionManager>,
    coordinator: GenerationCoordinator,
    summarizer: Summarizer,
    rewriter: Rewriter,
}

/// Shared client handle
pub type SharedClient = Arc<OnDeviceAi>;

impl OnDeviceAi {
    pub fn new(capabilities: CapabilitySet, config: ClientConfig) -> Self {
        let runtime = |capability| {
            Arc::new(CapabilityRuntime::new(
                capability,
                capabilities.get(capability),
                &config,
            ))
        };
        let generate = runtime(Capability::Generate);
        let summarizer = Summarizer::new(runtime(Capability::Summarize), config.summarize_temperature);
        let rewriter = Rewriter::new(runtime(Capability::Rewrite), config.default_temperature);

        let bus = Arc::new(EventBus::new());
        let sessions = Arc::new(SessionManager::new(generate.backend().clone()));
        let coordinator = GenerationCoordinator::new(sessions.clone(), bus.clone())
            .with_default_temperature(config.default_temperature);

        log::debug!(
            "Client created ({} / {} / {})",
            capabilities.get(Capability::Generate).name(),
            capabilities.get(Capability::Summarize).name(),
            capabilities.get(Capability::Rewrite).name()
        );

        Self {
            config,
            capabilities,
            generate,
            bus,
            sessions,
            coordinator,
            summarizer,
            rewriter,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Backends serving each capability
    pub fn capabilities(&self) -> Vec<CapabilityInfo> {
        self.capabilities.list()
    }

    fn runtime(&self, capability: Capability) -> &Arc<CapabilityRuntime> {
        match capability {
            Capability::Generate => &self.generate,
            Capability::Summarize => self.summarizer.runtime(),
            Capability::Rewrite => self.rewriter.runtime(),
        }
    }

    // ─── AVAILABILITY ───────────────────────────────────────────────

    /// Current readiness of a capability. Never fails.
    pub async fn check_availability(&self, capability: Capability) -> ModelAvailability {
        self.runtime(capability).availability().await
    }

    /// Download a capability's model, joining a download already running
    pub async fn download_model(&self, capability: Capability) -> Result<bool> {
        self.runtime(capability).provisioner().provision().await
    }

    /// Start (or join) a download and observe its progress
    pub fn download(&self, capability: Capability) -> DownloadHandle {
        self.runtime(capability).provisioner().download()
    }

    // ─── SESSION ────────────────────────────────────────────────────

    /// Create or replace the session, cancelling any active stream
    pub async fn init_session(&self, options: &SessionOptions) -> Result<Session> {
        let guard = self.sessions.lock_control().await;
        self.coordinator.stop_streaming();
        self.sessions.init_locked(&guard, options).await
    }

    /// Drop the session, cancelling any active stream
    pub fn clear_session(&self) {
        self.coordinator.stop_streaming();
        self.sessions.clear_session();
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.current()
    }

    /// Re-initialize the session after the host returns to the foreground
    ///
    /// System runtimes may drop their model while the app is in the
    /// background. Returns `None` when there was no session to restore.
    pub async fn resume(&self) -> Result<Option<Session>> {
        let Some(previous) = self.sessions.current() else {
            return Ok(None);
        };
        log::info!("Resuming session {}", previous.id);
        let options = SessionOptions {
            instructions: previous.instructions,
        };
        self.init_session(&options).await.map(Some)
    }

    fn default_session_options(&self) -> SessionOptions {
        SessionOptions {
            instructions: self.config.instructions.clone(),
        }
    }

    async fn ensure_session_locked(&self, guard: &ControlGuard<'_>) -> Result<()> {
        if self.sessions.is_initialized() {
            return Ok(());
        }
        match self.config.session_policy {
            SessionPolicy::FailFast => Err(AiError::SessionNotInitialized),
            SessionPolicy::AutoInitialize => {
                log::debug!("No session, initializing automatically");
                self.sessions
                    .init_locked(guard, &self.default_session_options())
                    .await
                    .map(|_| ())
            }
        }
    }

    // ─── GENERATION ─────────────────────────────────────────────────

    /// Single request/response generation
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String> {
        if !self.sessions.is_initialized() {
            let guard = self.sessions.lock_control().await;
            self.ensure_session_locked(&guard).await?;
        }
        self.coordinator.generate(prompt, options).await
    }

    /// Start streaming generation; events follow on the subscriptions
    ///
    /// Returns the operation id carried by every event of this stream.
    pub async fn start_streaming(&self, prompt: &str, options: &GenerateOptions) -> Result<u64> {
        let guard = self.sessions.lock_control().await;
        self.ensure_session_locked(&guard).await?;
        self.coordinator.start_locked(&guard, prompt, options)
    }

    /// Cancel the active stream. Returns false if nothing was streaming.
    pub fn stop_streaming(&self) -> bool {
        self.coordinator.stop_streaming()
    }

    pub fn is_streaming(&self) -> bool {
        self.coordinator.is_streaming()
    }

    // ─── TRANSFORMATION ─────────────────────────────────────────────

    pub async fn summarize(&self, text: &str, options: &SummarizeOptions) -> Result<String> {
        self.summarizer.summarize(text, options).await
    }

    pub async fn rewrite(&self, text: &str, style: RewriteStyle) -> Result<String> {
        self.rewriter.rewrite(text, style).await
    }

    // ─── EVENTS ─────────────────────────────────────────────────────

    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        self.bus.add_sink(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // ─── CHAT ───────────────────────────────────────────────────────

    /// Append a user message and stream the assistant's reply into `transcript`
    pub async fn send_message(
        &self,
        transcript: &mut ChatTranscript,
        content: &str,
        options: &GenerateOptions,
    ) -> Result<u64> {
        transcript.push_user(content);
        transcript.begin_assistant();
        match self.start_streaming(content, options).await {
            Ok(operation) => {
                transcript.bind(operation);
                Ok(operation)
            }
            Err(e) => {
                transcript.abandon_turn();
                Err(e)
            }
        }
    }

    /// Forget the conversation and start a fresh session
    pub async fn clear_chat(&self, transcript: &mut ChatTranscript) -> Result<Session> {
        transcript.clear();
        self.clear_session();
        self.init_session(&self.default_session_options()).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::stub::{StubFeatureClient, StubSystemModel};
    use crate::backend::{ImplicitModel, OutputType, ProvisionedModel};
    use crate::constants::feature_status;
    use crate::events::{AiEvent, EventError};
    use crate::provisioner::ProvisionState;
    use crate::types::{FinishReason, UnavailableReason};

    fn implicit_client(model: Arc<StubSystemModel>, config: ClientConfig) -> OnDeviceAi {
        OnDeviceAi::new(
            CapabilitySet::shared(Arc::new(ImplicitModel::new(model))),
            config,
        )
    }

    fn client() -> (OnDeviceAi, Arc<StubSystemModel>) {
        let model = Arc::new(StubSystemModel::new());
        (implicit_client(model.clone(), ClientConfig::default()), model)
    }

    #[tokio::test]
    async fn test_ineligible_device_reports_reason() {
        let model = Arc::new(StubSystemModel::new().unavailable("deviceNotEligible"));
        let client = implicit_client(model, ClientConfig::default());

        let availability = client.check_availability(Capability::Generate).await;
        assert_eq!(
            availability,
            ModelAvailability::Unavailable(UnavailableReason::DeviceNotEligible)
        );
        let json = serde_json::to_value(availability).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "deviceNotEligible");
    }

    #[tokio::test]
    async fn test_generate_emits_no_events() {
        let (client, _) = client();
        let mut events = client.subscribe();

        client
            .init_session(&SessionOptions::with_instructions("You are concise."))
            .await
            .unwrap();
        let text = client
            .generate("Hi", &GenerateOptions::default())
            .await
            .unwrap();

        assert!(!text.is_empty());
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test]
    async fn test_stream_to_completion() {
        let (client, _) = client();
        let mut events = client.subscribe();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();

        client
            .start_streaming("Tell me a story", &GenerateOptions::default())
            .await
            .unwrap();
        let received = events.collect_operation().await;

        let indices: Vec<u32> = received
            .iter()
            .filter_map(|e| match e {
                AiEvent::Token { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(matches!(
            received.last(),
            Some(AiEvent::Complete {
                total_tokens: 4,
                finish_reason: FinishReason::Complete,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_immediate_stop_emits_single_cancelled() {
        let model = Arc::new(StubSystemModel::new().with_token_delay(Duration::from_millis(30)));
        let client = implicit_client(model, ClientConfig::default());
        let mut events = client.subscribe();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();

        let id = client
            .start_streaming("...", &GenerateOptions::default())
            .await
            .unwrap();
        client.stop_streaming();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            events.try_recv(),
            Some(AiEvent::Complete {
                operation: id,
                total_tokens: 0,
                finish_reason: FinishReason::Cancelled,
            })
        );
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test]
    async fn test_back_to_back_downloads_share_progress() {
        let summarize = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADABLE));
        let capabilities = CapabilitySet::shared(Arc::new(ImplicitModel::new(Arc::new(
            StubSystemModel::new(),
        ))))
        .with(
            Capability::Summarize,
            Arc::new(ProvisionedModel::new(summarize.clone())),
        );
        let client = OnDeviceAi::new(capabilities, ClientConfig::default());

        let mut progress = client.download(Capability::Summarize);
        assert_eq!(
            client.check_availability(Capability::Summarize).await,
            ModelAvailability::Downloading
        );

        let (first, second) = tokio::join!(
            client.download_model(Capability::Summarize),
            client.download_model(Capability::Summarize)
        );
        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(true));
        assert_eq!(summarize.download_count(), 1);

        let mut last = progress.state();
        while let Some(state) = progress.changed().await {
            last = state;
        }
        assert_eq!(last, ProvisionState::Completed);
        assert_eq!(
            client.check_availability(Capability::Summarize).await,
            ModelAvailability::Available
        );
    }

    #[tokio::test]
    async fn test_rewrite_styles() {
        let rewrite = Arc::new(StubFeatureClient::new());
        let capabilities = CapabilitySet::shared(Arc::new(ImplicitModel::new(Arc::new(
            StubSystemModel::new(),
        ))))
        .with(
            Capability::Rewrite,
            Arc::new(ProvisionedModel::new(rewrite.clone())),
        );
        let client = OnDeviceAi::new(capabilities, ClientConfig::default());
        let text = "Hey team, the launch review is now on Friday at noon in the big room.";

        let shorter = client.rewrite(text, RewriteStyle::Shorter).await.unwrap();
        assert!(shorter.len() < text.len());

        client
            .rewrite(text, RewriteStyle::from("bogus"))
            .await
            .unwrap();
        client.rewrite(text, RewriteStyle::Rephrase).await.unwrap();

        assert_eq!(
            rewrite.selectors(),
            vec![OutputType::Shorten, OutputType::Rephrase, OutputType::Rephrase]
        );
    }

    #[tokio::test]
    async fn test_fail_fast_without_session() {
        let (client, model) = client();
        assert_eq!(
            client.generate("Hi", &GenerateOptions::default()).await,
            Err(AiError::SessionNotInitialized)
        );
        assert_eq!(
            client
                .start_streaming("Hi", &GenerateOptions::default())
                .await,
            Err(AiError::SessionNotInitialized)
        );
        assert!(client.session().is_none());
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_auto_initialize_policy() {
        let model = Arc::new(StubSystemModel::new());
        let config = ClientConfig::default()
            .with_session_policy(SessionPolicy::AutoInitialize)
            .with_instructions("You are helpful.");
        let client = implicit_client(model.clone(), config);

        let text = client
            .generate("Hi", &GenerateOptions::default())
            .await
            .unwrap();
        assert!(!text.is_empty());

        let session = client.session().unwrap();
        assert_eq!(session.instructions.as_deref(), Some("You are helpful."));
        assert_eq!(
            model.prompts()[0].instructions.as_deref(),
            Some("You are helpful.")
        );

        // Later calls reuse the session
        client
            .generate("Again", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(client.session().unwrap().id, session.id);
    }

    #[tokio::test]
    async fn test_reinit_cancels_active_stream() {
        let model = Arc::new(StubSystemModel::new().with_token_delay(Duration::from_millis(20)));
        let client = implicit_client(model, ClientConfig::default());
        let mut events = client.subscribe();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();

        let id = client
            .start_streaming("Tell me a story", &GenerateOptions::default())
            .await
            .unwrap();
        client
            .init_session(&SessionOptions::with_instructions("Be brief."))
            .await
            .unwrap();

        assert_eq!(
            events.try_recv(),
            Some(AiEvent::Complete {
                operation: id,
                total_tokens: 0,
                finish_reason: FinishReason::Cancelled,
            })
        );
        assert!(!client.is_streaming());
    }

    struct StopOnFirstToken {
        client: std::sync::Weak<OnDeviceAi>,
    }

    impl EventSink for StopOnFirstToken {
        fn send(&self, event: &AiEvent) -> std::result::Result<(), EventError> {
            if matches!(event, AiEvent::Token { index: 0, .. }) {
                if let Some(client) = self.client.upgrade() {
                    client.stop_streaming();
                }
            }
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sink_can_stop_stream_from_callback() {
        let model = Arc::new(StubSystemModel::new().with_token_delay(Duration::from_millis(5)));
        let client = Arc::new(implicit_client(model, ClientConfig::default()));
        client.add_sink(Arc::new(StopOnFirstToken {
            client: Arc::downgrade(&client),
        }));
        let mut events = client.subscribe();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();

        let id = client
            .start_streaming("Tell me a story", &GenerateOptions::default())
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), events.collect_operation())
            .await
            .unwrap();

        assert_eq!(received.len(), 2);
        assert!(matches!(
            &received[0],
            AiEvent::Token { operation, index: 0, .. } if *operation == id
        ));
        assert_eq!(
            received[1],
            AiEvent::Complete {
                operation: id,
                total_tokens: 1,
                finish_reason: FinishReason::Cancelled,
            }
        );
        assert!(!client.is_streaming());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_init_and_start_are_serialized() {
        let client = Arc::new(implicit_client(
            Arc::new(StubSystemModel::new()),
            ClientConfig::default(),
        ));
        let mut events = client.subscribe();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();

        for _ in 0..25 {
            let init = tokio::spawn({
                let client = client.clone();
                async move { client.init_session(&SessionOptions::default()).await }
            });
            let start = tokio::spawn({
                let client = client.clone();
                async move {
                    client
                        .start_streaming("Tell me a story", &GenerateOptions::default())
                        .await
                }
            });
            let (init, start) = tokio::join!(init, start);
            let session = init.unwrap().unwrap();
            let id = start.unwrap().unwrap();

            let received = tokio::time::timeout(Duration::from_secs(2), events.collect_operation())
                .await
                .unwrap();
            assert!(received.iter().all(|e| e.operation() == id));

            let (terminal, tokens) = received.split_last().unwrap();
            for (expected, event) in tokens.iter().enumerate() {
                assert!(matches!(event, AiEvent::Token { index, .. } if *index as usize == expected));
            }
            match terminal {
                AiEvent::Complete {
                    total_tokens,
                    finish_reason,
                    ..
                } => {
                    assert_eq!(*total_tokens as usize, tokens.len());
                    if *finish_reason == FinishReason::Complete {
                        assert_eq!(tokens.len(), 4);
                    } else {
                        assert_eq!(*finish_reason, FinishReason::Cancelled);
                    }
                }
                other => panic!("unexpected terminal event {:?}", other),
            }
            assert_eq!(client.session().map(|s| s.id), Some(session.id));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(events.try_recv(), None);
        assert!(!client.is_streaming());
    }

    #[tokio::test]
    async fn test_clear_session_stops_stream() {
        let model = Arc::new(StubSystemModel::new().with_token_delay(Duration::from_millis(20)));
        let client = implicit_client(model, ClientConfig::default());
        let mut events = client.subscribe();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();
        client
            .start_streaming("Tell me a story", &GenerateOptions::default())
            .await
            .unwrap();

        client.clear_session();
        let received = events.collect_operation().await;
        assert!(matches!(
            received.last(),
            Some(AiEvent::Complete {
                finish_reason: FinishReason::Cancelled,
                ..
            })
        ));
        assert!(client.session().is_none());
        assert_eq!(
            client.generate("Hi", &GenerateOptions::default()).await,
            Err(AiError::SessionNotInitialized)
        );
    }

    #[tokio::test]
    async fn test_resume_restores_instructions() {
        let (client, model) = client();
        assert_eq!(client.resume().await, Ok(None));

        let before = client
            .init_session(&SessionOptions::with_instructions("You are concise."))
            .await
            .unwrap();
        let after = client.resume().await.unwrap().unwrap();

        assert_ne!(before.id, after.id);
        assert_eq!(after.instructions, before.instructions);
        assert_eq!(model.prewarm_count(), 2);
    }

    #[tokio::test]
    async fn test_send_message_accumulates_transcript() {
        let (client, _) = client();
        let mut events = client.subscribe();
        let mut transcript = ChatTranscript::new();
        client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();

        client
            .send_message(&mut transcript, "Tell me a story", &GenerateOptions::default())
            .await
            .unwrap();
        for event in events.collect_operation().await {
            transcript.apply(&event);
        }

        let messages = transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Tell me a story");
        assert_eq!(messages[1].content, "Once upon a time");
        assert!(!transcript.is_streaming());
    }

    #[tokio::test]
    async fn test_send_message_without_session_drops_placeholder() {
        let (client, _) = client();
        let mut transcript = ChatTranscript::new();
        assert!(client
            .send_message(&mut transcript, "Hi", &GenerateOptions::default())
            .await
            .is_err());
        assert_eq!(transcript.messages().len(), 1);
        assert!(!transcript.is_streaming());
    }

    #[tokio::test]
    async fn test_clear_chat_starts_fresh_session() {
        let model = Arc::new(StubSystemModel::new());
        let client = implicit_client(
            model,
            ClientConfig::default().with_instructions("You are helpful."),
        );
        let mut transcript = ChatTranscript::new();
        let first = client
            .init_session(&SessionOptions::default())
            .await
            .unwrap();
        transcript.push_user("Hi");

        let fresh = client.clear_chat(&mut transcript).await.unwrap();
        assert!(transcript.messages().is_empty());
        assert_ne!(fresh.id, first.id);
        assert_eq!(fresh.instructions.as_deref(), Some("You are helpful."));
    }

    #[tokio::test]
    async fn test_lists_capability_backends() {
        let (client, _) = client();
        let info = client.capabilities();
        assert_eq!(info.len(), 3);
        assert_eq!(info[0].capability, Capability::Generate);
        assert_eq!(info[0].backend, "system-model");
    }
}
