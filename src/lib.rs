pub mod error;
pub mod insights;
pub mod manager;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod store;
pub mod stores;
pub mod types;

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::{ChatError, MemoryError, ProviderError};
pub use manager::ConversationMemory;
pub use prompt::{build_context_prompt, strip_thinking};
pub use provider::{ChatMessage, ChatProvider, ChatRequest};
pub use providers::anthropic::AnthropicProvider;
pub use providers::openai::OpenAiProvider;
pub use store::PatientStore;
pub use stores::file::FilePatientStore;
pub use types::{
    display_name, ClearOutcome, ContextSummary, MemoryEntry, MemoryStats, PatientRecord, Role,
};

/// Chat pipeline configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    /// How many trailing history entries go to the provider each turn.
    pub history_window: usize,
    pub provider_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".into(),
            max_tokens: 500,
            history_window: 20,
            provider_timeout: Duration::from_secs(30),
        }
    }
}

/// One inbound patient message plus its session parameters.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub patient_id: String,
    pub message: String,
    pub journey_stage: String,
    pub emotional_state: String,
    pub user_role: String,
}

impl TurnRequest {
    pub fn new(patient_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            message: message.into(),
            journey_stage: "awareness".into(),
            emotional_state: "neutral".into(),
            user_role: "patient".into(),
        }
    }

    pub fn with_journey_stage(mut self, stage: impl Into<String>) -> Self {
        self.journey_stage = stage.into();
        self
    }

    pub fn with_emotional_state(mut self, state: impl Into<String>) -> Self {
        self.emotional_state = state.into();
        self
    }

    pub fn with_user_role(mut self, role: impl Into<String>) -> Self {
        self.user_role = role.into();
        self
    }
}

/// What a completed turn hands back to the transport layer.
#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: String,
    pub model: String,
    /// Whether prior conversations informed this turn's prompt.
    pub has_memory: bool,
    pub latency_ms: u64,
}

/// The chat-turn pipeline every transport handler calls: load memory,
/// inject context into the system prompt, call the provider, record both
/// sides of the exchange, persist.
///
/// Memory degradation never fails a turn — a patient with an unreachable
/// store still gets an answer, just without continuity. Provider failures,
/// timeouts, and cancellation do fail the turn: there is no reply to give.
pub struct CareChat {
    provider: Box<dyn ChatProvider>,
    memory: ConversationMemory,
    config: ChatConfig,
}

impl CareChat {
    pub fn new(provider: impl ChatProvider + 'static, memory: ConversationMemory) -> Self {
        Self {
            provider: Box::new(provider),
            memory,
            config: ChatConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Run one turn to completion.
    pub async fn respond(&self, request: TurnRequest) -> Result<TurnOutcome, ChatError> {
        self.run(request, None).await
    }

    /// Run one turn with cancellation support. A cancelled turn leaves
    /// memory untouched.
    pub async fn respond_with_cancel(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        self.run(request, Some(cancel)).await
    }

    async fn run(
        &self,
        request: TurnRequest,
        cancel: Option<CancellationToken>,
    ) -> Result<TurnOutcome, ChatError> {
        let mut history = self.memory.load_history(&request.patient_id).await?;
        let summary = self.memory.get_context_summary(&request.patient_id).await?;
        let has_memory = summary.total_conversations > 0;

        let name = if summary.name.is_empty() {
            display_name(&request.patient_id)
        } else {
            summary.name.clone()
        };
        let system = format!(
            "{}\n\nEMOTIONAL ATTUNEMENT:\n- {}",
            prompt::build_context_prompt(
                &summary,
                &request.journey_stage,
                &request.user_role,
                &name
            ),
            prompt::emotional_tone(&request.emotional_state),
        );

        history.push(
            MemoryEntry::user(&request.message)
                .with_journey_stage(&request.journey_stage)
                .with_user_role(&request.user_role)
                .with_emotional_state(&request.emotional_state),
        );

        let window_start = history.len().saturating_sub(self.config.history_window);
        let chat_request = ChatRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: Some(system),
            messages: history[window_start..].iter().map(ChatMessage::from).collect(),
        };

        let started = Instant::now();
        let call = tokio::time::timeout(
            self.config.provider_timeout,
            self.provider.complete(chat_request),
        );
        let raw = if let Some(ref cancel) = cancel {
            tokio::select! {
                result = call => result.map_err(|_| ChatError::Timeout)??,
                _ = cancel.cancelled() => {
                    info!(patient_id = %request.patient_id, "turn cancelled during provider call");
                    return Err(ChatError::Cancelled);
                }
            }
        } else {
            call.await.map_err(|_| ChatError::Timeout)??
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let reply = prompt::strip_thinking(&raw).to_string();
        history.push(
            MemoryEntry::assistant(&reply)
                .with_journey_stage(&request.journey_stage)
                .with_model(self.provider.name())
                .with_latency_ms(latency_ms),
        );

        // Best-effort: a lost save degrades continuity, not the reply.
        self.memory
            .save_history(&request.patient_id, history)
            .await?;

        info!(
            patient_id = %request.patient_id,
            latency_ms,
            has_memory,
            "turn complete"
        );

        Ok(TurnOutcome {
            reply,
            model: self.config.model.clone(),
            has_memory,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct MockProvider {
        reply: String,
        last_request: Mutex<Option<ChatRequest>>,
    }

    impl MockProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.into(),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
            *self.last_request.lock().await = Some(request);
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ChatProvider for FailingProvider {
        async fn complete(&self, _: ChatRequest) -> Result<String, ProviderError> {
            Err(ProviderError::Api {
                status: 503,
                body: "overloaded".into(),
            })
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct StuckProvider;

    #[async_trait]
    impl ChatProvider for StuckProvider {
        async fn complete(&self, _: ChatRequest) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("too late".into())
        }

        fn name(&self) -> &str {
            "stuck"
        }
    }

    fn chat_with(provider: impl ChatProvider + 'static) -> (tempfile::TempDir, CareChat) {
        let dir = tempfile::tempdir().unwrap();
        let memory = ConversationMemory::new(FilePatientStore::new(dir.path()));
        (dir, CareChat::new(provider, memory))
    }

    #[tokio::test]
    async fn first_turn_answers_and_persists_both_sides() {
        let (_dir, chat) = chat_with(MockProvider::new(
            "<thinking>she sounds anxious</thinking>You're not alone in this.",
        ));

        let outcome = chat
            .respond(TurnRequest::new(
                "patient_jane_doe",
                "I was just diagnosed with lupus and I'm scared",
            ))
            .await
            .unwrap();

        assert_eq!(outcome.reply, "You're not alone in this.");
        assert!(!outcome.has_memory);

        let history = chat.memory().load_history("patient_jane_doe").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].model.as_deref(), Some("mock"));
        assert!(history[1].latency_ms.is_some());

        let summary = chat
            .memory()
            .get_context_summary("patient_jane_doe")
            .await
            .unwrap();
        assert!(summary.conditions.contains("Lupus"));
    }

    #[tokio::test]
    async fn second_turn_has_memory_and_full_history() {
        let (_dir, chat) = chat_with(MockProvider::new("Of course, let's talk it through."));

        let first = chat
            .respond(TurnRequest::new(
                "patient_jane_doe",
                "I'm worried about the new treatment plan",
            ))
            .await
            .unwrap();
        assert!(!first.has_memory);

        let second = chat
            .respond(TurnRequest::new("patient_jane_doe", "can we go over it again?"))
            .await
            .unwrap();
        assert!(second.has_memory);

        let history = chat.memory().load_history("patient_jane_doe").await.unwrap();
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn system_prompt_gains_memory_block_after_first_exchange() {
        let dir = tempfile::tempdir().unwrap();

        let first = MockProvider::new("reply one");
        let memory = ConversationMemory::new(FilePatientStore::new(dir.path()));
        let chat = CareChat::new(first, memory);
        chat.respond(TurnRequest::new("patient_jane_doe", "hello there, doctor"))
            .await
            .unwrap();

        let second = MockProvider::new("reply two");
        let captured = std::sync::Arc::new(second);
        // Rebuild the pipeline over the same store to inspect the request.
        struct Capturing(std::sync::Arc<MockProvider>);
        #[async_trait]
        impl ChatProvider for Capturing {
            async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
                self.0.complete(request).await
            }
            fn name(&self) -> &str {
                self.0.name()
            }
        }
        let memory = ConversationMemory::new(FilePatientStore::new(dir.path()));
        let chat = CareChat::new(Capturing(captured.clone()), memory);
        chat.respond(TurnRequest::new("patient_jane_doe", "it's me again"))
            .await
            .unwrap();

        let request = captured.last_request.lock().await.clone().unwrap();
        let system = request.system.unwrap();
        assert!(system.contains("1 previous conversations"));
        assert_eq!(request.messages.last().unwrap().content, "it's me again");
        assert_eq!(request.messages.len(), 3);
    }

    #[tokio::test]
    async fn provider_failure_fails_the_turn_and_leaves_memory_alone() {
        let (_dir, chat) = chat_with(FailingProvider);

        let err = chat
            .respond(TurnRequest::new("patient_jane_doe", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::Provider(ProviderError::Api { status: 503, .. })
        ));

        let history = chat.memory().load_history("patient_jane_doe").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let (_dir, chat) = chat_with(StuckProvider);
        let chat = chat.with_config(ChatConfig {
            provider_timeout: Duration::from_millis(50),
            ..ChatConfig::default()
        });

        let err = chat
            .respond(TurnRequest::new("patient_jane_doe", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Timeout));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_provider_call() {
        let (_dir, chat) = chat_with(StuckProvider);
        let cancel = CancellationToken::new();

        let aborter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            aborter.cancel();
        });

        let err = chat
            .respond_with_cancel(TurnRequest::new("patient_jane_doe", "hello"), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Cancelled));
    }

    #[tokio::test]
    async fn history_window_limits_what_the_provider_sees() {
        let dir = tempfile::tempdir().unwrap();
        let memory = ConversationMemory::new(FilePatientStore::new(dir.path()));
        let long_history: Vec<MemoryEntry> = (0..30)
            .map(|i| MemoryEntry::user(format!("earlier message {i}")))
            .collect();
        memory
            .save_history("patient_jane_doe", long_history)
            .await
            .unwrap();

        let provider = std::sync::Arc::new(MockProvider::new("noted"));
        struct Capturing(std::sync::Arc<MockProvider>);
        #[async_trait]
        impl ChatProvider for Capturing {
            async fn complete(&self, request: ChatRequest) -> Result<String, ProviderError> {
                self.0.complete(request).await
            }
            fn name(&self) -> &str {
                self.0.name()
            }
        }

        let chat = CareChat::new(Capturing(provider.clone()), memory);
        chat.respond(TurnRequest::new("patient_jane_doe", "newest message"))
            .await
            .unwrap();

        let request = provider.last_request.lock().await.clone().unwrap();
        assert_eq!(request.messages.len(), 20);
        assert_eq!(request.messages.last().unwrap().content, "newest message");
    }
}
