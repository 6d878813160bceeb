use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::backends::{BackendRegistry, GenerationBackend};
use crate::config::ChatConfig;
use crate::{BackendError, BackendHandle, ConversationTurn, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitingResponse { in_flight: usize },
}

impl SessionPhase {
    fn from_in_flight(in_flight: usize) -> Self {
        match in_flight {
            0 => Self::Idle,
            in_flight => Self::AwaitingResponse { in_flight },
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SessionState {
    turns: Vec<ConversationTurn>,
    backend: Arc<dyn GenerationBackend>,
}

pub struct ConversationSession {
    system_prompt: String,
    history_window: usize,
    registry: BackendRegistry,
    state: RwLock<SessionState>,
    in_flight: AtomicUsize,
}

impl ConversationSession {
    pub fn new(
        config: &ChatConfig,
        registry: BackendRegistry,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            history_window: config.history_window,
            registry,
            state: RwLock::new(SessionState {
                turns: Vec::new(),
                backend,
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn connect(
        config: &ChatConfig,
        registry: BackendRegistry,
        provider_name: &str,
        model: &str,
        credential: &str,
    ) -> Result<Self, BackendError> {
        let backend = registry.create(provider_name, credential, model)?;
        Ok(Self::new(config, registry, backend))
    }

    pub async fn query(&self, question: &str) -> Result<String, BackendError> {
        self.query_with_cancel(question, std::future::pending()).await
    }

    /// Like [`query`](Self::query), but gives up with
    /// [`BackendError::Cancelled`] as soon as `cancel` resolves. A cancelled or
    /// failed call leaves its user turn in the log and appends nothing else.
    pub async fn query_with_cancel<F>(&self, question: &str, cancel: F) -> Result<String, BackendError>
    where
        F: Future<Output = ()> + Send,
    {
        let _pending = {
            let mut state = self.state.write().await;
            state.turns.push(ConversationTurn::user(question));
            InFlight::enter(&self.in_flight)
        };

        let (backend, window) = {
            let state = self.state.read().await;
            (Arc::clone(&state.backend), self.outbound_window(&state.turns))
        };
        let backend_id = backend.id();
        debug!(backend = %backend_id, turns = window.len(), "dispatching query");

        let outcome = tokio::select! {
            result = backend.generate(&window) => result,
            _ = cancel => Err(BackendError::Cancelled),
        };

        match outcome {
            Ok(answer) => {
                self.state
                    .write()
                    .await
                    .turns
                    .push(ConversationTurn::assistant(answer.clone(), backend_id));
                Ok(answer)
            }
            Err(error) => {
                warn!(backend = %backend_id, %error, "query failed");
                Err(error)
            }
        }
    }

    /// Replaces the active backend. Calls already in flight keep the backend
    /// they started with. On error the previous backend stays active.
    pub async fn switch_backend(
        &self,
        provider_name: &str,
        model: &str,
        credential: &str,
    ) -> Result<BackendHandle, BackendError> {
        let mut state = self.state.write().await;
        let backend = self.registry.create(provider_name, credential, model)?;
        let handle = backend.handle().clone();
        info!(from = %state.backend.id(), to = %backend.id(), "backend switched");
        state.backend = backend;
        Ok(handle)
    }

    pub async fn history(&self, window: Option<usize>) -> Vec<ConversationTurn> {
        let state = self.state.read().await;
        let start = window
            .map(|window| state.turns.len().saturating_sub(window))
            .unwrap_or(0);
        state.turns[start..].to_vec()
    }

    pub async fn active_handle(&self) -> BackendHandle {
        self.state.read().await.backend.handle().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_in_flight(self.in_flight.load(Ordering::SeqCst))
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.turns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn outbound_window(&self, turns: &[ConversationTurn]) -> Vec<Message> {
        let start = turns.len().saturating_sub(self.history_window);
        let system = (!self.system_prompt.is_empty())
            .then(|| Message::new(Role::System, self.system_prompt.clone()));
        system
            .into_iter()
            .chain(turns[start..].iter().map(ConversationTurn::as_message))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Provider;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};

    struct EchoBackend {
        handle: BackendHandle,
        calls: Mutex<Vec<Vec<Message>>>,
    }

    impl EchoBackend {
        fn new(model: &str) -> Arc<Self> {
            Arc::new(Self {
                handle: BackendHandle::new(Provider::Groq, model, "key"),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn last_call(&self) -> Vec<Message> {
            self.calls.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        fn handle(&self) -> &BackendHandle {
            &self.handle
        }

        async fn generate(&self, turns: &[Message]) -> Result<String, BackendError> {
            self.calls.lock().unwrap().push(turns.to_vec());
            let last = turns.last().map(|turn| turn.content.clone()).unwrap_or_default();
            Ok(format!("echo: {last}"))
        }
    }

    struct GatedBackend {
        handle: BackendHandle,
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl GenerationBackend for GatedBackend {
        fn handle(&self) -> &BackendHandle {
            &self.handle
        }

        async fn generate(&self, _turns: &[Message]) -> Result<String, BackendError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("slow answer".to_string())
        }
    }

    struct FailingBackend {
        handle: BackendHandle,
    }

    #[async_trait]
    impl GenerationBackend for FailingBackend {
        fn handle(&self) -> &BackendHandle {
            &self.handle
        }

        async fn generate(&self, _turns: &[Message]) -> Result<String, BackendError> {
            Err(BackendError::Status {
                provider: "groq".to_string(),
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    fn config(window: usize) -> ChatConfig {
        ChatConfig {
            system_prompt: "system prompt".to_string(),
            history_window: window,
            ..ChatConfig::default()
        }
    }

    #[tokio::test]
    async fn query_appends_user_and_assistant_turns() {
        let backend = EchoBackend::new("echo");
        let session = ConversationSession::new(&config(20), BackendRegistry::new(), backend.clone());

        let answer = session.query("hello").await.unwrap();
        assert_eq!(answer, "echo: hello");

        let history = session.history(None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert!(history[0].backend_id.is_empty());
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].backend_id, "groq/echo");
        assert_eq!(session.phase(), SessionPhase::Idle);

        let sent = backend.last_call();
        assert_eq!(sent[0], Message::new(Role::System, "system prompt"));
        assert_eq!(sent[1], Message::new(Role::User, "hello"));
    }

    #[tokio::test]
    async fn outbound_window_is_system_plus_last_twenty() {
        let backend = EchoBackend::new("echo");
        let session = ConversationSession::new(&config(20), BackendRegistry::new(), backend.clone());

        // 12 exchanges leave 24 turns; the 13th question makes 25.
        for index in 0..12 {
            session.query(&format!("q{index}")).await.unwrap();
        }
        session.query("q12").await.unwrap();

        let sent = backend.last_call();
        assert_eq!(sent.len(), 21);
        assert_eq!(sent[0].role, Role::System);

        let all = session.history(None).await;
        let expected: Vec<Message> = all[5..25].iter().map(ConversationTurn::as_message).collect();
        assert_eq!(&sent[1..], expected.as_slice());
        assert_eq!(sent[20], Message::new(Role::User, "q12"));

        assert_eq!(session.len().await, 26);
        assert_eq!(session.history(Some(2)).await.len(), 2);
    }

    #[tokio::test]
    async fn switch_during_flight_keeps_original_backend_tag() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let backend = Arc::new(GatedBackend {
            handle: BackendHandle::new(Provider::Anthropic, "slow-model", "key"),
            started: started.clone(),
            release: release.clone(),
        });
        let session = Arc::new(ConversationSession::new(
            &config(20),
            BackendRegistry::new(),
            backend,
        ));

        let in_flight = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.query("long question").await })
        };

        started.notified().await;
        assert_eq!(
            session.phase(),
            SessionPhase::AwaitingResponse { in_flight: 1 }
        );

        let handle = session
            .switch_backend("openai", "gpt-4o-mini", "other-key")
            .await
            .unwrap();
        assert_eq!(handle.provider, Provider::OpenAi);
        assert_eq!(session.history(None).await.len(), 1);

        release.notify_one();
        let answer = in_flight.await.unwrap().unwrap();
        assert_eq!(answer, "slow answer");

        let history = session.history(None).await;
        assert_eq!(history[1].backend_id, "anthropic/slow-model");
        assert_eq!(session.active_handle().await.id(), "openai/gpt-4o-mini");
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn failed_switch_keeps_previous_backend() {
        let session =
            ConversationSession::new(&config(20), BackendRegistry::new(), EchoBackend::new("echo"));

        let error = session.switch_backend("nope", "m", "k").await.unwrap_err();
        assert!(matches!(error, BackendError::UnsupportedProvider(_)));
        assert_eq!(session.active_handle().await.id(), "groq/echo");
    }

    #[tokio::test]
    async fn failed_query_keeps_only_user_turn() {
        let session = ConversationSession::new(
            &config(20),
            BackendRegistry::new(),
            Arc::new(FailingBackend {
                handle: BackendHandle::new(Provider::Groq, "broken", "key"),
            }),
        );

        let error = session.query("will fail").await.unwrap_err();
        assert!(matches!(error, BackendError::Status { status: 500, .. }));

        let history = session.history(None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "will fail");
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn cancellation_surfaces_error_without_assistant_turn() {
        let backend = Arc::new(GatedBackend {
            handle: BackendHandle::new(Provider::Gemini, "never", "key"),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        });
        let session = ConversationSession::new(&config(20), BackendRegistry::new(), backend);

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        cancel_tx.send(()).unwrap();
        let error = session
            .query_with_cancel("stop me", async {
                let _ = cancel_rx.await;
            })
            .await
            .unwrap_err();

        assert!(matches!(error, BackendError::Cancelled));
        assert_eq!(session.len().await, 1);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn abandoned_query_returns_session_to_idle() {
        let started = Arc::new(Notify::new());
        let backend = Arc::new(GatedBackend {
            handle: BackendHandle::new(Provider::Groq, "stalled", "key"),
            started: started.clone(),
            release: Arc::new(Notify::new()),
        });
        let session = ConversationSession::new(&config(20), BackendRegistry::new(), backend);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), session.query("abandoned")).await;
        assert!(timed_out.is_err());

        assert_eq!(session.phase(), SessionPhase::Idle);
        let history = session.history(None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn phase_counts_overlapping_calls() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let session = Arc::new(ConversationSession::new(
            &config(20),
            BackendRegistry::new(),
            Arc::new(GatedBackend {
                handle: BackendHandle::new(Provider::Groq, "gated", "key"),
                started: started.clone(),
                release: release.clone(),
            }),
        ));

        let mut calls = Vec::new();
        for question in ["first", "second"] {
            let session = Arc::clone(&session);
            calls.push(tokio::spawn(async move { session.query(question).await }));
            started.notified().await;
        }
        assert_eq!(
            session.phase(),
            SessionPhase::AwaitingResponse { in_flight: 2 }
        );

        release.notify_waiters();
        for call in calls {
            assert_eq!(call.await.unwrap().unwrap(), "slow answer");
        }
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.len().await, 4);
    }
}
