//! Budgeted completion requests.
//!
//! [`CompletionEngine`] turns a [`Conversation`] into exactly one backend
//! call whose `max_tokens` is whatever the context window has left, refusing
//! up front when nothing is left. The answer is appended to the conversation
//! and its usage charged to the shared [`UsageLedger`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::usage::UsageLedger;
use crate::Message;
use crate::context::TokenBudget;
use crate::conversation::{Conversation, Role};
use crate::error::{Error, Result};

/// Body of one chat-completion call.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    /// Opaque requester identity; omitted when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
}

/// Token usage reported by the backend.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionUsage {
    pub total_tokens: u64,
}

/// The first choice of a completion, already extracted from the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: CompletionUsage,
}

pub type CompletionFuture<'a> = BoxFuture<'a, Result<CompletionResponse>>;

/// Anything that can answer a chat-completion request.
pub trait CompletionBackend: Send + Sync {
    fn create_completion(&self, request: CompletionRequest) -> CompletionFuture<'_>;
}

/// Issues budgeted completion requests and records their usage.
#[derive(Clone)]
pub struct CompletionEngine {
    backend: Arc<dyn CompletionBackend>,
    ledger: Arc<UsageLedger>,
    budget: TokenBudget,
}

impl CompletionEngine {
    pub fn new(backend: Arc<dyn CompletionBackend>, ledger: Arc<UsageLedger>) -> Self {
        Self {
            backend,
            ledger,
            budget: TokenBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Request the next assistant turn with the configured hard cap.
    pub async fn request_completion(&self, conversation: &mut Conversation) -> Result<String> {
        self.request_completion_capped(conversation, self.budget.hard_cap())
            .await
    }

    /// Request the next assistant turn, answering with at most `hard_cap`
    /// tokens.
    ///
    /// Fails with [`Error::BudgetExhausted`] without calling the backend when
    /// the prompt leaves no room for an answer. Backend errors are returned
    /// unchanged and leave the conversation and ledger untouched.
    pub async fn request_completion_capped(
        &self,
        conversation: &mut Conversation,
        hard_cap: usize,
    ) -> Result<String> {
        let prompt_tokens = conversation.total_tokens();
        let budget = self.budget.with_hard_cap(hard_cap);
        let max_tokens = budget.available(prompt_tokens);
        debug!("{}", budget.to_log_string(prompt_tokens));
        if max_tokens == 0 {
            return Err(Error::BudgetExhausted);
        }

        let request = CompletionRequest {
            model: conversation.model().to_string(),
            messages: conversation.messages(),
            max_tokens,
            user: conversation.user().unwrap_or_default().to_string(),
        };
        let response = self.backend.create_completion(request).await?;

        let answer = response.text.trim().to_string();
        let total = self.ledger.record(response.usage.total_tokens);
        conversation.push(Role::Assistant, answer.clone())?;
        info!(
            "Completion used {} tokens ({} prompt); ledger total {}",
            response.usage.total_tokens, prompt_tokens, total
        );
        Ok(answer)
    }

    /// Append `text` as a user turn, then request the answer.
    pub async fn ask(&self, conversation: &mut Conversation, text: impl Into<String>) -> Result<String> {
        conversation.push(Role::User, text)?;
        self.request_completion(conversation).await
    }
}

/// Backend fakes shared by unit tests.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse> + Send + Sync>;

    /// Answers every request through a closure and records what it saw.
    pub(crate) struct ScriptedBackend {
        script: Script,
        calls: AtomicUsize,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(
            script: impl Fn(&CompletionRequest) -> Result<CompletionResponse> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                script: Box::new(script),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }

        /// Always answer `text`, charging `tokens`.
        pub(crate) fn replying(text: &str, tokens: u64) -> Arc<Self> {
            let text = text.to_string();
            Self::new(move |_| {
                Ok(CompletionResponse {
                    text: text.clone(),
                    usage: CompletionUsage {
                        total_tokens: tokens,
                    },
                })
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CompletionBackend for ScriptedBackend {
        fn create_completion(&self, request: CompletionRequest) -> CompletionFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                let result = (self.script)(&request);
                self.requests.lock().unwrap().push(request);
                result
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedBackend;
    use super::*;
    use crate::context::TokenCounter;

    const MODEL: &str = "gpt-3.5-turbo";

    fn conversation() -> Conversation {
        Conversation::new(MODEL, TokenCounter::new()).with_user("abc")
    }

    fn engine(backend: Arc<ScriptedBackend>) -> CompletionEngine {
        CompletionEngine::new(backend, Arc::new(UsageLedger::default()))
    }

    #[tokio::test]
    async fn appends_trimmed_answer_and_charges_ledger() {
        let backend = ScriptedBackend::replying("  Bonjour !\n", 42);
        let engine = engine(backend.clone());
        let mut conv = conversation();
        conv.push(Role::User, "hello").unwrap();
        let before = conv.total_tokens();

        let answer = engine.request_completion(&mut conv).await.unwrap();
        assert_eq!(answer, "Bonjour !");
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().unwrap().role(), Role::Assistant);
        let added = conv.last().unwrap().tokens();
        assert_eq!(conv.total_tokens(), before + added + 5);
        assert_eq!(engine.ledger().total(), 42);
    }

    #[tokio::test]
    async fn request_carries_budget_model_and_user() {
        let backend = ScriptedBackend::replying("ok", 1);
        let engine = engine(backend.clone());
        let mut conv = conversation();
        conv.push(Role::User, "hello").unwrap();
        let total = conv.total_tokens();

        engine.request_completion(&mut conv).await.unwrap();
        let request = &backend.requests()[0];
        assert_eq!(request.model, MODEL);
        assert_eq!(request.user, "abc");
        assert_eq!(request.max_tokens, 4096 - total - 1);
        assert_eq!(request.messages.len(), 1);
    }

    #[tokio::test]
    async fn hard_cap_limits_max_tokens() {
        let backend = ScriptedBackend::replying("ok", 1);
        let engine = engine(backend.clone());
        let mut conv = conversation();
        conv.push(Role::User, "hello").unwrap();
        engine.request_completion_capped(&mut conv, 64).await.unwrap();
        assert_eq!(backend.requests()[0].max_tokens, 64);
    }

    #[tokio::test]
    async fn exhausted_budget_fails_without_calling_backend() {
        let backend = ScriptedBackend::replying("never", 1);
        let engine = engine(backend.clone());
        let mut conv = conversation();
        // Roughly 4100 tokens of prompt.
        conv.push(Role::User, "word ".repeat(4100)).unwrap();
        assert!(conv.total_tokens() >= 4095);

        let err = engine.request_completion(&mut conv).await.unwrap_err();
        assert!(matches!(err, Error::BudgetExhausted));
        assert_eq!(backend.calls(), 0);
        assert_eq!(conv.len(), 1);
        assert_eq!(engine.ledger().total(), 0);
    }

    #[tokio::test]
    async fn backend_errors_pass_through_untouched() {
        let backend =
            ScriptedBackend::new(|_| Err(Error::CompletionApi("rate limited".into())));
        let engine = engine(backend.clone());
        let mut conv = conversation();
        conv.push(Role::User, "hello").unwrap();

        let err = engine.request_completion(&mut conv).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        assert_eq!(conv.len(), 1);
        assert_eq!(engine.ledger().total(), 0);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn ask_appends_user_turn_first() {
        let backend = ScriptedBackend::replying("4", 7);
        let engine = engine(backend.clone());
        let mut conv = conversation();
        let answer = engine.ask(&mut conv, "2+2?").await.unwrap();
        assert_eq!(answer, "4");
        let roles: Vec<Role> = conv.turns().iter().map(|t| t.role()).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[test]
    fn request_omits_empty_user() {
        let request = CompletionRequest {
            model: MODEL.into(),
            messages: vec![Message::new(Role::User, "hi".into())],
            max_tokens: 10,
            user: String::new(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("user").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
