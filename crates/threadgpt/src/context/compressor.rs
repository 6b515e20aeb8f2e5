//! Lossy compression of oversized prompts.
//!
//! When a conversation's prompt reaches `max_prompt_tokens`, large turns in
//! the middle of the history are replaced by model-written summaries, oldest
//! first, until the prompt fits or the candidates run out. The first and last
//! three turns are never touched, nor are system turns. Compression is best
//! effort: the completion engine still clamps or refuses if the prompt stays
//! too large.

use std::time::Duration;

use tracing::{debug, info};

use super::budget::{COMPRESS_THRESHOLD, MAX_PROMPT_TOKENS};
use crate::api::CompletionEngine;
use crate::conversation::{Conversation, Role};
use crate::error::{Error, Result, unshare};

/// Instruction prefixed to the text being summarized.
pub const SUMMARY_PROMPT: &str = "Summarize the following:";

/// Requester identity sent with summarization calls.
pub const SUMMARY_IDENTITY: &str = "summary by system";

/// Turns at each end of the conversation that are never summarized.
const PROTECTED_TURNS: usize = 3;

const SUMMARY_CACHE_CAPACITY: u64 = 1024;

/// What a compression pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionReport {
    pub before: usize,
    pub after: usize,
    pub summarized: usize,
}

impl CompressionReport {
    pub fn discarded(&self) -> usize {
        self.before.saturating_sub(self.after)
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "compression: {} -> {} tokens ({} discarded, {} turn(s) summarized)",
            self.before,
            self.after,
            self.discarded(),
            self.summarized,
        )
    }
}

/// Summarizes large middle turns until a prompt fits.
pub struct ContextCompressor {
    threshold_tokens: usize,
    max_prompt_tokens: usize,
    summaries: moka::future::Cache<(String, String), String>,
}

impl ContextCompressor {
    pub fn new() -> Self {
        Self::with_limits(COMPRESS_THRESHOLD, MAX_PROMPT_TOKENS)
    }

    pub fn with_limits(threshold_tokens: usize, max_prompt_tokens: usize) -> Self {
        Self {
            threshold_tokens,
            max_prompt_tokens,
            summaries: moka::future::Cache::new(SUMMARY_CACHE_CAPACITY),
        }
    }

    /// Expire memoized summaries after `ttl`.
    pub fn with_summary_ttl(mut self, ttl: Duration) -> Self {
        self.summaries = moka::future::Cache::builder()
            .max_capacity(SUMMARY_CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();
        self
    }

    pub fn threshold_tokens(&self) -> usize {
        self.threshold_tokens
    }

    pub fn max_prompt_tokens(&self) -> usize {
        self.max_prompt_tokens
    }

    /// Compress `conversation` in place.
    ///
    /// A conversation already under `max_prompt_tokens` is left alone, so
    /// running this twice never summarizes twice.
    pub async fn compress(
        &self,
        conversation: &mut Conversation,
        engine: &CompletionEngine,
    ) -> Result<CompressionReport> {
        let before = conversation.total_tokens();
        let mut report = CompressionReport {
            before,
            after: before,
            summarized: 0,
        };
        if before < self.max_prompt_tokens {
            return Ok(report);
        }

        let end = conversation.len().saturating_sub(PROTECTED_TURNS);
        for index in PROTECTED_TURNS..end {
            if conversation.total_tokens() < self.max_prompt_tokens {
                break;
            }
            let Some(turn) = conversation.turns().get(index) else {
                break;
            };
            if turn.role() == Role::System || turn.tokens() <= self.threshold_tokens {
                continue;
            }

            let source = turn.content().to_string();
            let summary = self.summarize(conversation, source, engine).await?;
            conversation.rewrite(index, summary)?;
            report.summarized += 1;
        }

        report.after = conversation.total_tokens();
        info!("{}", report.to_log_string());
        Ok(report)
    }

    /// Summary of `text`, shared between concurrent callers and memoized.
    async fn summarize(
        &self,
        conversation: &Conversation,
        text: String,
        engine: &CompletionEngine,
    ) -> Result<String> {
        let model = conversation.model().to_string();
        let counter = conversation.counter().clone();
        let key = (model.clone(), text.clone());
        self.summaries
            .try_get_with(key, async move {
                let mut isolated = Conversation::new(&model, counter).with_user(SUMMARY_IDENTITY);
                let source_tokens = isolated.count_tokens(&text)?;
                debug!("Summarizing {source_tokens} tokens");
                let summary = engine
                    .ask(&mut isolated, format!("{SUMMARY_PROMPT}{text}"))
                    .await?;
                debug!(
                    "Summarized {} -> {} tokens",
                    source_tokens,
                    isolated.count_tokens(&summary)?
                );
                Ok::<_, Error>(summary)
            })
            .await
            .map_err(unshare)
    }
}

impl Default for ContextCompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::UsageLedger;
    use crate::api::completion::scripted::ScriptedBackend;
    use crate::context::TokenCounter;
    use std::sync::Arc;

    const MODEL: &str = "gpt-3.5-turbo";

    fn engine(backend: Arc<ScriptedBackend>) -> CompletionEngine {
        CompletionEngine::new(backend, Arc::new(UsageLedger::default()))
    }

    /// About 3000 tokens: over the threshold, yet small enough to summarize
    /// within a 4096-token window.
    fn big(tag: &str) -> String {
        format!("{tag} {}", "word ".repeat(3000))
    }

    /// Nine turns whose middle three are large.
    fn oversized() -> Conversation {
        let mut conv = Conversation::new(MODEL, TokenCounter::new());
        for (role, text) in [
            (Role::User, "one".to_string()),
            (Role::Assistant, "two".to_string()),
            (Role::User, "three".to_string()),
            (Role::User, big("alpha")),
            (Role::Assistant, big("beta")),
            (Role::User, big("gamma")),
            (Role::User, "six".to_string()),
            (Role::Assistant, "seven".to_string()),
            (Role::User, "eight".to_string()),
        ] {
            conv.push(role, text).unwrap();
        }
        conv
    }

    #[tokio::test]
    async fn under_budget_is_a_no_op() {
        let backend = ScriptedBackend::replying("summary", 10);
        let mut conv = Conversation::new(MODEL, TokenCounter::new());
        conv.push(Role::User, "small").unwrap();
        let report = ContextCompressor::new()
            .compress(&mut conv, &engine(backend.clone()))
            .await
            .unwrap();
        assert_eq!(report.summarized, 0);
        assert_eq!(report.before, report.after);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn stops_once_under_budget() {
        let backend = ScriptedBackend::replying("short summary", 10);
        let mut conv = oversized();
        let report = ContextCompressor::new()
            .compress(&mut conv, &engine(backend.clone()))
            .await
            .unwrap();

        assert_eq!(report.summarized, 1);
        assert_eq!(conv.turns()[3].content(), "short summary");
        assert!(conv.turns()[4].content().starts_with("beta"));
        assert!(report.after < 8192);
        assert_eq!(report.after, conv.total_tokens());
        assert_eq!(backend.calls(), 1);

        let request = &backend.requests()[0];
        assert_eq!(request.user, SUMMARY_IDENTITY);
        assert_eq!(request.messages.len(), 1);
        assert!(request.messages[0].content.starts_with("Summarize the following:alpha"));
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let backend = ScriptedBackend::replying("short summary", 10);
        let engine = engine(backend.clone());
        let compressor = ContextCompressor::new();
        let mut conv = oversized();
        compressor.compress(&mut conv, &engine).await.unwrap();
        let snapshot: Vec<String> = conv.turns().iter().map(|t| t.content().to_string()).collect();

        let report = compressor.compress(&mut conv, &engine).await.unwrap();
        assert_eq!(report.summarized, 0);
        let again: Vec<String> = conv.turns().iter().map(|t| t.content().to_string()).collect();
        assert_eq!(snapshot, again);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn short_conversations_are_never_compressed() {
        let backend = ScriptedBackend::replying("summary", 10);
        let mut conv = Conversation::new(MODEL, TokenCounter::new());
        for i in 0..6 {
            conv.push(Role::User, big(&format!("t{i}"))).unwrap();
        }
        let before = conv.total_tokens();
        assert!(before >= 8192);

        let report = ContextCompressor::new()
            .compress(&mut conv, &engine(backend.clone()))
            .await
            .unwrap();
        assert_eq!(report.summarized, 0);
        assert_eq!(conv.total_tokens(), before);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn system_turns_are_skipped() {
        let backend = ScriptedBackend::replying("summary", 10);
        let mut conv = oversized();
        conv.insert(3, Role::System, big("rules")).unwrap();

        ContextCompressor::new()
            .compress(&mut conv, &engine(backend.clone()))
            .await
            .unwrap();
        assert!(conv.turns()[3].content().starts_with("rules"));
        assert_eq!(conv.turns()[3].role(), Role::System);
    }

    #[tokio::test]
    async fn identical_text_is_summarized_once() {
        let backend = ScriptedBackend::replying("short summary", 10);
        let engine = engine(backend.clone());
        let compressor = ContextCompressor::new();
        let mut a = oversized();
        let mut b = oversized();

        let (ra, rb) = tokio::join!(
            compressor.compress(&mut a, &engine),
            compressor.compress(&mut b, &engine)
        );
        assert_eq!(ra.unwrap().summarized, 1);
        assert_eq!(rb.unwrap().summarized, 1);
        assert_eq!(backend.calls(), 1);
        assert_eq!(engine.ledger().total(), 10);
    }

    #[tokio::test]
    async fn summary_failures_propagate() {
        let backend = ScriptedBackend::new(|_| Err(Error::CompletionApi("boom".into())));
        let mut conv = oversized();
        let err = ContextCompressor::new()
            .compress(&mut conv, &engine(backend))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CompletionApi(_)));
    }
}
