//! Event handlers that drive the conversation pipeline.
//!
//! A [`Bot`] owns one instance of every pipeline stage and is shared by all
//! platform events. Each invocation runs independently:
//!
//! 1. resolve the reply chain of the invoking message,
//! 2. build the conversation (stop if it ends with a `[system]` directive),
//! 3. compress it if the prompt is too large,
//! 4. request the completion and reply.
//!
//! Any failure in the pipeline is reported back to the user exactly once as
//! a warning reply. Only failures to deliver that reply are returned to the
//! caller.

pub mod config;
pub mod replay;
pub mod reply;

pub use config::BotConfig;
pub use reply::{ReplyLedger, render_reply};

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::api::{CompletionBackend, CompletionEngine, UsageLedger, generate_trace_id, pricing_for_model};
use crate::context::{ContextCompressor, TokenCounter};
use crate::conversation::{Conversation, ConversationBuilder};
use crate::error::{Error, Result};
use crate::platform::chain::NODE_CACHE_CAPACITY;
use crate::platform::{
    AttachmentResolver, ChainResolver, ChannelId, ChatMessage, ChatPlatform, MessageId, MessageKind,
};

/// Question used when an explicit invocation carries none.
pub const DEFAULT_QUESTION: &str = "Hello, world!";

/// Reply sent when the conversation ends with a system directive.
pub const SYSTEM_SET_REPLY: &str = "[SYSTEM] System message is set.";

/// How an invocation ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The model answered; `reply` is the message carrying the answer.
    Answered { reply: MessageId, answer: String },
    /// The chain ended with a `[system]` directive; nothing was asked.
    SystemMessageSet { reply: MessageId },
    /// The pipeline failed and the error was reported in `reply`.
    Failed { reply: MessageId, error: Error },
}

impl Outcome {
    pub fn reply(&self) -> MessageId {
        match self {
            Outcome::Answered { reply, .. }
            | Outcome::SystemMessageSet { reply }
            | Outcome::Failed { reply, .. } => *reply,
        }
    }
}

enum Answer {
    Completed(String),
    SystemMessageSet,
}

/// The chat bot: one per process, shared by every event.
pub struct Bot {
    config: BotConfig,
    platform: Arc<dyn ChatPlatform>,
    chains: ChainResolver,
    builder: ConversationBuilder,
    compressor: ContextCompressor,
    engine: CompletionEngine,
    replies: ReplyLedger,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        platform: Arc<dyn ChatPlatform>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        let counter = TokenCounter::new();
        let ttl = config.cache_ttl();
        let attachments =
            AttachmentResolver::with_ttl(platform.clone(), config.attachment_policy(), ttl);
        let builder = ConversationBuilder::new(&config.model, counter, attachments)
            .with_limits(config.builder_limits());
        let chains = ChainResolver::with_cache(platform.clone(), NODE_CACHE_CAPACITY, ttl);
        let compressor = ContextCompressor::with_limits(
            config.compress_threshold_tokens,
            config.max_prompt_tokens,
        )
        .with_summary_ttl(ttl);
        let ledger = Arc::new(UsageLedger::with_initial(
            pricing_for_model(&config.model),
            config.initial_token_count,
        ));
        let engine = CompletionEngine::new(backend, ledger).with_budget(config.token_budget());

        Self {
            config,
            platform,
            chains,
            builder,
            compressor,
            engine,
            replies: ReplyLedger::new(),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn usage(&self) -> &UsageLedger {
        self.engine.ledger()
    }

    pub fn replies(&self) -> &ReplyLedger {
        &self.replies
    }

    /// Explicit invocation: a prefix command or a slash command.
    ///
    /// Returns an error only when the reply itself could not be sent.
    pub async fn handle_command(&self, message: &ChatMessage, question: Option<&str>) -> Result<Outcome> {
        let span = info_span!("invocation", trace_id = %generate_trace_id(), message = %message.id);
        self.invoke(message, question).instrument(span).await
    }

    /// Passive trigger: answer messages that start with the bot's mention,
    /// or replies that mention it. Returns `None` when the message is not
    /// for the bot.
    pub async fn handle_message(&self, message: &ChatMessage) -> Result<Option<Outcome>> {
        if message.author.bot || !self.config.allow_passive_mention {
            return Ok(None);
        }
        let Some(question) = self.passive_question(message) else {
            return Ok(None);
        };
        self.handle_command(message, Some(&question)).await.map(Some)
    }

    /// A message was edited: retract the old answers and re-answer it.
    pub async fn handle_edit(&self, message: &ChatMessage) -> Result<Option<Outcome>> {
        self.retract(message.channel_id, message.id).await;
        self.handle_message(message).await
    }

    /// A message was deleted: retract its answers.
    pub async fn handle_delete(&self, channel: ChannelId, message: MessageId) {
        self.retract(channel, message).await;
    }

    fn passive_question(&self, message: &ChatMessage) -> Option<String> {
        let identity = self.platform.current_user();
        for token in identity.raw_mentions() {
            if let Some(rest) = message.content.strip_prefix(token.as_str()) {
                return Some(rest.trim().to_string());
            }
        }
        if message.kind == MessageKind::Reply && message.mentions.contains(&identity.id) {
            return Some(message.content.clone());
        }
        None
    }

    async fn invoke(&self, message: &ChatMessage, question: Option<&str>) -> Result<Outcome> {
        let question = match question.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => q.to_string(),
            None if message.reference.is_none() => DEFAULT_QUESTION.to_string(),
            None => String::new(),
        };
        if message.kind == MessageKind::SlashCommand {
            self.chains.interactions().register(message, &question);
        }

        let answer = self.answer(message, &question).await;
        let outcome = self.respond(message, answer).await;
        self.update_presence().await;
        outcome
    }

    async fn respond(&self, message: &ChatMessage, answer: Result<Answer>) -> Result<Outcome> {
        match answer {
            Ok(Answer::Completed(answer)) => {
                let reply = self.reply(message, &answer).await?;
                Ok(Outcome::Answered { reply, answer })
            }
            Ok(Answer::SystemMessageSet) => {
                let reply = self.reply(message, SYSTEM_SET_REPLY).await?;
                Ok(Outcome::SystemMessageSet { reply })
            }
            Err(error) => {
                error!("{}: {error}", error.kind());
                let text = format!(":warning: **{}**: {}", error.kind(), error);
                let reply = self.reply(message, &text).await?;
                Ok(Outcome::Failed { reply, error })
            }
        }
    }

    async fn answer(&self, message: &ChatMessage, question: &str) -> Result<Answer> {
        let identity = self.platform.current_user();
        let chain = self.chains.resolve(message, self.config.max_chain_depth).await?;
        let mut conversation = self
            .builder
            .build(&chain, question, &identity, message.author.id)
            .await?;

        if conversation.ends_with_directive() {
            info!("Conversation ends with a system directive, not asking the model");
            return Ok(Answer::SystemMessageSet);
        }

        let title = format!(
            "{} @ {}",
            message.author.name,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        info!("{title}: Requesting {} tokens", conversation.total_tokens());
        let report = self.compressor.compress(&mut conversation, &self.engine).await?;
        if report.discarded() > 0 {
            info!(
                "{title}: Requesting {} tokens; discarded {} tokens",
                report.after,
                report.discarded()
            );
        }

        let answer = self.engine.request_completion(&mut conversation).await?;
        log_transcript(&conversation);
        Ok(Answer::Completed(answer))
    }

    async fn reply(&self, to: &ChatMessage, text: &str) -> Result<MessageId> {
        let id = self.platform.send_reply(to, render_reply(text)).await?;
        self.replies.record(to.id, id);
        Ok(id)
    }

    /// Delete the replies to `source` and drop `source` and those replies
    /// from the chain cache, so later walks see the edit or the deletion.
    async fn retract(&self, channel: ChannelId, source: MessageId) {
        self.chains.forget(source).await;
        let ids = self.replies.take(source);
        if ids.is_empty() {
            return;
        }
        for id in &ids {
            self.chains.forget(*id).await;
        }
        debug!("Retracting {} reply(s) to message {source}", ids.len());
        if let Err(e) = self.platform.delete_messages(channel, &ids).await {
            warn!("Failed to retract replies to message {source}: {e}");
        }
    }

    async fn update_presence(&self) {
        let line = self.usage().presence_line();
        if let Err(e) = self.platform.set_presence(&line).await {
            warn!("Failed to update presence: {e}");
        }
    }
}

fn log_transcript(conversation: &Conversation) {
    for turn in conversation.turns() {
        debug!("{}: {}", turn.role(), turn.content());
    }
}
