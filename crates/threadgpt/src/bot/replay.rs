//! Replaying recorded threads through a [`Bot`].
//!
//! A thread file holds the bot's identity, the history already in the
//! channel, attachment bodies keyed by URL, and the events to feed the bot:
//!
//! ```json
//! {
//!   "bot": {"id": 1, "display_name": "GPT"},
//!   "messages": [
//!     {"id": 10, "channel_id": 5, "author": {"id": 2, "name": "ann"},
//!      "content": "hello", "clean_content": "hello"}
//!   ],
//!   "events": [
//!     {"type": "message", "message": {"id": 11, "channel_id": 5,
//!      "author": {"id": 2, "name": "ann"}, "content": "<@1> hi",
//!      "clean_content": "@GPT hi", "reference": 10, "kind": "reply"}}
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::{Bot, Outcome};
use crate::error::{Error, Result};
use crate::platform::{BotIdentity, ChannelId, ChatMessage, MemoryPlatform, MessageId, SentReply};

/// One platform event.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new message; answered if it is a passive trigger.
    Message { message: ChatMessage },
    /// An explicit command invocation.
    Command {
        message: ChatMessage,
        #[serde(default)]
        question: Option<String>,
    },
    /// A message was edited.
    Edit { message: ChatMessage },
    /// A message was deleted.
    Delete { channel_id: ChannelId, id: MessageId },
}

/// A recorded thread.
#[derive(Deserialize, Debug, Clone)]
pub struct Thread {
    pub bot: BotIdentity,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Attachment bodies by URL.
    #[serde(default)]
    pub attachments: HashMap<String, String>,
    pub events: Vec<Event>,
}

impl Thread {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid thread file: {e}")))
    }

    /// An in-memory platform holding the recorded history.
    pub fn platform(&self) -> MemoryPlatform {
        let platform = MemoryPlatform::new(self.bot.clone());
        for message in &self.messages {
            platform.insert(message.clone());
        }
        for (url, body) in &self.attachments {
            platform.insert_attachment(url.clone(), body.clone().into_bytes());
        }
        platform
    }
}

/// What one event produced.
#[derive(Debug, Clone)]
pub struct ReplayStep {
    pub event: usize,
    pub outcome: Option<Outcome>,
    /// Replies sent while handling the event.
    pub sent: Vec<SentReply>,
    /// Messages deleted while handling the event.
    pub deleted: Vec<MessageId>,
}

/// Feed `events` to `bot` in order. `platform` must be the platform the bot
/// was built on.
pub async fn replay(bot: &Bot, platform: &MemoryPlatform, events: &[Event]) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        let sent_before = platform.sent().len();
        let deleted_before = platform.deleted().len();

        let outcome = match event {
            Event::Message { message } => {
                platform.insert(message.clone());
                bot.handle_message(message).await?
            }
            Event::Command { message, question } => {
                platform.insert(message.clone());
                Some(bot.handle_command(message, question.as_deref()).await?)
            }
            Event::Edit { message } => {
                platform.insert(message.clone());
                bot.handle_edit(message).await?
            }
            Event::Delete { channel_id, id } => {
                bot.handle_delete(*channel_id, *id).await;
                None
            }
        };

        let step = ReplayStep {
            event: index,
            outcome,
            sent: platform.sent().split_off(sent_before),
            deleted: platform.deleted().split_off(deleted_before),
        };
        info!(
            "Event {index}: {} reply(s), {} deletion(s)",
            step.sent.len(),
            step.deleted.len()
        );
        steps.push(step);
    }
    Ok(steps)
}
