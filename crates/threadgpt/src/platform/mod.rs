//! Chat-platform boundary: message model, the [`ChatPlatform`] adapter trait,
//! and the two resolvers that read from it.
//!
//! The gateway connection itself is outside this crate. Whatever drives the
//! bot (a Discord gateway, the replay CLI, tests) implements [`ChatPlatform`]
//! and hands incoming messages to the [`Bot`](crate::bot::Bot).
//!
//! - [`chain`] walks reply / interaction links backward into an ordered
//!   message chain.
//! - [`attachments`] fetches and validates small text attachments.
//! - [`memory`] is an in-process platform used by the replay CLI and tests.

pub mod attachments;
pub mod chain;
pub mod memory;

pub use attachments::{AttachmentPolicy, AttachmentResolver};
pub use chain::{ChainResolver, InteractionTable, MAX_CHAIN_DEPTH};
pub use memory::{MemoryPlatform, SentReply};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake!(
    /// Platform-wide unique message id.
    MessageId
);
snowflake!(ChannelId);
snowflake!(UserId);
snowflake!(
    /// Id of a slash-command interaction. Replies the bot sends to a slash
    /// command carry it instead of an explicit reply reference.
    InteractionId
);

/// How a message entered the channel.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Default,
    /// A reply to another message (carries a `reference`).
    Reply,
    /// A slash-command invocation.
    SlashCommand,
}

/// File attached to a message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    /// Size in bytes as reported by the platform.
    pub size: u64,
    pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub bot: bool,
}

/// A platform message as seen by the bot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author: Author,
    /// Raw content, mentions in `<@id>` form.
    pub content: String,
    /// Rendered content, mentions in `@display name` form.
    pub clean_content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Explicit reply reference.
    #[serde(default)]
    pub reference: Option<MessageId>,
    /// Interaction this message answers (bot replies to slash commands).
    #[serde(default)]
    pub interaction: Option<InteractionId>,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

/// The bot's own identity on the platform.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: UserId,
    pub display_name: String,
}

impl BotIdentity {
    /// Mention as it appears in rendered text: `@display name`.
    pub fn clean_mention(&self) -> String {
        format!("@{}", self.display_name)
    }

    /// Mention tokens as they appear in raw content.
    pub fn raw_mentions(&self) -> [String; 2] {
        [format!("<@{}>", self.id), format!("<@!{}>", self.id)]
    }
}

/// Outgoing reply payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Text { content: String },
    File { filename: String, content: Vec<u8> },
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Reply::Text {
            content: content.into(),
        }
    }
}

/// Boxed future returned by [`ChatPlatform`] methods.
pub type PlatformFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Adapter over a chat platform's REST surface.
pub trait ChatPlatform: Send + Sync {
    /// The bot account the platform is logged in as.
    fn current_user(&self) -> BotIdentity;

    fn fetch_message(&self, channel: ChannelId, id: MessageId) -> PlatformFuture<'_, ChatMessage>;

    /// Download an attachment's bytes.
    fn read_attachment<'a>(&'a self, attachment: &'a Attachment) -> PlatformFuture<'a, Vec<u8>>;

    /// Reply to `to`, returning the id of the message that was sent.
    fn send_reply<'a>(&'a self, to: &'a ChatMessage, reply: Reply) -> PlatformFuture<'a, MessageId>;

    fn delete_messages<'a>(
        &'a self,
        channel: ChannelId,
        ids: &'a [MessageId],
    ) -> PlatformFuture<'a, ()>;

    /// Update the bot's status line.
    fn set_presence<'a>(&'a self, text: &'a str) -> PlatformFuture<'a, ()>;
}
