//! In-process [`ChatPlatform`] backed by a message map.
//!
//! Used by the `replay` CLI to run recorded threads through the bot, and by
//! tests to observe exactly which fetches, replies, and deletions happen.
//! Replies the bot sends are stored like any other message, so follow-up
//! replies chain onto them the same way they would on a real platform.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    Attachment, Author, BotIdentity, ChannelId, ChatMessage, ChatPlatform, InteractionId,
    MessageId, MessageKind, PlatformFuture, Reply,
};
use crate::error::Error;

/// A reply recorded by [`MemoryPlatform::send_reply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    pub id: MessageId,
    pub in_reply_to: MessageId,
    pub reply: Reply,
}

#[derive(Default)]
struct State {
    messages: HashMap<MessageId, ChatMessage>,
    attachments: HashMap<String, Vec<u8>>,
    sent: Vec<SentReply>,
    deleted: Vec<MessageId>,
    presence: Option<String>,
    next_id: u64,
}

/// In-memory chat platform.
pub struct MemoryPlatform {
    identity: BotIdentity,
    state: Mutex<State>,
    fetches: AtomicUsize,
    attachment_reads: AtomicUsize,
}

impl MemoryPlatform {
    pub fn new(identity: BotIdentity) -> Self {
        Self {
            identity,
            state: Mutex::new(State::default()),
            fetches: AtomicUsize::new(0),
            attachment_reads: AtomicUsize::new(0),
        }
    }

    /// Store a message so it can be fetched.
    pub fn insert(&self, message: ChatMessage) {
        self.lock().messages.insert(message.id, message);
    }

    /// Store the bytes served for an attachment URL.
    pub fn insert_attachment(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.lock().attachments.insert(url.into(), bytes.into());
    }

    pub fn message(&self, id: MessageId) -> Option<ChatMessage> {
        self.lock().messages.get(&id).cloned()
    }

    /// Every reply sent so far, in order.
    pub fn sent(&self) -> Vec<SentReply> {
        self.lock().sent.clone()
    }

    /// Every message id deleted so far, in order.
    pub fn deleted(&self) -> Vec<MessageId> {
        self.lock().deleted.clone()
    }

    pub fn presence(&self) -> Option<String> {
        self.lock().presence.clone()
    }

    /// Number of `fetch_message` calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of `read_attachment` calls served.
    pub fn attachment_reads(&self) -> usize {
        self.attachment_reads.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_reply(&self, to: &ChatMessage, reply: Reply) -> MessageId {
        let mut state = self.lock();
        let highest = state.messages.keys().map(|k| k.0).max().unwrap_or(0);
        let id = MessageId(state.next_id.max(highest + 1));
        state.next_id = id.0 + 1;

        let (content, attachments) = match &reply {
            Reply::Text { content } => (content.clone(), Vec::new()),
            Reply::File { filename, content } => {
                let url = format!("memory://{id}/{filename}");
                state.attachments.insert(url.clone(), content.clone());
                (
                    String::new(),
                    vec![Attachment {
                        filename: filename.clone(),
                        size: content.len() as u64,
                        url,
                    }],
                )
            }
        };

        // Slash-command responses link back through the interaction, not a
        // reply reference.
        let (reference, interaction) = if to.kind == MessageKind::SlashCommand {
            (None, Some(InteractionId(to.id.0)))
        } else {
            (Some(to.id), None)
        };

        let message = ChatMessage {
            id,
            channel_id: to.channel_id,
            author: Author {
                id: self.identity.id,
                name: self.identity.display_name.clone(),
                bot: true,
            },
            clean_content: content.clone(),
            content,
            attachments,
            reference,
            interaction,
            kind: if reference.is_some() {
                MessageKind::Reply
            } else {
                MessageKind::Default
            },
            mentions: Vec::new(),
        };
        state.messages.insert(id, message);
        state.sent.push(SentReply {
            id,
            in_reply_to: to.id,
            reply,
        });
        id
    }
}

impl ChatPlatform for MemoryPlatform {
    fn current_user(&self) -> BotIdentity {
        self.identity.clone()
    }

    fn fetch_message(&self, _channel: ChannelId, id: MessageId) -> PlatformFuture<'_, ChatMessage> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            self.message(id)
                .ok_or_else(|| Error::Platform(format!("Unknown Message {id}")))
        })
    }

    fn read_attachment<'a>(&'a self, attachment: &'a Attachment) -> PlatformFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.attachment_reads.fetch_add(1, Ordering::Relaxed);
            self.lock()
                .attachments
                .get(&attachment.url)
                .cloned()
                .ok_or_else(|| Error::Platform(format!("attachment not found: {}", attachment.url)))
        })
    }

    fn send_reply<'a>(&'a self, to: &'a ChatMessage, reply: Reply) -> PlatformFuture<'a, MessageId> {
        Box::pin(async move { Ok(self.record_reply(to, reply)) })
    }

    fn delete_messages<'a>(
        &'a self,
        _channel: ChannelId,
        ids: &'a [MessageId],
    ) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            for id in ids {
                state.messages.remove(id);
                state.deleted.push(*id);
            }
            Ok(())
        })
    }

    fn set_presence<'a>(&'a self, text: &'a str) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            self.lock().presence = Some(text.to_string());
            Ok(())
        })
    }
}
