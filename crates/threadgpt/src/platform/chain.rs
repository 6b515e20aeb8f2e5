//! Reply-chain reconstruction.
//!
//! A conversation on a chat platform is a backward-linked list: each message
//! may point at the message it replies to, and a bot response to a slash
//! command points at the interaction that produced it. [`ChainResolver`]
//! walks those links from the invoking message toward the root with a hard
//! depth bound, so cyclic or pathological reference graphs cannot run away.
//!
//! Popular threads are re-walked on every new reply, so fetched parents are
//! memoized by id with a TTL. Concurrent walks that need the same parent
//! share one in-flight fetch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{ChatMessage, ChatPlatform, InteractionId};
use crate::error::{Result, unshare};

/// Maximum number of messages collected into one chain.
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Default capacity of the fetched-parent cache.
pub const NODE_CACHE_CAPACITY: u64 = 256;

/// Default lifetime of a fetched parent.
pub const NODE_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

const INTERACTION_CAPACITY: u64 = 1024;
const INTERACTION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Slash-command invocations the bot answered, keyed by interaction id.
///
/// A reply to the bot's slash-command response carries only the interaction
/// id, so this table is what lets the chain continue past it. Entries are
/// bounded by count and age; a forgotten interaction simply makes the bot's
/// response the chain root.
#[derive(Clone)]
pub struct InteractionTable {
    entries: moka::sync::Cache<InteractionId, ChatMessage>,
}

impl InteractionTable {
    pub fn new() -> Self {
        Self::with_limits(INTERACTION_CAPACITY, INTERACTION_TTL)
    }

    pub fn with_limits(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: moka::sync::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Remember a slash-command invocation. The stored copy carries the
    /// command's question as its content, since the invocation itself has
    /// no message text.
    pub fn register(&self, origin: &ChatMessage, question: &str) -> InteractionId {
        let id = InteractionId(origin.id.0);
        let mut stored = origin.clone();
        stored.content = question.to_string();
        stored.clean_content = question.to_string();
        self.entries.insert(id, stored);
        id
    }

    pub fn get(&self, id: InteractionId) -> Option<ChatMessage> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InteractionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks reply and interaction links into an ordered message chain.
pub struct ChainResolver {
    platform: Arc<dyn ChatPlatform>,
    nodes: moka::future::Cache<super::MessageId, ChatMessage>,
    interactions: InteractionTable,
}

impl ChainResolver {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self::with_cache(platform, NODE_CACHE_CAPACITY, NODE_CACHE_TTL)
    }

    /// Create a resolver with a custom parent-cache capacity and TTL.
    pub fn with_cache(platform: Arc<dyn ChatPlatform>, capacity: u64, ttl: Duration) -> Self {
        Self {
            platform,
            nodes: moka::future::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            interactions: InteractionTable::new(),
        }
    }

    pub fn interactions(&self) -> &InteractionTable {
        &self.interactions
    }

    /// Drop the cached copy of `id`. The next walk through it refetches.
    pub async fn forget(&self, id: super::MessageId) {
        self.nodes.invalidate(&id).await;
    }

    /// Resolve the chain ending at `message`, oldest first.
    ///
    /// Collects at most `max_depth` messages (always at least `message`
    /// itself) and never fetches past the limit. An interaction missing from
    /// the table ends the walk, as does a message with no parent.
    pub async fn resolve(&self, message: &ChatMessage, max_depth: usize) -> Result<Vec<ChatMessage>> {
        let mut chain = Vec::new();
        let mut current = message.clone();
        loop {
            let parent = if chain.len() + 1 < max_depth {
                self.parent_of(&current).await?
            } else {
                None
            };
            chain.push(current);
            match parent {
                Some(p) => current = p,
                None => break,
            }
        }
        chain.reverse();
        debug!(
            "Resolved chain of {} message(s) for message {}",
            chain.len(),
            message.id
        );
        Ok(chain)
    }

    async fn parent_of(&self, message: &ChatMessage) -> Result<Option<ChatMessage>> {
        if let Some(reference) = message.reference {
            trace!("message {} replies to {}", message.id, reference);
            let node = self
                .nodes
                .try_get_with(
                    reference,
                    self.platform.fetch_message(message.channel_id, reference),
                )
                .await
                .map_err(unshare)?;
            return Ok(Some(node));
        }

        if let Some(interaction) = message.interaction {
            let origin = self.interactions.get(interaction);
            if origin.is_none() {
                debug!(
                    "interaction {interaction} is not in the table; message {} is the chain root",
                    message.id
                );
            }
            return Ok(origin);
        }

        Ok(None)
    }
}
