//! Role-tagged conversations and the builder that reconstructs them from a
//! reply chain.
//!
//! A [`Conversation`] is the ordered list of [`Turn`]s sent to the completion
//! API, each carrying its exact token count. The token total is always
//! recomputed from the turns using the chat-completion wire overhead
//! (`2 + Σ(tokens + 5)`), so it can never drift from the content it describes.

pub mod builder;
pub mod directive;

pub use builder::{BuilderLimits, ConversationBuilder};
pub use directive::{TurnDecision, classify};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Message;
use crate::context::TokenCounter;
use crate::error::{Error, Result};
use crate::platform::UserId;

/// Per-message framing tokens charged by the chat-completion API.
pub const TOKENS_PER_MESSAGE: usize = 5;

/// Tokens that prime the assistant's reply.
pub const REPLY_PRIMING_TOKENS: usize = 2;

/// Role of a turn in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged message unit with its token count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: String,
    tokens: usize,
}

impl Turn {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }
}

/// Hex SHA-256 of a user id, sent upstream for abuse tracking instead of the
/// raw platform id.
pub fn identity_hash(user: UserId) -> String {
    hex::encode(Sha256::digest(user.to_string().as_bytes()))
}

/// An ordered, token-accounted conversation for one completion request.
#[derive(Debug, Clone)]
pub struct Conversation {
    model: String,
    user: Option<String>,
    counter: TokenCounter,
    turns: Vec<Turn>,
    /// Role of the most recently added turn, wherever it was placed.
    latest: Option<Role>,
}

impl Conversation {
    /// Create an empty conversation for `model`.
    pub fn new(model: impl Into<String>, counter: TokenCounter) -> Self {
        Self {
            model: model.into(),
            user: None,
            counter,
            turns: Vec::new(),
            latest: None,
        }
    }

    /// Attach the identity string forwarded as the API `user` field.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// True when the turn added last was a system directive, even though
    /// system turns are stored at the front.
    pub fn ends_with_directive(&self) -> bool {
        self.latest == Some(Role::System)
    }

    /// Append a turn, counting its tokens against the conversation's model.
    pub fn push(&mut self, role: Role, content: impl Into<String>) -> Result<()> {
        let turn = self.make_turn(role, content.into())?;
        self.turns.push(turn);
        self.latest = Some(role);
        Ok(())
    }

    /// Insert a turn at `index` (clamped to the end).
    pub fn insert(&mut self, index: usize, role: Role, content: impl Into<String>) -> Result<()> {
        let turn = self.make_turn(role, content.into())?;
        let index = index.min(self.turns.len());
        self.turns.insert(index, turn);
        self.latest = Some(role);
        Ok(())
    }

    /// Replace the content of the turn at `index`, recounting its tokens.
    /// Content and count change together or not at all.
    pub(crate) fn rewrite(&mut self, index: usize, content: String) -> Result<()> {
        let tokens = self.counter.count(&self.model, &content)?;
        if let Some(turn) = self.turns.get_mut(index) {
            turn.content = content;
            turn.tokens = tokens;
        }
        Ok(())
    }

    /// Total prompt tokens, including per-message framing and reply priming.
    pub fn total_tokens(&self) -> usize {
        REPLY_PRIMING_TOKENS
            + self
                .turns
                .iter()
                .map(|t| t.tokens + TOKENS_PER_MESSAGE)
                .sum::<usize>()
    }

    /// Wire messages for the completion request.
    pub fn messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|t| Message::new(t.role, t.content.clone()))
            .collect()
    }

    /// Count tokens for `text` against this conversation's model.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.counter.count(&self.model, text)
    }

    pub(crate) fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    fn make_turn(&self, role: Role, content: String) -> Result<Turn, Error> {
        let tokens = self.counter.count(&self.model, &content)?;
        Ok(Turn {
            role,
            content,
            tokens,
        })
    }
}
