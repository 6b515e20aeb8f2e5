//! Reconstruct a [`Conversation`] from a resolved message chain.

use tracing::debug;

use super::directive::{TurnDecision, classify};
use super::{Conversation, Role, identity_hash};
use crate::context::TokenCounter;
use crate::error::{Error, Result};
use crate::platform::{AttachmentResolver, BotIdentity, ChatMessage, UserId};

/// Limits applied while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderLimits {
    /// Largest token count a single turn may reach after its attachment is
    /// inlined.
    pub max_turn_tokens: usize,
}

impl Default for BuilderLimits {
    fn default() -> Self {
        Self {
            max_turn_tokens: 3 * 1024,
        }
    }
}

/// Turns a message chain into a role-tagged, token-accounted conversation.
pub struct ConversationBuilder {
    model: String,
    counter: TokenCounter,
    attachments: AttachmentResolver,
    limits: BuilderLimits,
}

impl ConversationBuilder {
    pub fn new(model: impl Into<String>, counter: TokenCounter, attachments: AttachmentResolver) -> Self {
        Self {
            model: model.into(),
            counter,
            attachments,
            limits: BuilderLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: BuilderLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the conversation for `chain` (oldest first).
    ///
    /// The last node's text is `last_text` rather than its stored content:
    /// for slash commands the question never appears in the message itself.
    /// System directives anywhere in the chain are moved to the front.
    pub async fn build(
        &self,
        chain: &[ChatMessage],
        last_text: &str,
        identity: &BotIdentity,
        requester: UserId,
    ) -> Result<Conversation> {
        let mut conversation =
            Conversation::new(&self.model, self.counter.clone()).with_user(identity_hash(requester));
        let last = chain.len().saturating_sub(1);

        for (pos, node) in chain.iter().enumerate() {
            let text = if pos == last {
                last_text
            } else {
                node.clean_content.as_str()
            };

            let TurnDecision::Keep { role, mut text } = classify(node, text, identity)? else {
                debug!("Dropping bot-authored directive in message {}", node.id);
                continue;
            };

            if !node.attachments.is_empty() {
                let inlined = self.attachments.fetch_text(node).await?;
                text.push_str("\n\n");
                text.push_str(&inlined);
                let tokens = self.counter.count(&self.model, &text)?;
                if tokens > self.limits.max_turn_tokens {
                    return Err(Error::AttachmentTooLarge {
                        tokens,
                        limit: self.limits.max_turn_tokens,
                    });
                }
            }

            match role {
                Role::System => conversation.insert(0, role, text)?,
                Role::User | Role::Assistant => conversation.push(role, text)?,
            }
        }

        Ok(conversation)
    }
}
