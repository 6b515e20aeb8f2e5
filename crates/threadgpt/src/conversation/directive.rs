//! Per-message role and content decision.
//!
//! Pure function from a chain node (plus the text chosen for it) to what the
//! conversation should contain for that node: a role-tagged turn, or
//! nothing. Users can steer the bot with messages starting with `[system]`;
//! the same prefix on a bot-authored message is never trusted and the
//! message is dropped.

use super::Role;
use crate::error::{Error, Result};
use crate::platform::{BotIdentity, ChatMessage};

/// Case-insensitive prefix that turns a user message into a system turn.
pub const SYSTEM_MARKER: &str = "[system]";

/// What a chain node contributes to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    Keep { role: Role, text: String },
    Drop,
}

/// Role implied by authorship alone.
pub fn author_role(node: &ChatMessage, identity: &BotIdentity) -> Role {
    if node.author.id == identity.id {
        Role::Assistant
    } else {
        Role::User
    }
}

/// Decide the turn for `node` given the text chosen for it.
///
/// Strips one leading `@<bot name>` mention and surrounding whitespace, then
/// applies the `[system]` directive rules.
pub fn classify(node: &ChatMessage, text: &str, identity: &BotIdentity) -> Result<TurnDecision> {
    let role = author_role(node, identity);
    let mention = identity.clean_mention();
    let text = text.strip_prefix(mention.as_str()).unwrap_or(text).trim();

    let Some(directive) = strip_marker(text) else {
        return Ok(TurnDecision::Keep {
            role,
            text: text.to_string(),
        });
    };

    match role {
        Role::User => Ok(TurnDecision::Keep {
            role: Role::System,
            text: directive.to_string(),
        }),
        Role::Assistant => Ok(TurnDecision::Drop),
        Role::System => Err(Error::UnknownRole(role)),
    }
}

fn strip_marker(text: &str) -> Option<&str> {
    let head = text.get(..SYSTEM_MARKER.len())?;
    if !head.eq_ignore_ascii_case(SYSTEM_MARKER) {
        return None;
    }
    text.get(SYSTEM_MARKER.len()..).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Author, ChannelId, MessageId, MessageKind, UserId};

    fn me() -> BotIdentity {
        BotIdentity {
            id: UserId(1),
            display_name: "GPT".into(),
        }
    }

    fn node(author: u64) -> ChatMessage {
        ChatMessage {
            id: MessageId(1),
            channel_id: ChannelId(1),
            author: Author {
                id: UserId(author),
                name: "x".into(),
                bot: author == 1,
            },
            content: String::new(),
            clean_content: String::new(),
            attachments: vec![],
            reference: None,
            interaction: None,
            kind: MessageKind::Default,
            mentions: vec![],
        }
    }

    fn keep(role: Role, text: &str) -> TurnDecision {
        TurnDecision::Keep {
            role,
            text: text.into(),
        }
    }

    #[test]
    fn plain_user_text_is_kept() {
        let d = classify(&node(2), "  hello  ", &me()).unwrap();
        assert_eq!(d, keep(Role::User, "hello"));
    }

    #[test]
    fn bot_messages_are_assistant_turns() {
        let d = classify(&node(1), "hi there", &me()).unwrap();
        assert_eq!(d, keep(Role::Assistant, "hi there"));
    }

    #[test]
    fn leading_mention_is_stripped() {
        let d = classify(&node(2), "@GPT what time is it", &me()).unwrap();
        assert_eq!(d, keep(Role::User, "what time is it"));
    }

    #[test]
    fn mention_match_is_case_sensitive() {
        let d = classify(&node(2), "@gpt hi", &me()).unwrap();
        assert_eq!(d, keep(Role::User, "@gpt hi"));
    }

    #[test]
    fn user_directive_becomes_system() {
        let d = classify(&node(2), "[system] be terse", &me()).unwrap();
        assert_eq!(d, keep(Role::System, "be terse"));
    }

    #[test]
    fn directive_marker_is_case_insensitive() {
        let d = classify(&node(2), "@GPT [SyStEm]   reply in French", &me()).unwrap();
        assert_eq!(d, keep(Role::System, "reply in French"));
    }

    #[test]
    fn assistant_directive_is_dropped() {
        let d = classify(&node(1), "[SYSTEM] System message is set.", &me()).unwrap();
        assert_eq!(d, TurnDecision::Drop);
    }

    #[test]
    fn marker_must_be_a_prefix() {
        let d = classify(&node(2), "please [system] no", &me()).unwrap();
        assert_eq!(d, keep(Role::User, "please [system] no"));
    }

    #[test]
    fn short_and_multibyte_text_is_safe() {
        assert_eq!(
            classify(&node(2), "[sys", &me()).unwrap(),
            keep(Role::User, "[sys")
        );
        assert_eq!(
            classify(&node(2), "[systé", &me()).unwrap(),
            keep(Role::User, "[systé")
        );
    }
}
