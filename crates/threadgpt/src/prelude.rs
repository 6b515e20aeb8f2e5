//! Convenience re-exports for common `threadgpt` types.
//!
//! Meant to be glob-imported when wiring a bot to a platform:
//!
//! ```ignore
//! use threadgpt::prelude::*;
//! ```
//!
//! Pipeline internals (the compressor, the builder, the resolvers) are left
//! out; import those from their modules when driving a stage directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::error::{AttachmentError, Error, Result};
pub use crate::{Message, OpenAiClient};

// ── Bot ─────────────────────────────────────────────────────────────
pub use crate::bot::{Bot, BotConfig, Outcome};

// ── Platform ────────────────────────────────────────────────────────
pub use crate::platform::{
    Attachment, Author, BotIdentity, ChannelId, ChatMessage, ChatPlatform, InteractionId,
    MemoryPlatform, MessageId, MessageKind, PlatformFuture, Reply, UserId,
};

// ── Completions ─────────────────────────────────────────────────────
pub use crate::api::{
    CompletionBackend, CompletionEngine, CompletionFuture, CompletionRequest, CompletionResponse,
    CompletionUsage, UsageLedger,
};

// ── Conversations ───────────────────────────────────────────────────
pub use crate::context::TokenCounter;
pub use crate::conversation::{Conversation, Role};
