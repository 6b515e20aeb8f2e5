//! Error taxonomy for the gateway core.
//!
//! Every failure in the pipeline surfaces as an [`Error`] and travels up to
//! the [`Bot`](crate::bot::Bot), which reports it to the user once. Nothing in
//! the core retries. `Error` is `Clone` because the memoizing caches share a
//! single in-flight failure between every caller waiting on the same key.

use crate::conversation::Role;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why an attachment could not be inlined into a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("Too many attachments ({0}), only one is supported")]
    TooMany(usize),
    #[error("Attachment too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("Attachment is not text: {filename}")]
    NotText { filename: String },
    #[error("Attachment is not text (utf-8)")]
    NotUtf8,
}

/// Errors produced by the conversation pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    /// A single turn with its inlined attachment exceeds the per-turn limit.
    #[error("Attachment too large: {tokens} tokens in one message (limit {limit})")]
    AttachmentTooLarge { tokens: usize, limit: usize },

    #[error("All tokens are used up, start a new chat please.")]
    BudgetExhausted,

    /// A `[system]` directive was seen on a role that cannot carry one.
    #[error("Unknown role for system directive: {0}")]
    UnknownRole(Role),

    /// Upstream completion API failure, passed through unmodified.
    #[error("{0}")]
    CompletionApi(String),

    #[error("{0}")]
    Platform(String),

    #[error("no tokenizer for model '{model}': {reason}")]
    Tokenizer { model: String, reason: String },

    #[error("{0}")]
    Config(String),
}

impl Error {
    /// Short, user-facing name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Attachment(_) => "AttachmentError",
            Error::AttachmentTooLarge { .. } => "AttachmentTooLargeError",
            Error::BudgetExhausted => "BudgetExhaustedError",
            Error::UnknownRole(_) => "UnknownRoleError",
            Error::CompletionApi(_) => "CompletionAPIError",
            Error::Platform(_) => "PlatformError",
            Error::Tokenizer { .. } => "TokenizerError",
            Error::Config(_) => "ConfigError",
        }
    }
}

/// Unwrap an error shared through a cache's in-flight slot.
pub(crate) fn unshare(err: std::sync::Arc<Error>) -> Error {
    std::sync::Arc::unwrap_or_clone(err)
}
