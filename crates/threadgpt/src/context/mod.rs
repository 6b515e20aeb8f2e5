//! Context window management: token counting, budgets, and compression.
//!
//! The context window is the scarcest resource the bot has. This module
//! provides the three layers that keep a prompt inside it:
//!
//! 1. **[`tokens`]**: [`TokenCounter`] gives exact, memoized per-model token
//!    counts for every turn.
//!
//! 2. **[`budget`]**: [`TokenBudget`] turns a prompt size into the answer
//!    allowance for one request, saturating at zero.
//!
//! 3. **[`compressor`]**: [`ContextCompressor`] replaces large middle turns
//!    with summaries once a prompt grows past the compression limit.

pub mod budget;
pub mod compressor;
pub mod tokens;

pub use budget::{COMPRESS_THRESHOLD, MAX_PROMPT_TOKENS, TokenBudget};
pub use compressor::{CompressionReport, ContextCompressor};
pub use tokens::TokenCounter;
