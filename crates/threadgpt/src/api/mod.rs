//! API interaction layer: completion requests and usage accounting.
//!
//! - [`completion`]: the [`CompletionBackend`] seam and the
//!   [`CompletionEngine`] that budgets every request against the context
//!   window.
//! - [`usage`]: correlation IDs, per-model pricing, and the cumulative
//!   [`UsageLedger`] behind the presence line.

pub mod completion;
pub mod usage;

pub use completion::{
    CompletionBackend, CompletionEngine, CompletionFuture, CompletionRequest, CompletionResponse,
    CompletionUsage,
};
pub use usage::{ModelPricing, UsageLedger, generate_trace_id, pricing_for_model};
