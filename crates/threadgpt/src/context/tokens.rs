//! Model-exact token counting.
//!
//! Budget arithmetic is only as good as the token counts behind it: an
//! undercount gets the request rejected upstream, an overcount truncates the
//! answer. [`TokenCounter`] therefore uses the model's own BPE encoding
//! (via `tiktoken-rs`) instead of a chars-per-token estimate, and memoizes
//! both the loaded encodings and the per-`(model, text)` counts.

use std::sync::Arc;

use moka::sync::Cache;
use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result, unshare};

/// Default number of memoized `(model, text)` counts.
pub const DEFAULT_TOKEN_CACHE_CAPACITY: u64 = 256;

/// Number of distinct encodings kept loaded at once.
const ENCODING_CACHE_CAPACITY: u64 = 8;

/// Memoizing, thread-safe token counter. Cloning is cheap and clones share
/// the same caches.
#[derive(Clone)]
pub struct TokenCounter {
    encodings: Cache<String, Arc<CoreBPE>>,
    counts: Cache<(String, String), usize>,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOKEN_CACHE_CAPACITY)
    }

    /// Create a counter that memoizes up to `capacity` counts.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            encodings: Cache::new(ENCODING_CACHE_CAPACITY),
            counts: Cache::new(capacity),
        }
    }

    /// Count the tokens `text` occupies for `model`.
    ///
    /// Fails with [`Error::Tokenizer`] when the model has no known encoding.
    pub fn count(&self, model: &str, text: &str) -> Result<usize> {
        if text.is_empty() {
            return Ok(0);
        }
        let key = (model.to_string(), text.to_string());
        self.counts
            .try_get_with(key, || {
                let bpe = self.encoding(model)?;
                Ok::<_, Error>(bpe.encode_ordinary(text).len())
            })
            .map_err(unshare)
    }

    /// Number of memoized counts (approximate until pending tasks run).
    pub fn cached_counts(&self) -> u64 {
        self.counts.run_pending_tasks();
        self.counts.entry_count()
    }

    fn encoding(&self, model: &str) -> Result<Arc<CoreBPE>> {
        self.encodings
            .try_get_with(model.to_string(), || {
                tiktoken_rs::get_bpe_from_model(model)
                    .map(Arc::new)
                    .map_err(|e| Error::Tokenizer {
                        model: model.to_string(),
                        reason: e.to_string(),
                    })
            })
            .map_err(unshare)
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encodings", &self.encodings.entry_count())
            .field("counts", &self.counts.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "gpt-3.5-turbo";

    #[test]
    fn counts_with_model_encoding() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(MODEL, "hello world").unwrap(), 2);
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(MODEL, "").unwrap(), 0);
    }

    #[test]
    fn unknown_model_is_an_error() {
        let counter = TokenCounter::new();
        let err = counter.count("definitely-not-a-model", "hi").unwrap_err();
        assert!(matches!(err, Error::Tokenizer { .. }));
    }

    #[test]
    fn repeated_counts_are_memoized() {
        let counter = TokenCounter::new();
        let a = counter.count(MODEL, "the same sentence twice").unwrap();
        let b = counter.count(MODEL, "the same sentence twice").unwrap();
        assert_eq!(a, b);
        assert_eq!(counter.cached_counts(), 1);
    }

    #[test]
    fn clones_share_the_cache() {
        let counter = TokenCounter::new();
        let clone = counter.clone();
        counter.count(MODEL, "shared").unwrap();
        assert_eq!(clone.cached_counts(), 1);
    }

    #[test]
    fn longer_text_costs_more() {
        let counter = TokenCounter::new();
        let short = counter.count(MODEL, "word").unwrap();
        let long = counter.count(MODEL, &"word ".repeat(100)).unwrap();
        assert!(long > short);
    }
}
