//! Token budget for a single completion request.
//!
//! The model's context window has to hold both the prompt and the answer, so
//! whatever the prompt does not use is what the answer may use, capped by the
//! caller.

/// Context window of the default model, in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Default upper bound on the answer length, in tokens.
pub const DEFAULT_HARD_CAP: usize = 4096;

/// Turns larger than this are candidates for summarization.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// Prompts at or above this size are compressed before sending.
pub const MAX_PROMPT_TOKENS: usize = 8192;

/// Answer budget for a prompt against a fixed context window.
///
/// ```
/// use threadgpt::context::TokenBudget;
///
/// let budget = TokenBudget::default();
/// assert_eq!(budget.available(100), 3995);
/// assert_eq!(budget.available(5000), 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    context_window: usize,
    hard_cap: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            hard_cap: DEFAULT_HARD_CAP,
        }
    }
}

impl TokenBudget {
    pub fn new(context_window: usize) -> Self {
        Self {
            context_window,
            ..Self::default()
        }
    }

    /// Override the answer cap.
    pub fn with_hard_cap(mut self, cap: usize) -> Self {
        self.hard_cap = cap;
        self
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn hard_cap(&self) -> usize {
        self.hard_cap
    }

    /// Tokens left for the answer once `prompt_tokens` are spent.
    ///
    /// One token is held back from the window; the result never exceeds the
    /// hard cap and saturates at zero.
    pub fn available(&self, prompt_tokens: usize) -> usize {
        self.context_window
            .saturating_sub(prompt_tokens)
            .saturating_sub(1)
            .min(self.hard_cap)
    }

    /// Log-friendly description of the budget for a prompt.
    pub fn to_log_string(&self, prompt_tokens: usize) -> String {
        format!(
            "budget: {} prompt tokens, {} available of {} (cap {})",
            prompt_tokens,
            self.available(prompt_tokens),
            self.context_window,
            self.hard_cap,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_reserves_one_token() {
        let budget = TokenBudget::default();
        assert_eq!(budget.available(0), 4095);
        assert_eq!(budget.available(4094), 1);
    }

    #[test]
    fn available_saturates_at_zero() {
        let budget = TokenBudget::default();
        assert_eq!(budget.available(4095), 0);
        assert_eq!(budget.available(4096), 0);
        assert_eq!(budget.available(100_000), 0);
    }

    #[test]
    fn hard_cap_limits_answer() {
        let budget = TokenBudget::default().with_hard_cap(256);
        assert_eq!(budget.available(10), 256);
        assert_eq!(budget.available(3900), 195);
    }

    #[test]
    fn larger_window() {
        let budget = TokenBudget::new(16_384).with_hard_cap(2048);
        assert_eq!(budget.context_window(), 16_384);
        assert_eq!(budget.available(1000), 2048);
    }

    #[test]
    fn log_string_mentions_numbers() {
        let log = TokenBudget::default().to_log_string(96);
        assert!(log.contains("96 prompt tokens"));
        assert!(log.contains("3999 available"));
    }
}
