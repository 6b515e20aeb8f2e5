//! Configuration for a [`Bot`](super::Bot).
//!
//! Every field has a default, so a config file only needs the settings it
//! changes:
//!
//! ```json
//! { "model": "gpt-4", "context_window": 8192, "allow_passive_mention": false }
//! ```
//!
//! Builder methods cover the settings the CLI overrides:
//!
//! ```
//! use threadgpt::bot::BotConfig;
//!
//! let config = BotConfig::default()
//!     .with_model("gpt-4")
//!     .with_context_window(8192);
//! assert_eq!(config.token_budget().context_window(), 8192);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{COMPRESS_THRESHOLD, MAX_PROMPT_TOKENS, TokenBudget};
use crate::conversation::BuilderLimits;
use crate::error::{Error, Result};
use crate::platform::{AttachmentPolicy, MAX_CHAIN_DEPTH};
use crate::{DEFAULT_MODEL, OPENAI_BASE_URL};

/// Settings for one bot instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Model used for answers and summaries.
    pub model: String,
    /// Answer replies that mention the bot, not only explicit commands.
    pub allow_passive_mention: bool,
    /// Base URL of the chat-completion API.
    pub api_base_url: String,
    /// Context window of `model`, in tokens.
    pub context_window: usize,
    /// Upper bound on one answer, in tokens.
    pub max_answer_tokens: usize,
    /// Turns larger than this may be summarized.
    pub compress_threshold_tokens: usize,
    /// Prompts at or above this size are compressed.
    pub max_prompt_tokens: usize,
    /// Largest turn, in tokens, once its attachment is inlined.
    pub max_turn_tokens: usize,
    /// Most messages collected from one reply chain.
    pub max_chain_depth: usize,
    /// Largest inlined attachment, in bytes.
    pub max_attachment_bytes: u64,
    /// Filename suffixes accepted for inlining.
    pub attachment_extensions: Vec<String>,
    /// Lifetime of cached chain nodes, attachments, and summaries, in seconds.
    pub cache_ttl_secs: u64,
    /// Token count the usage ledger starts from.
    pub initial_token_count: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        let policy = AttachmentPolicy::default();
        let budget = TokenBudget::default();
        Self {
            model: DEFAULT_MODEL.to_string(),
            allow_passive_mention: true,
            api_base_url: OPENAI_BASE_URL.to_string(),
            context_window: budget.context_window(),
            max_answer_tokens: budget.hard_cap(),
            compress_threshold_tokens: COMPRESS_THRESHOLD,
            max_prompt_tokens: MAX_PROMPT_TOKENS,
            max_turn_tokens: BuilderLimits::default().max_turn_tokens,
            max_chain_depth: MAX_CHAIN_DEPTH,
            max_attachment_bytes: policy.max_bytes,
            attachment_extensions: policy.allowed_extensions,
            cache_ttl_secs: 60 * 60,
            initial_token_count: 0,
        }
    }
}

impl BotConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".into()));
        }
        if self.context_window == 0 {
            return Err(Error::Config("context_window must be positive".into()));
        }
        if self.max_chain_depth == 0 {
            return Err(Error::Config("max_chain_depth must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_passive_mentions(mut self, enabled: bool) -> Self {
        self.allow_passive_mention = enabled;
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn token_budget(&self) -> TokenBudget {
        TokenBudget::new(self.context_window).with_hard_cap(self.max_answer_tokens)
    }

    pub fn attachment_policy(&self) -> AttachmentPolicy {
        AttachmentPolicy {
            max_bytes: self.max_attachment_bytes,
            allowed_extensions: self.attachment_extensions.clone(),
        }
    }

    pub fn builder_limits(&self) -> BuilderLimits {
        BuilderLimits {
            max_turn_tokens: self.max_turn_tokens,
        }
    }
}
