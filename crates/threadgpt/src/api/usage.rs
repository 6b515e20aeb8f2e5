//! Correlation IDs and cumulative token accounting.
//!
//! Every bot invocation gets a `trace_id` for its log span. Token usage
//! reported by the completion API accumulates in a process-wide
//! [`UsageLedger`], which also renders the presence line shown on the bot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique trace ID for one invocation.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Flat per-token pricing (USD per 1K tokens, prompt and completion alike).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub per_thousand: f64,
}

impl ModelPricing {
    /// Estimate cost for a token count.
    pub fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.per_thousand
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            per_thousand: 0.002,
        }
    }
}

/// Lookup approximate pricing for a model by name.
///
/// Unknown models are priced like `gpt-3.5-turbo`. The figure only feeds the
/// presence line, it is not billing.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    if name.contains("gpt-4o-mini") {
        ModelPricing {
            per_thousand: 0.0006,
        }
    } else if name.contains("gpt-4o") {
        ModelPricing {
            per_thousand: 0.01,
        }
    } else if name.contains("gpt-4-32k") {
        ModelPricing {
            per_thousand: 0.06,
        }
    } else if name.contains("gpt-4") {
        ModelPricing {
            per_thousand: 0.03,
        }
    } else {
        ModelPricing::default()
    }
}

/// Process-wide counter of tokens consumed, summarization calls included.
#[derive(Debug)]
pub struct UsageLedger {
    total: AtomicU64,
    pricing: ModelPricing,
}

impl UsageLedger {
    pub fn new(pricing: ModelPricing) -> Self {
        Self::with_initial(pricing, 0)
    }

    /// Start from a previously persisted total.
    pub fn with_initial(pricing: ModelPricing, total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            pricing,
        }
    }

    /// Add one completion's `usage.total_tokens`; returns the new total.
    pub fn record(&self, tokens: u64) -> u64 {
        self.total.fetch_add(tokens, Ordering::Relaxed) + tokens
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn estimated_cost(&self) -> f64 {
        self.pricing.estimate_cost(self.total())
    }

    /// Presence text, e.g. `"1,234,567 tokens = 2.47 $"`.
    pub fn presence_line(&self) -> String {
        format!(
            "{} tokens = {} $",
            group_thousands(self.total()),
            format_dollars(self.estimated_cost())
        )
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(ModelPricing::default())
    }
}

/// `1234567` -> `"1,234,567"`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn format_dollars(amount: f64) -> String {
    let cents = (amount * 100.0).round().max(0.0) as u64;
    format!("{}.{:02}", group_thousands(cents / 100), cents % 100)
}
