//! Outgoing reply rendering and the record of what was sent.

use std::time::Duration;

use crate::platform::{MessageId, Reply};

/// Replies at least this many characters long are sent as a file.
pub const MAX_TEXT_REPLY_CHARS: usize = 2000;

/// Line width of file replies.
pub const WRAP_WIDTH: usize = 80;

/// Filename of file replies.
pub const REPLY_FILENAME: &str = "message.txt";

/// Turn an answer into what the platform can accept.
///
/// Short answers go out as text. Longer ones are hard-wrapped at
/// [`WRAP_WIDTH`] characters per line and attached as [`REPLY_FILENAME`].
pub fn render_reply(answer: &str) -> Reply {
    if answer.chars().count() < MAX_TEXT_REPLY_CHARS {
        return Reply::text(answer);
    }
    Reply::File {
        filename: REPLY_FILENAME.to_string(),
        content: wrap_lines(answer, WRAP_WIDTH).into_bytes(),
    }
}

/// Split every line into chunks of at most `width` characters. Empty lines
/// are dropped.
fn wrap_lines(text: &str, width: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(width.max(1)) {
            out.push(chunk.iter().collect());
        }
    }
    out.join("\n")
}

const LEDGER_CAPACITY: u64 = 4096;
const LEDGER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Which bot replies answer which source message.
///
/// Edits and deletes of the source retract the replies listed here. Sources
/// are bounded by count and age; once one is forgotten, editing it no longer
/// retracts the old answer.
#[derive(Clone)]
pub struct ReplyLedger {
    replies: moka::sync::Cache<MessageId, Vec<MessageId>>,
}

impl ReplyLedger {
    pub fn new() -> Self {
        Self::with_limits(LEDGER_CAPACITY, LEDGER_TTL)
    }

    pub fn with_limits(capacity: u64, ttl: Duration) -> Self {
        Self {
            replies: moka::sync::Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn record(&self, source: MessageId, reply: MessageId) {
        self.replies.entry(source).and_upsert_with(|existing| {
            let mut ids = existing.map(|e| e.into_value()).unwrap_or_default();
            if !ids.contains(&reply) {
                ids.push(reply);
            }
            ids
        });
    }

    /// Remove and return the replies to `source`.
    pub fn take(&self, source: MessageId) -> Vec<MessageId> {
        self.replies.remove(&source).unwrap_or_default()
    }

    pub fn replies_to(&self, source: MessageId) -> Vec<MessageId> {
        self.replies.get(&source).unwrap_or_default()
    }

    /// Number of source messages currently tracked.
    pub fn len(&self) -> u64 {
        self.replies.run_pending_tasks();
        self.replies.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplyLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplyLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyLedger")
            .field("sources", &self.replies.entry_count())
            .finish()
    }
}
