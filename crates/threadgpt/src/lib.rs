//! Chat-thread gateway to an LLM chat-completion API.
//!
//! `threadgpt` answers questions asked in chat-platform threads. Given the
//! message that invoked it, the bot walks the reply chain back to its root,
//! rebuilds a role-tagged conversation with exact token counts, compresses it
//! if it no longer fits, and asks the model for the next turn with whatever
//! budget the context window has left.
//!
//! # Getting started
//!
//! ```ignore
//! use std::sync::Arc;
//! use threadgpt::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> threadgpt::Result<()> {
//!     let config = BotConfig::default();
//!     let client = OpenAiClient::new(std::env::var("OPENAI_API_KEY").unwrap(), &config.api_base_url)?;
//!     let platform = Arc::new(MemoryPlatform::new(BotIdentity { id: UserId(1), display_name: "GPT".into() }));
//!
//!     let bot = Bot::new(config, platform.clone(), Arc::new(client));
//!     // Feed platform events into the bot:
//!     // bot.handle_message(&message).await;
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Platform seam:** [`ChatPlatform`](platform::ChatPlatform), with
//!   [`MemoryPlatform`](platform::MemoryPlatform) for replays and tests.
//! - **Chain walking and attachments:**
//!   [`ChainResolver`](platform::ChainResolver) and
//!   [`AttachmentResolver`](platform::AttachmentResolver).
//! - **Conversations:** [`Conversation`](conversation::Conversation) and
//!   [`ConversationBuilder`](conversation::ConversationBuilder).
//! - **Budgets and compression:** [`context`].
//! - **Completions and usage:** [`api`], plus [`OpenAiClient`] for the HTTP
//!   backend.
//! - **Event handling:** [`Bot`](bot::Bot).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`platform`] | Platform data model, chain resolver, attachment resolver, in-memory platform |
//! | [`conversation`] | Turns, token accounting, `[system]` directives, builder |
//! | [`context`] | Token counter, answer budget, compression |
//! | [`api`] | Completion backend seam, budgeted engine, usage ledger |
//! | [`bot`] | Event handlers, reply rendering, configuration |

pub mod api;
pub mod bot;
pub mod context;
pub mod conversation;
pub mod error;
pub mod platform;
pub mod prelude;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub use error::{Error, Result};

use api::{CompletionBackend, CompletionFuture, CompletionRequest, CompletionResponse, CompletionUsage};
use conversation::Role;

// ── Constants ──────────────────────────────────────────────────────

/// Default base URL of the chat-completion API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model for all completion calls.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Message types ──────────────────────────────────────────────────

/// A message as sent on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: String) -> Self {
        Self { role, content }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default)]
struct UsageInfo {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

/// Extract the first choice and usage from a successful response body.
pub(crate) fn parse_response(text: &str) -> Result<CompletionResponse> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| Error::CompletionApi(format!("failed to parse response: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(Error::CompletionApi(format!("OpenAI API error: {}", err.message)));
    }

    let usage = parsed.usage.unwrap_or_default();
    debug!(
        "Token usage: prompt={}, completion={}, total={}",
        usage.prompt_tokens.unwrap_or(0),
        usage.completion_tokens.unwrap_or(0),
        usage.total_tokens.unwrap_or(0),
    );

    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| Error::CompletionApi("empty response (no choices)".into()))?;
    debug!(
        "LLM output: {} chars, finish_reason={}",
        choice.message.content.as_ref().map_or(0, |s| s.len()),
        choice.finish_reason.as_deref().unwrap_or("(none)"),
    );

    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        usage: CompletionUsage {
            total_tokens: usage.total_tokens.unwrap_or(0),
        },
    })
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions API.
pub struct OpenAiClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) endpoint: String,
}

impl OpenAiClient {
    /// Create a client for `base_url` (e.g. [`OPENAI_BASE_URL`]).
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("threadgpt/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &CompletionRequest) -> Result<CompletionResponse> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::CompletionApi(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::CompletionApi(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(Error::CompletionApi(format!("OpenAI API HTTP {status}: {text}")));
        }

        parse_response(&text)
    }
}

impl CompletionBackend for OpenAiClient {
    fn create_completion(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        Box::pin(async move { self.chat(&request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_format() {
        let json = serde_json::to_value(Message::new(Role::User, "hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn parses_first_choice_and_usage() {
        let body = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": " Bonjour "}, "finish_reason": "stop"},
                {"message": {"role": "assistant", "content": "ignored"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 20, "completion_tokens": 3, "total_tokens": 23}
        }"#;
        let response = parse_response(body).unwrap();
        assert_eq!(response.text, " Bonjour ");
        assert_eq!(response.usage.total_tokens, 23);
    }

    #[test]
    fn api_error_body_is_completion_error() {
        let body = r#"{"error": {"message": "model overloaded"}}"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, Error::CompletionApi(ref m) if m.contains("model overloaded")));
        assert_eq!(err.kind(), "CompletionAPIError");
    }

    #[test]
    fn missing_choices_is_an_error() {
        assert!(parse_response(r#"{"choices": []}"#).is_err());
        assert!(parse_response("not json").is_err());
    }

    #[test]
    fn missing_usage_counts_zero() {
        let body = r#"{"choices": [{"message": {"content": "x"}}]}"#;
        assert_eq!(parse_response(body).unwrap().usage.total_tokens, 0);
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = OpenAiClient::new("key", "https://example.test/v1/").unwrap();
        assert_eq!(client.endpoint(), "https://example.test/v1/chat/completions");
        let client = OpenAiClient::new("key", OPENAI_BASE_URL).unwrap();
        assert_eq!(client.endpoint(), "https://api.openai.com/v1/chat/completions");
    }
}
