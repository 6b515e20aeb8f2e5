//! Fetching small text attachments for inlining into a turn.

use std::sync::Arc;
use std::time::Duration;

use super::{ChatMessage, ChatPlatform, MessageId};
use crate::error::{AttachmentError, Error, Result, unshare};

/// Which attachments may be inlined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPolicy {
    /// Largest accepted attachment, in bytes (inclusive).
    pub max_bytes: u64,
    /// Accepted filename suffixes, including the dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024,
            allowed_extensions: vec![".txt".into(), ".py".into()],
        }
    }
}

impl AttachmentPolicy {
    /// Check the platform-reported metadata before downloading anything.
    pub fn check(&self, message: &ChatMessage) -> Result<(), AttachmentError> {
        if message.attachments.len() > 1 {
            return Err(AttachmentError::TooMany(message.attachments.len()));
        }
        for attachment in &message.attachments {
            if attachment.size > self.max_bytes {
                return Err(AttachmentError::TooLarge {
                    size: attachment.size,
                    limit: self.max_bytes,
                });
            }
            if !self
                .allowed_extensions
                .iter()
                .any(|ext| attachment.filename.ends_with(ext.as_str()))
            {
                return Err(AttachmentError::NotText {
                    filename: attachment.filename.clone(),
                });
            }
        }
        Ok(())
    }
}

const CACHE_CAPACITY: u64 = 64;
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Validates and downloads a message's text attachment, memoized per message.
pub struct AttachmentResolver {
    platform: Arc<dyn ChatPlatform>,
    policy: AttachmentPolicy,
    cache: moka::future::Cache<MessageId, String>,
}

impl AttachmentResolver {
    pub fn new(platform: Arc<dyn ChatPlatform>, policy: AttachmentPolicy) -> Self {
        Self::with_ttl(platform, policy, CACHE_TTL)
    }

    pub fn with_ttl(platform: Arc<dyn ChatPlatform>, policy: AttachmentPolicy, ttl: Duration) -> Self {
        Self {
            platform,
            policy,
            cache: moka::future::Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn policy(&self) -> &AttachmentPolicy {
        &self.policy
    }

    /// Text of the message's attachment, or an empty string when it has none.
    ///
    /// Rejections are not cached, so a message is re-checked every time it is
    /// seen.
    pub async fn fetch_text(&self, message: &ChatMessage) -> Result<String> {
        self.policy.check(message)?;
        let Some(attachment) = message.attachments.first() else {
            return Ok(String::new());
        };

        self.cache
            .try_get_with(message.id, async {
                let bytes = self.platform.read_attachment(attachment).await?;
                // The reported size can lie; enforce the limit on what arrived.
                if bytes.len() as u64 > self.policy.max_bytes {
                    return Err(Error::from(AttachmentError::TooLarge {
                        size: bytes.len() as u64,
                        limit: self.policy.max_bytes,
                    }));
                }
                String::from_utf8(bytes).map_err(|_| Error::from(AttachmentError::NotUtf8))
            })
            .await
            .map_err(unshare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        Attachment, Author, BotIdentity, ChannelId, MemoryPlatform, MessageKind, UserId,
    };

    fn platform() -> Arc<MemoryPlatform> {
        Arc::new(MemoryPlatform::new(BotIdentity {
            id: UserId(1),
            display_name: "GPT".into(),
        }))
    }

    fn with_attachments(attachments: Vec<Attachment>) -> ChatMessage {
        ChatMessage {
            id: MessageId(50),
            channel_id: ChannelId(1),
            author: Author {
                id: UserId(2),
                name: "ann".into(),
                bot: false,
            },
            content: "see file".into(),
            clean_content: "see file".into(),
            attachments,
            reference: None,
            interaction: None,
            kind: MessageKind::Default,
            mentions: vec![],
        }
    }

    fn attachment(name: &str, size: u64) -> Attachment {
        Attachment {
            filename: name.into(),
            size,
            url: format!("memory://{name}"),
        }
    }

    #[tokio::test]
    async fn inlines_small_text_file() {
        let p = platform();
        let body = "x".repeat(100);
        p.insert_attachment("memory://notes.txt", body.clone());
        let resolver = AttachmentResolver::new(p.clone(), AttachmentPolicy::default());

        let msg = with_attachments(vec![attachment("notes.txt", 100)]);
        assert_eq!(resolver.fetch_text(&msg).await.unwrap(), body);
    }

    #[tokio::test]
    async fn rejects_more_than_one_attachment() {
        let resolver = AttachmentResolver::new(platform(), AttachmentPolicy::default());
        let msg = with_attachments(vec![attachment("a.txt", 1), attachment("b.txt", 1)]);
        let err = resolver.fetch_text(&msg).await.unwrap_err();
        assert!(matches!(err, Error::Attachment(AttachmentError::TooMany(2))));
    }

    #[tokio::test]
    async fn size_limit_is_inclusive() {
        let p = platform();
        p.insert_attachment("memory://edge.txt", "a".repeat(65_536));
        let resolver = AttachmentResolver::new(p.clone(), AttachmentPolicy::default());

        let at_limit = with_attachments(vec![attachment("edge.txt", 65_536)]);
        assert!(resolver.fetch_text(&at_limit).await.is_ok());

        let over = with_attachments(vec![attachment("edge.txt", 65_537)]);
        let err = resolver.fetch_text(&over).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Attachment(AttachmentError::TooLarge { size: 65_537, .. })
        ));
    }

    #[tokio::test]
    async fn rejects_non_text_extension() {
        let resolver = AttachmentResolver::new(platform(), AttachmentPolicy::default());
        let msg = with_attachments(vec![attachment("cat.png", 10)]);
        let err = resolver.fetch_text(&msg).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Attachment(AttachmentError::NotText { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_utf8() {
        let p = platform();
        p.insert_attachment("memory://bin.txt", vec![0xff, 0xfe, 0x00]);
        let resolver = AttachmentResolver::new(p.clone(), AttachmentPolicy::default());
        let msg = with_attachments(vec![attachment("bin.txt", 3)]);
        let err = resolver.fetch_text(&msg).await.unwrap_err();
        assert!(matches!(err, Error::Attachment(AttachmentError::NotUtf8)));
    }

    #[tokio::test]
    async fn downloads_once_per_message() {
        let p = platform();
        p.insert_attachment("memory://a.py", "print(1)");
        let resolver = AttachmentResolver::new(p.clone(), AttachmentPolicy::default());
        let msg = with_attachments(vec![attachment("a.py", 8)]);

        let (a, b) = tokio::join!(resolver.fetch_text(&msg), resolver.fetch_text(&msg));
        assert_eq!(a.unwrap(), "print(1)");
        assert_eq!(b.unwrap(), "print(1)");
        resolver.fetch_text(&msg).await.unwrap();
        assert_eq!(p.attachment_reads(), 1);
    }

    #[tokio::test]
    async fn no_attachment_is_empty_text() {
        let resolver = AttachmentResolver::new(platform(), AttachmentPolicy::default());
        let msg = with_attachments(vec![]);
        assert_eq!(resolver.fetch_text(&msg).await.unwrap(), "");
    }
}
