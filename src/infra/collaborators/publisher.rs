//! Publisher that accepts a fixed set of platforms.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{CollaboratorError, Publisher, ShareReceipt};

const DEFAULT_PLATFORMS: &[&str] = &["x", "linkedin", "facebook", "instagram", "threads"];

/// Issues random post ids for known platforms and rejects the rest.
#[derive(Debug, Clone)]
pub struct StubPublisher {
    platforms: HashSet<String>,
}

impl Default for StubPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_PLATFORMS.iter().copied())
    }
}

impl StubPublisher {
    /// Publisher accepting `platforms`.
    pub fn new<I, S>(platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            platforms: platforms.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Publisher for StubPublisher {
    async fn publish(&self, platform: &str, content: &str) -> Result<ShareReceipt, CollaboratorError> {
        if !self.platforms.contains(platform) {
            return Err(CollaboratorError::Rejected {
                target: format!("publish:{platform}"),
                message: "unsupported platform".into(),
            });
        }
        tracing::debug!(platform, bytes = content.len(), "stub publish");
        Ok(ShareReceipt {
            post_id: format!("{platform}-{}", Uuid::new_v4().simple()),
            platform: platform.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_and_unknown_platforms() {
        let publisher = StubPublisher::default();
        let receipt = publisher.publish("linkedin", "hello").await.unwrap();
        assert_eq!(receipt.platform, "linkedin");
        assert!(receipt.post_id.starts_with("linkedin-"));

        let err = publisher.publish("myspace", "hello").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected { .. }));
    }
}
