use crate::domain::result::DomainResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for publishing enriched messages to the message broker
///
/// Implementations should:
/// - Hand the already-serialized payload to the broker on `topic`
/// - Return an error if the broker rejects the publish
///
/// Callers log failures and move on; nothing is retried.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EnrichedMessagePublisher: Send + Sync {
    async fn publish(&self, payload: Bytes, topic: &str) -> DomainResult<()>;
}
