use crate::domain::result::DomainResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Trait for publishing serialized telemetry to the downstream analytics bus
///
/// Implementations should:
/// - Publish the payload unchanged as one message
/// - Tag the message with the heartbeat it was derived from
/// - Return error if publish fails
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish(&self, device_id: &str, message_id: i64, payload: Bytes) -> DomainResult<()>;
}
