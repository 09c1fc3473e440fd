use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{DomainError, DomainResult, TelemetryPublisher};
use common::nats::{LayeredPublisher, PublishRequest};
use tower::ServiceExt;
use tracing::debug;

/// Publishes serialized latency records to the telemetry stream.
pub struct LatencyRecordProducer {
    publisher: LayeredPublisher,
    subject: String,
}

impl LatencyRecordProducer {
    pub fn new(publisher: LayeredPublisher, subject: String) -> Self {
        debug!(subject = %subject, "initialized LatencyRecordProducer");
        Self { publisher, subject }
    }
}

#[async_trait]
impl TelemetryPublisher for LatencyRecordProducer {
    async fn publish(&self, device_id: &str, message_id: i64, payload: Bytes) -> DomainResult<()> {
        let request = PublishRequest::new(self.subject.clone(), payload)
            .with_header("Content-Type", "application/json")
            .for_heartbeat(device_id, message_id);

        self.publisher
            .clone()
            .oneshot(request)
            .await
            .map_err(DomainError::PublishError)?;

        Ok(())
    }
}
