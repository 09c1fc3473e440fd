use crate::domain::{EmitFailure, HeartbeatError};
use bytes::Bytes;
use common::domain::{EdgeHeartbeatLatencyRecord, TelemetryPublisher};
use std::sync::Arc;
use tracing::debug;

/// Publishes latency records to the downstream analytics bus as JSON.
pub struct TelemetryEmitter {
    publisher: Arc<dyn TelemetryPublisher>,
}

impl TelemetryEmitter {
    pub fn new(publisher: Arc<dyn TelemetryPublisher>) -> Self {
        Self { publisher }
    }

    pub async fn emit(&self, record: &EdgeHeartbeatLatencyRecord) -> Result<(), HeartbeatError> {
        let failed = |source: EmitFailure| HeartbeatError::Emit {
            device_id: record.device_id.clone(),
            message_id: record.message_id,
            source,
        };

        let payload = serde_json::to_vec(record).map_err(|e| failed(EmitFailure::Serialize(e)))?;

        self.publisher
            .publish(&record.device_id, record.message_id, Bytes::from(payload))
            .await
            .map_err(|e| failed(EmitFailure::Publish(e)))?;

        debug!(
            device_id = %record.device_id,
            message_id = record.message_id,
            edge_to_hub_latency_ms = record.edge_to_hub_latency_ms,
            edge_to_process_latency_ms = record.edge_to_process_latency_ms,
            "emitted heartbeat latency record"
        );

        Ok(())
    }
}
