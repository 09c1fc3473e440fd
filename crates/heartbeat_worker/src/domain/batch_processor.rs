use crate::domain::{
    check_fresh, compute_latency, decode, BatchError, DeviceAcknowledger, ExpirationWindow,
    HeartbeatError, TelemetryEmitter,
};
use bytes::Bytes;
use common::domain::EdgeHeartbeatLatencyRecord;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatProcessorConfig {
    pub expiration_window: ExpirationWindow,
}

/// One raw message as delivered by the ingestion bus.
#[derive(Debug, Clone)]
pub struct InboundHeartbeat {
    pub payload: Bytes,
    /// Per-message enqueue time; the batch-level value applies when absent
    pub enqueued_utc_ticks: Option<i64>,
}

impl InboundHeartbeat {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            enqueued_utc_ticks: None,
        }
    }

    pub fn with_enqueued_utc_ticks(mut self, ticks: i64) -> Self {
        self.enqueued_utc_ticks = Some(ticks);
        self
    }
}

/// An ordered batch of heartbeats plus the host-supplied timestamps.
#[derive(Debug, Clone)]
pub struct HeartbeatBatch {
    pub messages: Vec<InboundHeartbeat>,
    /// Shared enqueue time for messages without their own
    pub enqueued_utc_ticks: i64,
    /// Wall-clock time the invocation started
    pub invoked_utc_ticks: i64,
}

/// Last stage a heartbeat completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Pending,
    Decoded,
    Validated,
    Acknowledged,
    Emitted,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Pending => "pending",
            PipelineStage::Decoded => "decoded",
            PipelineStage::Validated => "validated",
            PipelineStage::Acknowledged => "acknowledged",
            PipelineStage::Emitted => "emitted",
        }
    }
}

#[derive(Debug)]
pub enum MessageOutcome {
    Emitted(EdgeHeartbeatLatencyRecord),
    Failed {
        reached: PipelineStage,
        error: HeartbeatError,
    },
}

impl MessageOutcome {
    fn failed(reached: PipelineStage, error: HeartbeatError) -> Self {
        MessageOutcome::Failed { reached, error }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub emitted: usize,
}

/// Runs every heartbeat of a batch through decode, freshness, ack, latency
/// and emit, one message at a time and in delivery order.
///
/// A failing message never stops the rest of the batch; failures are
/// collected and surfaced once the batch is done (see [`BatchError`]).
pub struct HeartbeatBatchProcessor {
    acknowledger: DeviceAcknowledger,
    emitter: TelemetryEmitter,
    config: HeartbeatProcessorConfig,
}

impl HeartbeatBatchProcessor {
    pub fn new(
        acknowledger: DeviceAcknowledger,
        emitter: TelemetryEmitter,
        config: HeartbeatProcessorConfig,
    ) -> Self {
        Self {
            acknowledger,
            emitter,
            config,
        }
    }

    #[instrument(skip_all, fields(batch_size = batch.messages.len()))]
    pub async fn process_batch(&self, batch: &HeartbeatBatch) -> Result<BatchSummary, BatchError> {
        let mut failures = Vec::new();
        let mut emitted = 0;

        for (index, message) in batch.messages.iter().enumerate() {
            let enqueued = message
                .enqueued_utc_ticks
                .unwrap_or(batch.enqueued_utc_ticks);

            match self
                .process_message(message, enqueued, batch.invoked_utc_ticks)
                .await
            {
                MessageOutcome::Emitted(record) => {
                    emitted += 1;
                    debug!(
                        index,
                        device_id = %record.device_id,
                        message_id = record.message_id,
                        "heartbeat processed"
                    );
                }
                MessageOutcome::Failed { reached, error } => {
                    log_failure(index, reached, &error);
                    failures.push(error);
                }
            }
        }

        let summary = BatchSummary {
            total: batch.messages.len(),
            emitted,
        };

        match BatchError::from_failures(failures) {
            None => {
                info!(total = summary.total, "heartbeat batch processed");
                Ok(summary)
            }
            Some(err) => {
                warn!(
                    total = summary.total,
                    emitted = summary.emitted,
                    failure_count = err.failure_count(),
                    shape = err.shape(),
                    "heartbeat batch finished with failures"
                );
                Err(err)
            }
        }
    }

    /// Run one heartbeat through the pipeline; the first failing stage ends it.
    pub async fn process_message(
        &self,
        message: &InboundHeartbeat,
        enqueued_utc_ticks: i64,
        invoked_utc_ticks: i64,
    ) -> MessageOutcome {
        let heartbeat = match decode(&message.payload) {
            Ok(heartbeat) => heartbeat,
            Err(err) => return MessageOutcome::failed(PipelineStage::Pending, err),
        };

        if let Err(err) = check_fresh(
            &heartbeat,
            invoked_utc_ticks,
            self.config.expiration_window,
        ) {
            return MessageOutcome::failed(PipelineStage::Decoded, err);
        }

        let acked = match self.acknowledger.acknowledge(heartbeat).await {
            Ok(acked) => acked,
            Err(err) => return MessageOutcome::failed(PipelineStage::Validated, err),
        };

        let record = compute_latency(&acked, enqueued_utc_ticks, invoked_utc_ticks);

        match self.emitter.emit(&record).await {
            Ok(()) => MessageOutcome::Emitted(record),
            Err(err) => MessageOutcome::failed(PipelineStage::Acknowledged, err),
        }
    }
}

fn log_failure(index: usize, reached: PipelineStage, err: &HeartbeatError) {
    match err {
        HeartbeatError::Decode {
            reason,
            raw_payload,
        } => error!(
            index,
            stage = reached.as_str(),
            reason = %reason,
            raw_payload = %raw_payload,
            "heartbeat is not in the expected format"
        ),
        HeartbeatError::Expired {
            device_id,
            message_id,
            age_ticks,
            window_ticks,
        } => warn!(
            index,
            stage = reached.as_str(),
            device_id = %device_id,
            message_id,
            age_ticks,
            window_ticks,
            "dropping expired heartbeat"
        ),
        HeartbeatError::Ack {
            device_id,
            message_id,
            ..
        }
        | HeartbeatError::Emit {
            device_id,
            message_id,
            ..
        } => error!(
            index,
            stage = reached.as_str(),
            kind = err.kind(),
            transient = err.is_transient(),
            device_id = %device_id,
            message_id,
            error = ?err,
            "heartbeat processing failed"
        ),
    }
}
