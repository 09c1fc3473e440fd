use crate::domain::{HeartbeatBatch, HeartbeatBatchProcessor, InboundHeartbeat};
use common::domain::ticks_from_datetime;
use common::nats::{ConsumeBatchRequest, ConsumeBatchResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{error, warn};

/// How the ingestion consumer settles a batch the pipeline reported failures for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchFailurePolicy {
    /// Ack the batch; failures are logged and the consumer moves on
    #[default]
    Acknowledge,
    /// Nak every message of the batch for redelivery
    Redeliver,
}

impl BatchFailurePolicy {
    pub fn from_nak_failed_batches(nak: bool) -> Self {
        if nak {
            BatchFailurePolicy::Redeliver
        } else {
            BatchFailurePolicy::Acknowledge
        }
    }
}

/// Tower service bridging consumed NATS batches to the heartbeat pipeline.
///
/// The JetStream publish time of each message is its enqueue time; the time
/// the batch was handed over is both the invocation time and the fallback
/// enqueue time.
#[derive(Clone)]
pub struct HeartbeatBatchService {
    processor: Arc<HeartbeatBatchProcessor>,
    failure_policy: BatchFailurePolicy,
}

impl HeartbeatBatchService {
    pub fn new(processor: Arc<HeartbeatBatchProcessor>, failure_policy: BatchFailurePolicy) -> Self {
        Self {
            processor,
            failure_policy,
        }
    }
}

pub fn heartbeat_batch_from_request(req: ConsumeBatchRequest) -> HeartbeatBatch {
    let invoked_utc_ticks = ticks_from_datetime(req.received_at);

    let messages = req
        .messages
        .into_iter()
        .map(|msg| InboundHeartbeat {
            payload: msg.payload,
            enqueued_utc_ticks: msg.enqueued_at.map(ticks_from_datetime),
        })
        .collect();

    HeartbeatBatch {
        messages,
        enqueued_utc_ticks: invoked_utc_ticks,
        invoked_utc_ticks,
    }
}

impl Service<ConsumeBatchRequest> for HeartbeatBatchService {
    type Response = ConsumeBatchResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeBatchResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeBatchRequest) -> Self::Future {
        let processor = Arc::clone(&self.processor);
        let failure_policy = self.failure_policy;
        let stream = req.stream_name.clone();

        Box::pin(async move {
            let batch = heartbeat_batch_from_request(req);

            match processor.process_batch(&batch).await {
                Ok(_) => Ok(ConsumeBatchResponse::ack()),
                Err(err) => {
                    let kinds: Vec<&str> = err.errors().iter().map(|e| e.kind()).collect();
                    error!(
                        stream = %stream,
                        shape = err.shape(),
                        failure_count = err.failure_count(),
                        kinds = ?kinds,
                        error = %err,
                        "heartbeat batch failed"
                    );

                    match failure_policy {
                        BatchFailurePolicy::Acknowledge => Ok(ConsumeBatchResponse::ack()),
                        BatchFailurePolicy::Redeliver => {
                            warn!(stream = %stream, "requesting redelivery of failed batch");
                            Ok(ConsumeBatchResponse::nak(err.to_string()))
                        }
                    }
                }
            }
        })
    }
}
