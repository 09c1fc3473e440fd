use crate::domain::{datetime_from_ticks, ticks_from_unix_nanos};
use crate::nats::{
    ConsumeBatchRequest, ConsumeBatchResponse, InboundMessage, JetStreamConsumer, PullConsumer,
};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Settings for a durable JetStream pull consumer.
#[derive(Debug, Clone)]
pub struct BatchConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// A NATS consumer that hands every fetched batch to a Tower service as a
/// single request and applies the service's verdict to the whole batch.
pub struct BatchConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    config: BatchConsumerConfig,
    service: S,
}

impl<S> BatchConsumer<S>
where
    S: Service<ConsumeBatchRequest, Response = ConsumeBatchResponse, Error = anyhow::Error>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: BatchConsumerConfig,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter_subject = %config.filter_subject,
            "creating batch consumer"
        );

        let pull_config = jetstream::consumer::pull::Config {
            name: Some(config.consumer_name.clone()),
            durable_name: Some(config.consumer_name.clone()),
            filter_subject: config.filter_subject.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(pull_config, &config.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            config,
            service,
        })
    }

    /// Run the consumer loop until cancellation. A batch in flight when the
    /// token fires is dropped unacknowledged and redelivered by the server.
    /// Settling is never raced against the token, so a batch is either
    /// settled in full or not at all.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            "starting batch consumer"
        );

        loop {
            let verdict = tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        stream = %self.config.stream_name,
                        consumer = %self.config.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => result,
            };

            match verdict {
                Ok(Some((messages, kind))) => {
                    settle_batch(&messages, kind, &ctx).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        stream = %self.config.stream_name,
                        consumer = %self.config.consumer_name,
                        error = %e,
                        "error processing batch"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        Ok(())
    }

    /// Fetch one batch and ask the service for its verdict. Returns `None`
    /// when the fetch came back empty.
    async fn fetch_and_process_batch(
        &mut self,
    ) -> Result<Option<(Vec<jetstream::Message>, AckKind)>> {
        let raw_messages = self
            .consumer
            .fetch_messages(self.config.batch_size, self.config.max_wait)
            .await?;

        if raw_messages.is_empty() {
            debug!("no messages in batch");
            return Ok(None);
        }

        debug!(message_count = raw_messages.len(), "received message batch");

        let request = ConsumeBatchRequest {
            stream_name: self.config.stream_name.clone(),
            consumer_name: self.config.consumer_name.clone(),
            messages: raw_messages.iter().map(to_inbound).collect(),
            received_at: Utc::now(),
        };

        let response = match self.call_service(request).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "service error processing batch");
                ConsumeBatchResponse::nak(e.to_string())
            }
        };

        let kind = match &response {
            ConsumeBatchResponse::Ack => AckKind::Ack,
            ConsumeBatchResponse::Nak(reason) => {
                warn!(
                    message_count = raw_messages.len(),
                    reason = reason.as_deref().unwrap_or(""),
                    "rejecting batch for redelivery"
                );
                AckKind::Nak(None)
            }
        };

        Ok(Some((raw_messages, kind)))
    }

    async fn call_service(&mut self, request: ConsumeBatchRequest) -> Result<ConsumeBatchResponse> {
        self.service.ready().await?.call(request).await
    }
}

#[async_trait]
trait SettleMessage: Send + Sync {
    fn subject(&self) -> &str;

    async fn settle(&self, kind: AckKind) -> Result<()>;
}

#[async_trait]
impl SettleMessage for jetstream::Message {
    fn subject(&self) -> &str {
        self.subject.as_str()
    }

    async fn settle(&self, kind: AckKind) -> Result<()> {
        self.ack_with(kind).await.map_err(|e| anyhow::anyhow!(e))
    }
}

/// Apply a verdict to every message of a batch unless shutdown has already
/// started. Returns how many messages were settled.
async fn settle_batch<M: SettleMessage>(
    messages: &[M],
    kind: AckKind,
    ctx: &CancellationToken,
) -> usize {
    if ctx.is_cancelled() {
        info!(
            message_count = messages.len(),
            "shutting down, leaving batch for redelivery"
        );
        return 0;
    }

    let mut settled = 0;
    for msg in messages {
        match msg.settle(kind.clone()).await {
            Ok(()) => settled += 1,
            Err(e) => error!(
                subject = %msg.subject(),
                error = %e,
                "failed to settle message"
            ),
        }
    }
    settled
}

fn to_inbound(msg: &jetstream::Message) -> InboundMessage {
    let enqueued_at = match msg.info() {
        Ok(info) => publish_time(info.published.unix_timestamp_nanos()),
        Err(e) => {
            warn!(subject = %msg.subject, error = %e, "message carries no stream metadata");
            None
        }
    };

    InboundMessage::new(msg.subject.to_string(), Bytes::copy_from_slice(&msg.payload))
        .with_headers(msg.headers.clone())
        .with_enqueued_at(enqueued_at)
}

fn publish_time(unix_nanos: i128) -> Option<DateTime<Utc>> {
    datetime_from_ticks(ticks_from_unix_nanos(unix_nanos))
}
