use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::nats::{ConsumeBatchRequest, ConsumeBatchResponse};
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

/// Tower layer logging one line per consumed batch
#[derive(Clone, Default)]
pub struct NatsBatchLoggingLayer;

impl NatsBatchLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsBatchLoggingLayer {
    type Service = NatsBatchLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsBatchLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsBatchLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeBatchRequest> for NatsBatchLoggingService<S>
where
    S: Service<ConsumeBatchRequest, Response = ConsumeBatchResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeBatchRequest) -> Self::Future {
        let stream = req.stream_name.clone();
        let message_count = req.len();
        let payload_bytes: usize = req.messages.iter().map(|m| m.payload.len()).sum();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(ConsumeBatchResponse::Ack) => {
                        info!(
                            stream = %stream,
                            message_count,
                            payload_bytes,
                            duration_ms = %duration_ms,
                            "consumed {message_count} messages from {stream} in {duration_ms}ms [ack]"
                        );
                    }
                    Ok(ConsumeBatchResponse::Nak(reason)) => {
                        warn!(
                            stream = %stream,
                            message_count,
                            payload_bytes,
                            duration_ms = %duration_ms,
                            reason = reason.as_deref().unwrap_or(""),
                            "consumed {message_count} messages from {stream} in {duration_ms}ms [nak]"
                        );
                    }
                    Err(e) => {
                        error!(
                            stream = %stream,
                            message_count,
                            payload_bytes,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume batch from {stream} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
