use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::nats::trace_context::link_span_to_headers;
use crate::nats::{ConsumeBatchRequest, ConsumeBatchResponse};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

/// Tower layer opening one span per consumed batch, linked to the trace of
/// every message that carried trace context.
#[derive(Clone, Default)]
pub struct NatsBatchTracingLayer;

impl NatsBatchTracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsBatchTracingLayer {
    type Service = NatsBatchTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsBatchTracingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsBatchTracingService<S> {
    inner: S,
}

impl<S> Service<ConsumeBatchRequest> for NatsBatchTracingService<S>
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
        let span = info_span!(
            target: "nats",
            "nats_consume_batch",
            otel.name = "nats_consume_batch",
            messaging.system = "nats",
            messaging.operation = "receive",
            messaging.batch.message_count = req.len(),
            messaging.destination.name = %req.stream_name,
            messaging.consumer.name = %req.consumer_name,
            otel.status_code = field::Empty,
        );

        for headers in req.messages.iter().filter_map(|m| m.headers.as_ref()) {
            link_span_to_headers(&span, headers);
        }

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;

                let status = match &result {
                    Ok(ConsumeBatchResponse::Ack) => "OK",
                    Ok(ConsumeBatchResponse::Nak(_)) | Err(_) => "ERROR",
                };
                Span::current().record("otel.status_code", status);

                result
            }
            .instrument(span),
        )
    }
}
