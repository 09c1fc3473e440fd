use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use crate::nats::trace_context::inject_trace_context;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};

/// Identifies who publishes on a span: the service plus the component
/// inside it (latency producer, demo device, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NatsTracingConfig {
    pub service_name: String,
    pub component: Option<String>,
}

impl NatsTracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            component: None,
        }
    }

    pub fn for_component(&self, component: impl Into<String>) -> Self {
        Self {
            service_name: self.service_name.clone(),
            component: Some(component.into()),
        }
    }

    fn client_id(&self) -> String {
        match &self.component {
            Some(component) => format!("{}/{}", self.service_name, component),
            None => self.service_name.clone(),
        }
    }
}

/// Opens a producer span per publish, tags it with the heartbeat being
/// published and injects the span's context into the message headers.
#[derive(Clone)]
pub struct NatsPublishTracingLayer {
    config: NatsTracingConfig,
}

impl NatsPublishTracingLayer {
    pub fn new(config: NatsTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for NatsPublishTracingLayer {
    type Service = NatsPublishTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishTracingService {
            inner: service,
            client_id: self.config.client_id(),
            service_name: self.config.service_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsPublishTracingService<S> {
    inner: S,
    service_name: String,
    client_id: String,
}

impl<S> NatsPublishTracingService<S> {
    fn publish_span(&self, req: &PublishRequest) -> Span {
        let span = info_span!(
            target: "nats",
            "nats_publish",
            otel.name = %format!("{} publish", req.subject),
            otel.kind = "producer",
            messaging.system = "nats",
            messaging.operation = "publish",
            messaging.destination.name = %req.subject,
            messaging.message.body.size = req.payload.len(),
            messaging.client.id = %self.client_id,
            service.name = %self.service_name,
            heartbeat.device_id = field::Empty,
            heartbeat.message_id = field::Empty,
            otel.status_code = field::Empty,
        );

        if let Some(heartbeat) = req.heartbeat() {
            span.record("heartbeat.device_id", heartbeat.device_id);
            span.record("heartbeat.message_id", heartbeat.message_id);
        }

        span
    }
}

impl<S> Service<PublishRequest> for NatsPublishTracingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let span = self.publish_span(&req);

        // Headers must carry the publish span, not the caller's
        span.in_scope(|| inject_trace_context(&mut req.headers));

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;

                let status = if result.is_ok() { "OK" } else { "ERROR" };
                Span::current().record("otel.status_code", status);

                result
            }
            .instrument(span),
        )
    }
}
