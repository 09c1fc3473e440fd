use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use super::{
    NatsPublishLoggingLayer, NatsPublishLoggingService, NatsPublishTracingLayer,
    NatsPublishTracingService, NatsTracingConfig,
};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::{Layer, Service};

/// Inner service that performs the actual JetStream publish
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);

        Box::pin(async move {
            let subject = req.subject;
            publisher
                .publish_with_headers(subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse { subject })
        })
    }
}

/// Builder for creating a layered NATS publisher service
pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    tracing_config: Option<NatsTracingConfig>,
    logging: Option<NatsPublishLoggingLayer>,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher,
            tracing_config: None,
            logging: None,
        }
    }

    pub fn with_tracing(mut self, config: NatsTracingConfig) -> Self {
        self.tracing_config = Some(config);
        self
    }

    pub fn with_logging(mut self, layer: NatsPublishLoggingLayer) -> Self {
        self.logging = Some(layer);
        self
    }

    /// Layer order (outermost first): Tracing -> Logging -> Publish
    pub fn build(self) -> LayeredPublisher {
        let inner = NatsPublishService::new(self.publisher);

        match (self.tracing_config, self.logging) {
            (Some(config), Some(logging)) => LayeredPublisher::Both(
                NatsPublishTracingLayer::new(config).layer(logging.layer(inner)),
            ),
            (Some(config), None) => {
                LayeredPublisher::TracingOnly(NatsPublishTracingLayer::new(config).layer(inner))
            }
            (None, Some(logging)) => LayeredPublisher::LoggingOnly(logging.layer(inner)),
            (None, None) => LayeredPublisher::Bare(inner),
        }
    }
}

/// Publisher stack handed out by [`NatsPublisherBuilder`], one variant per
/// layer combination so the type stays concrete, `Clone` and `Sync`.
#[derive(Clone)]
pub enum LayeredPublisher {
    Both(NatsPublishTracingService<NatsPublishLoggingService<NatsPublishService>>),
    TracingOnly(NatsPublishTracingService<NatsPublishService>),
    LoggingOnly(NatsPublishLoggingService<NatsPublishService>),
    Bare(NatsPublishService),
}

impl Service<PublishRequest> for LayeredPublisher {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            LayeredPublisher::Both(svc) => svc.poll_ready(cx),
            LayeredPublisher::TracingOnly(svc) => svc.poll_ready(cx),
            LayeredPublisher::LoggingOnly(svc) => svc.poll_ready(cx),
            LayeredPublisher::Bare(svc) => svc.poll_ready(cx),
        }
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        match self {
            LayeredPublisher::Both(svc) => svc.call(req),
            LayeredPublisher::TracingOnly(svc) => svc.call(req),
            LayeredPublisher::LoggingOnly(svc) => svc.call(req),
            LayeredPublisher::Bare(svc) => svc.call(req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::{MockJetStreamPublisher, HEARTBEAT_DEVICE_ID_HEADER};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_layered_publisher_publishes() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .withf(|subject, headers, payload| {
                subject == "heartbeat_latency.records"
                    && payload.as_ref() == b"{}"
                    && headers.get(HEARTBEAT_DEVICE_ID_HEADER).map(|v| v.as_str()) == Some("dev-1")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut publisher = NatsPublisherBuilder::new(Arc::new(mock))
            .with_tracing(NatsTracingConfig::new("heartbeat-relay").for_component("test"))
            .with_logging(NatsPublishLoggingLayer::new())
            .build();

        let response = publisher
            .ready()
            .await
            .unwrap()
            .call(PublishRequest::new("heartbeat_latency.records", "{}").for_heartbeat("dev-1", 1))
            .await
            .unwrap();

        assert_eq!(response.subject, "heartbeat_latency.records");
    }

    #[tokio::test]
    async fn test_layered_publisher_propagates_error() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let mut publisher = NatsPublisherBuilder::new(Arc::new(mock)).build();

        let result = publisher
            .ready()
            .await
            .unwrap()
            .call(PublishRequest::new("subject", "{}"))
            .await;

        assert!(result.unwrap_err().to_string().contains("no responders"));
    }
}
