use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::types::{PublishRequest, PublishResponse};
use tower::{Layer, Service};
use tracing::{debug, error, warn, Instrument, Span};

/// Publishes slower than this are logged at warn.
pub const DEFAULT_SLOW_PUBLISH_THRESHOLD: Duration = Duration::from_millis(500);

/// Tower layer logging each publish with the heartbeat it belongs to.
///
/// Successful publishes log at debug, publishes over the slow threshold at
/// warn and failures at error.
#[derive(Clone, Debug)]
pub struct NatsPublishLoggingLayer {
    slow_publish_threshold: Duration,
}

impl Default for NatsPublishLoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl NatsPublishLoggingLayer {
    pub fn new() -> Self {
        Self {
            slow_publish_threshold: DEFAULT_SLOW_PUBLISH_THRESHOLD,
        }
    }

    pub fn with_slow_publish_threshold(mut self, threshold: Duration) -> Self {
        self.slow_publish_threshold = threshold;
        self
    }
}

impl<S> Layer<S> for NatsPublishLoggingLayer {
    type Service = NatsPublishLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishLoggingService {
            inner: service,
            slow_publish_threshold: self.slow_publish_threshold,
        }
    }
}

#[derive(Clone)]
pub struct NatsPublishLoggingService<S> {
    inner: S,
    slow_publish_threshold: Duration,
}

/// What a log line says about one publish, captured before the request is
/// handed to the inner service.
struct PublishLogContext {
    subject: String,
    payload_bytes: usize,
    device_id: String,
    message_id: String,
}

impl PublishLogContext {
    fn from_request(req: &PublishRequest) -> Self {
        let (device_id, message_id) = req
            .heartbeat()
            .map(|hb| (hb.device_id.to_string(), hb.message_id.to_string()))
            .unwrap_or_default();

        Self {
            subject: req.subject.clone(),
            payload_bytes: req.payload.len(),
            device_id,
            message_id,
        }
    }
}

fn is_slow(elapsed: Duration, threshold: Duration) -> bool {
    elapsed > threshold
}

impl<S> Service<PublishRequest> for NatsPublishLoggingService<S>
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

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let log = PublishLogContext::from_request(&req);
        let threshold = self.slow_publish_threshold;
        let mut inner = self.inner.clone();
        let start = Instant::now();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let elapsed = start.elapsed();
                let duration_ms = elapsed.as_millis() as u64;

                match &result {
                    Ok(_) if is_slow(elapsed, threshold) => warn!(
                        subject = %log.subject,
                        device_id = %log.device_id,
                        message_id = %log.message_id,
                        payload_bytes = log.payload_bytes,
                        duration_ms,
                        threshold_ms = threshold.as_millis() as u64,
                        "slow publish"
                    ),
                    Ok(_) => debug!(
                        subject = %log.subject,
                        device_id = %log.device_id,
                        message_id = %log.message_id,
                        payload_bytes = log.payload_bytes,
                        duration_ms,
                        "published"
                    ),
                    Err(e) => error!(
                        subject = %log.subject,
                        device_id = %log.device_id,
                        message_id = %log.message_id,
                        payload_bytes = log.payload_bytes,
                        duration_ms,
                        error = %e,
                        "publish failed"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}
