//! Simulated edge module for local runs: publishes heartbeats into the
//! ingestion stream and answers the relay's ack calls.

use crate::domain::{decode, encode, ACK_OPERATION};
use crate::nats::{method_subject, DeviceMethodReply, METHOD_OPERATION_HEADER};
use anyhow::{Context, Result};
use async_nats::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::domain::{ticks_from_datetime, HeartbeatMessage, METHOD_STATUS_OK};
use common::nats::{LayeredPublisher, PublishRequest};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

const HEARTBEAT_MESSAGE_TYPE: &str = "Heartbeat";
const STATUS_BAD_REQUEST: i32 = 400;
const STATUS_NOT_IMPLEMENTED: i32 = 501;

#[derive(Debug, Clone)]
pub struct DemoDeviceConfig {
    pub device_id: String,
    pub module_id: String,
    /// Ingestion subject heartbeats are published on
    pub heartbeat_subject: String,
    pub method_subject_prefix: String,
    pub interval: Duration,
}

impl DemoDeviceConfig {
    pub fn method_subject(&self) -> Result<String> {
        method_subject(&self.method_subject_prefix, &self.device_id, &self.module_id)
            .context("demo device id cannot be addressed")
    }
}

pub fn demo_heartbeat(
    config: &DemoDeviceConfig,
    message_id: i64,
    now: DateTime<Utc>,
) -> HeartbeatMessage {
    HeartbeatMessage {
        device_id: config.device_id.clone(),
        module_id: config.module_id.clone(),
        message_id,
        created_at_utc_ticks: ticks_from_datetime(now),
        message_type: HEARTBEAT_MESSAGE_TYPE.to_string(),
    }
}

/// Publish a fresh heartbeat every `config.interval` until cancelled.
pub async fn run_demo_heartbeat_publisher(
    publisher: LayeredPublisher,
    config: DemoDeviceConfig,
    ctx: CancellationToken,
) -> Result<()> {
    info!(
        subject = %config.heartbeat_subject,
        device_id = %config.device_id,
        interval_secs = config.interval.as_secs(),
        "starting demo heartbeat publisher"
    );

    let mut ticker = tokio::time::interval(config.interval);
    let mut message_id: i64 = 0;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("demo heartbeat publisher stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                message_id += 1;
                let heartbeat = demo_heartbeat(&config, message_id, Utc::now());
                let payload = encode(&heartbeat).context("failed to encode demo heartbeat")?;

                // A missed heartbeat is what the relay is there to observe
                match publisher
                    .clone()
                    .oneshot(
                        PublishRequest::new(config.heartbeat_subject.clone(), payload)
                            .for_heartbeat(&heartbeat.device_id, heartbeat.message_id),
                    )
                    .await
                {
                    Ok(_) => debug!(message_id, "published demo heartbeat"),
                    Err(e) => warn!(message_id, error = %e, "failed to publish demo heartbeat"),
                }
            }
        }
    }
}

/// Answer one direct method request the way an edge module does.
pub fn handle_method_request(headers: Option<&HeaderMap>, payload: &[u8]) -> DeviceMethodReply {
    let operation = headers
        .and_then(|h| h.get(METHOD_OPERATION_HEADER))
        .map(|v| v.as_str().to_string())
        .unwrap_or_default();

    if operation != ACK_OPERATION {
        return DeviceMethodReply {
            status: STATUS_NOT_IMPLEMENTED,
            payload: Some(serde_json::json!({
                "error": format!("unknown operation {operation:?}")
            })),
        };
    }

    match decode(payload) {
        Ok(ack) => {
            info!(
                device_id = %ack.device_id,
                message_id = ack.message_id,
                msg_type = %ack.message_type,
                "heartbeat acknowledged by relay"
            );
            DeviceMethodReply {
                status: METHOD_STATUS_OK,
                payload: None,
            }
        }
        Err(e) => DeviceMethodReply {
            status: STATUS_BAD_REQUEST,
            payload: Some(serde_json::json!({ "error": e.to_string() })),
        },
    }
}

/// Serve direct method requests on `subject` until cancelled.
pub async fn run_demo_method_responder(
    client: async_nats::Client,
    subject: String,
    ctx: CancellationToken,
) -> Result<()> {
    let mut requests = client
        .subscribe(subject.clone())
        .await
        .with_context(|| format!("failed to subscribe to {subject}"))?;

    info!(subject = %subject, "demo device listening for direct methods");

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("demo method responder stopped");
                return Ok(());
            }
            next = requests.next() => {
                let Some(request) = next else {
                    anyhow::bail!("direct method subscription on {subject} closed");
                };

                let Some(reply_to) = request.reply else {
                    warn!(subject = %request.subject, "direct method request without reply subject");
                    continue;
                };

                let reply = handle_method_request(request.headers.as_ref(), &request.payload);
                let body = serde_json::to_vec(&reply).context("failed to encode method reply")?;

                client
                    .publish(reply_to, Bytes::from(body))
                    .await
                    .context("failed to send method reply")?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::encode_ack;

    fn config() -> DemoDeviceConfig {
        DemoDeviceConfig {
            device_id: "demo-edge-device".to_string(),
            module_id: String::new(),
            heartbeat_subject: "heartbeats.demo-edge-device".to_string(),
            method_subject_prefix: "devices.methods".to_string(),
            interval: Duration::from_secs(10),
        }
    }

    fn ack_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(METHOD_OPERATION_HEADER, ACK_OPERATION);
        headers
    }

    #[test]
    fn test_demo_heartbeat_decodes() {
        let now = Utc::now();
        let heartbeat = demo_heartbeat(&config(), 7, now);

        let decoded = decode(encode(&heartbeat).unwrap().as_bytes()).unwrap();

        assert_eq!(decoded, heartbeat);
        assert_eq!(decoded.created_at_utc_ticks, ticks_from_datetime(now));
    }

    #[test]
    fn test_method_subject() {
        assert_eq!(
            config().method_subject().unwrap(),
            "devices.methods.demo-edge-device"
        );
    }

    #[test]
    fn test_ack_is_answered_with_ok() {
        let mut heartbeat = demo_heartbeat(&config(), 1, Utc::now());
        heartbeat.mark_acknowledged();
        let payload = encode_ack(&heartbeat).unwrap();

        let reply = handle_method_request(Some(&ack_headers()), payload.as_bytes());

        assert_eq!(reply.status, 200);
        assert!(reply.payload.is_none());
    }

    #[test]
    fn test_unknown_operation() {
        let mut headers = HeaderMap::new();
        headers.insert(METHOD_OPERATION_HEADER, "Reboot");

        assert_eq!(handle_method_request(Some(&headers), b"{}").status, 501);
        assert_eq!(handle_method_request(None, b"{}").status, 501);
    }

    #[test]
    fn test_malformed_ack_payload() {
        let reply = handle_method_request(Some(&ack_headers()), b"{}");

        assert_eq!(reply.status, 400);
        assert!(reply.payload.is_some());
    }
}
