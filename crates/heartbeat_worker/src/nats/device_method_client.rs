use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{
    DeviceMethodInvoker, DeviceMethodRequest, DomainError, DomainResult, MethodResult,
};
use common::nats::{inject_trace_context, NatsRequester};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const METHOD_NAME_HEADER: &str = "Method-Name";
pub const METHOD_OPERATION_HEADER: &str = "Method-Operation";

/// Body a device replies with to a direct method request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMethodReply {
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
}

/// Subject a device (or one of its modules) listens on for direct methods:
/// `{prefix}.{device_id}` or `{prefix}.{device_id}.{module_id}`.
pub fn method_subject(prefix: &str, device_id: &str, module_id: &str) -> DomainResult<String> {
    if !is_valid_token(device_id) {
        return Err(DomainError::InvalidMethodTarget(format!(
            "device id {device_id:?} is not a valid subject token"
        )));
    }

    if module_id.is_empty() {
        return Ok(format!("{prefix}.{device_id}"));
    }

    if !is_valid_token(module_id) {
        return Err(DomainError::InvalidMethodTarget(format!(
            "module id {module_id:?} is not a valid subject token"
        )));
    }

    Ok(format!("{prefix}.{device_id}.{module_id}"))
}

/// Invokes device direct methods over NATS request/reply.
pub struct NatsDeviceMethodClient {
    requester: Arc<dyn NatsRequester>,
    subject_prefix: String,
    timeout: Duration,
}

impl NatsDeviceMethodClient {
    pub fn new(
        requester: Arc<dyn NatsRequester>,
        subject_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            requester,
            subject_prefix: subject_prefix.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DeviceMethodInvoker for NatsDeviceMethodClient {
    #[instrument(
        skip(self, request),
        fields(device_id = %request.device_id, module_id = %request.module_id, method = %request.method_name)
    )]
    async fn invoke(&self, request: DeviceMethodRequest) -> DomainResult<MethodResult> {
        let subject =
            method_subject(&self.subject_prefix, &request.device_id, &request.module_id)?;

        let mut headers = HeaderMap::new();
        headers.insert(METHOD_NAME_HEADER, request.method_name.as_str());
        headers.insert(METHOD_OPERATION_HEADER, request.operation.as_str());
        inject_trace_context(&mut headers);

        debug!(subject = %subject, operation = %request.operation, "invoking device method");

        let reply = tokio::time::timeout(
            self.timeout,
            self.requester.request_with_headers(
                subject.clone(),
                headers,
                Bytes::from(request.payload),
            ),
        )
        .await
        .map_err(|_| DomainError::DeviceMethodTimeout {
            target: subject.clone(),
            method: request.method_name.clone(),
            timeout_ms: self.timeout.as_millis(),
        })?
        .map_err(DomainError::DeviceMethodInvocation)?;

        let reply: DeviceMethodReply = serde_json::from_slice(&reply).map_err(|e| {
            DomainError::InvalidMethodResponse(format!("reply from {subject} is not valid: {e}"))
        })?;

        debug!(subject = %subject, status = reply.status, "device method answered");

        Ok(MethodResult {
            status_code: reply.status,
            payload: reply.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::nats::MockNatsRequester;

    fn ack_request(device_id: &str, module_id: &str) -> DeviceMethodRequest {
        DeviceMethodRequest {
            device_id: device_id.to_string(),
            module_id: module_id.to_string(),
            method_name: "Heartbeat".to_string(),
            operation: "AckMessage".to_string(),
            payload: r#"{"deviceId":"dev-1","msgType":"Ack"}"#.to_string(),
        }
    }

    #[test]
    fn test_method_subject() {
        assert_eq!(
            method_subject("devices.methods", "dev-1", "").unwrap(),
            "devices.methods.dev-1"
        );
        assert_eq!(
            method_subject("devices.methods", "dev-1", "edgeHeartbeat").unwrap(),
            "devices.methods.dev-1.edgeHeartbeat"
        );
        for bad in ["", "a.b", "a*", ">", "dev 1"] {
            assert!(matches!(
                method_subject("devices.methods", bad, ""),
                Err(DomainError::InvalidMethodTarget(_))
            ));
        }
        assert!(method_subject("devices.methods", "dev-1", "m.x").is_err());
    }

    #[tokio::test]
    async fn test_invoke_sends_headers_and_parses_reply() {
        let mut requester = MockNatsRequester::new();
        requester
            .expect_request_with_headers()
            .withf(|subject, headers, payload| {
                subject == "devices.methods.dev-1.edge"
                    && headers.get(METHOD_NAME_HEADER).map(|v| v.as_str()) == Some("Heartbeat")
                    && headers.get(METHOD_OPERATION_HEADER).map(|v| v.as_str())
                        == Some("AckMessage")
                    && &payload[..] == br#"{"deviceId":"dev-1","msgType":"Ack"}"#.as_slice()
            })
            .times(1)
            .returning(|_, _, _| Ok(Bytes::from_static(br#"{"status":200}"#)));

        let client = NatsDeviceMethodClient::new(
            Arc::new(requester),
            "devices.methods",
            Duration::from_secs(1),
        );

        let result = client.invoke(ack_request("dev-1", "edge")).await.unwrap();

        assert_eq!(result.status_code, 200);
        assert!(result.payload.is_none());
    }

    #[tokio::test]
    async fn test_reply_payload_is_returned() {
        let mut requester = MockNatsRequester::new();
        requester.expect_request_with_headers().returning(|_, _, _| {
            Ok(Bytes::from_static(
                br#"{"status":404,"payload":{"error":"unknown operation"}}"#,
            ))
        });

        let client = NatsDeviceMethodClient::new(
            Arc::new(requester),
            "devices.methods",
            Duration::from_secs(1),
        );

        let result = client.invoke(ack_request("dev-1", "")).await.unwrap();

        assert_eq!(result.status_code, 404);
        assert_eq!(
            result.payload,
            Some(serde_json::json!({"error": "unknown operation"}))
        );
    }

    #[tokio::test]
    async fn test_transport_error() {
        let mut requester = MockNatsRequester::new();
        requester
            .expect_request_with_headers()
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let client = NatsDeviceMethodClient::new(
            Arc::new(requester),
            "devices.methods",
            Duration::from_secs(1),
        );

        assert!(matches!(
            client.invoke(ack_request("dev-1", "")).await,
            Err(DomainError::DeviceMethodInvocation(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_reply() {
        let mut requester = MockNatsRequester::new();
        requester
            .expect_request_with_headers()
            .returning(|_, _, _| Ok(Bytes::from_static(b"OK")));

        let client = NatsDeviceMethodClient::new(
            Arc::new(requester),
            "devices.methods",
            Duration::from_secs(1),
        );

        assert!(matches!(
            client.invoke(ack_request("dev-1", "")).await,
            Err(DomainError::InvalidMethodResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_target_skips_request() {
        let mut requester = MockNatsRequester::new();
        requester.expect_request_with_headers().never();

        let client = NatsDeviceMethodClient::new(
            Arc::new(requester),
            "devices.methods",
            Duration::from_secs(1),
        );

        assert!(matches!(
            client.invoke(ack_request("site.dev-1", "")).await,
            Err(DomainError::InvalidMethodTarget(_))
        ));
    }

    struct UnresponsiveDevice;

    #[async_trait]
    impl NatsRequester for UnresponsiveDevice {
        async fn request_with_headers(
            &self,
            _subject: String,
            _headers: HeaderMap,
            _payload: Bytes,
        ) -> anyhow::Result<Bytes> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Bytes::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let client = NatsDeviceMethodClient::new(
            Arc::new(UnresponsiveDevice),
            "devices.methods",
            Duration::from_secs(30),
        );

        match client.invoke(ack_request("dev-1", "")).await {
            Err(DomainError::DeviceMethodTimeout {
                target,
                method,
                timeout_ms,
            }) => {
                assert_eq!(target, "devices.methods.dev-1");
                assert_eq!(method, "Heartbeat");
                assert_eq!(timeout_ms, 30_000);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
