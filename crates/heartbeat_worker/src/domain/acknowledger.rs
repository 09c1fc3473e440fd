use crate::domain::{encode_ack, AckFailure, HeartbeatError};
use common::domain::{DeviceMethodInvoker, DeviceMethodRequest, HeartbeatMessage};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Direct method every heartbeat ack is sent through.
pub const HEARTBEAT_METHOD_NAME: &str = "Heartbeat";

/// Operation carried by the ack call.
pub const ACK_OPERATION: &str = "AckMessage";

/// What to do when a device answers the ack with a non-200 status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckStatusPolicy {
    /// Accept the answer and log a warning
    #[default]
    Lenient,
    /// Fail the heartbeat with [`AckFailure::UnexpectedStatus`]
    Strict,
}

impl AckStatusPolicy {
    pub fn from_reject_non_success(reject: bool) -> Self {
        if reject {
            AckStatusPolicy::Strict
        } else {
            AckStatusPolicy::Lenient
        }
    }
}

/// Echoes each heartbeat back to its device as an acknowledgment.
pub struct DeviceAcknowledger {
    invoker: Arc<dyn DeviceMethodInvoker>,
    status_policy: AckStatusPolicy,
}

impl DeviceAcknowledger {
    pub fn new(invoker: Arc<dyn DeviceMethodInvoker>, status_policy: AckStatusPolicy) -> Self {
        Self {
            invoker,
            status_policy,
        }
    }

    /// Mark `msg` as an ack, send it to `(device_id, module_id)` and return
    /// the marked message.
    #[instrument(
        skip(self, msg),
        fields(device_id = %msg.device_id, module_id = %msg.module_id, message_id = msg.message_id)
    )]
    pub async fn acknowledge(
        &self,
        mut msg: HeartbeatMessage,
    ) -> Result<HeartbeatMessage, HeartbeatError> {
        msg.mark_acknowledged();

        let failed = |msg: &HeartbeatMessage, source: AckFailure| HeartbeatError::Ack {
            device_id: msg.device_id.clone(),
            message_id: msg.message_id,
            source,
        };

        let payload = encode_ack(&msg).map_err(|e| failed(&msg, AckFailure::Encode(e)))?;

        info!(
            device_id = %msg.device_id,
            message_id = msg.message_id,
            "sending heartbeat ack to device"
        );

        let result = self
            .invoker
            .invoke(DeviceMethodRequest {
                device_id: msg.device_id.clone(),
                module_id: msg.module_id.clone(),
                method_name: HEARTBEAT_METHOD_NAME.to_string(),
                operation: ACK_OPERATION.to_string(),
                payload,
            })
            .await
            .map_err(|e| {
                error!(
                    device_id = %msg.device_id,
                    message_id = msg.message_id,
                    error = ?e,
                    "heartbeat ack invocation failed"
                );
                failed(&msg, AckFailure::Invocation(e))
            })?;

        if result.is_success() {
            info!(
                device_id = %msg.device_id,
                message_id = msg.message_id,
                "device acknowledged heartbeat"
            );
            return Ok(msg);
        }

        match self.status_policy {
            AckStatusPolicy::Lenient => {
                warn!(
                    device_id = %msg.device_id,
                    message_id = msg.message_id,
                    status_code = result.status_code,
                    "device answered heartbeat ack with non-success status"
                );
                Ok(msg)
            }
            AckStatusPolicy::Strict => Err(failed(
                &msg,
                AckFailure::UnexpectedStatus {
                    status_code: result.status_code,
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DomainError, MethodResult, MockDeviceMethodInvoker, ACK_MESSAGE_TYPE};

    fn heartbeat() -> HeartbeatMessage {
        HeartbeatMessage {
            device_id: "deviceId".to_string(),
            module_id: "edgeHeartbeat".to_string(),
            message_id: 1000,
            created_at_utc_ticks: 637_134_336_000_000_000,
            message_type: "Heartbeat".to_string(),
        }
    }

    fn status(status_code: i32) -> MethodResult {
        MethodResult {
            status_code,
            payload: None,
        }
    }

    #[tokio::test]
    async fn test_acknowledge_invokes_device_once() {
        let mut invoker = MockDeviceMethodInvoker::new();
        invoker
            .expect_invoke()
            .withf(|req| {
                req.device_id == "deviceId"
                    && req.module_id == "edgeHeartbeat"
                    && req.method_name == "Heartbeat"
                    && req.operation == "AckMessage"
                    && req.payload.contains(r#""msgType":"Ack""#)
                    && req.payload.contains(r#""id":"1000""#)
            })
            .times(1)
            .return_once(|_| Ok(status(200)));

        let acknowledger = DeviceAcknowledger::new(Arc::new(invoker), AckStatusPolicy::Lenient);

        let acked = acknowledger.acknowledge(heartbeat()).await.unwrap();

        assert_eq!(acked.message_type, ACK_MESSAGE_TYPE);
        assert_eq!(acked.message_id, 1000);
    }

    #[tokio::test]
    async fn test_lenient_accepts_non_success_status() {
        let mut invoker = MockDeviceMethodInvoker::new();
        invoker
            .expect_invoke()
            .times(1)
            .return_once(|_| Ok(status(404)));

        let acknowledger = DeviceAcknowledger::new(Arc::new(invoker), AckStatusPolicy::default());

        assert!(acknowledger.acknowledge(heartbeat()).await.is_ok());
    }

    #[tokio::test]
    async fn test_strict_rejects_non_success_status() {
        let mut invoker = MockDeviceMethodInvoker::new();
        invoker
            .expect_invoke()
            .times(1)
            .return_once(|_| Ok(status(500)));

        let acknowledger = DeviceAcknowledger::new(Arc::new(invoker), AckStatusPolicy::Strict);

        match acknowledger.acknowledge(heartbeat()).await {
            Err(HeartbeatError::Ack {
                device_id,
                message_id,
                source: AckFailure::UnexpectedStatus { status_code },
            }) => {
                assert_eq!(device_id, "deviceId");
                assert_eq!(message_id, 1000);
                assert_eq!(status_code, 500);
            }
            other => panic!("expected unexpected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invocation_error_becomes_ack_error() {
        let mut invoker = MockDeviceMethodInvoker::new();
        invoker.expect_invoke().times(1).return_once(|_| {
            Err(DomainError::DeviceMethodInvocation(anyhow::anyhow!(
                "no responders"
            )))
        });

        let acknowledger = DeviceAcknowledger::new(Arc::new(invoker), AckStatusPolicy::Lenient);

        let err = acknowledger.acknowledge(heartbeat()).await.unwrap_err();

        assert!(matches!(
            err,
            HeartbeatError::Ack {
                source: AckFailure::Invocation(DomainError::DeviceMethodInvocation(_)),
                ..
            }
        ));
        assert!(err.to_string().contains("no responders"));
    }

    #[test]
    fn test_policy_from_setting() {
        assert_eq!(
            AckStatusPolicy::from_reject_non_success(true),
            AckStatusPolicy::Strict
        );
        assert_eq!(
            AckStatusPolicy::from_reject_non_success(false),
            AckStatusPolicy::Lenient
        );
    }
}
