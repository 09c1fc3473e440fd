use async_nats::HeaderMap;
use bytes::Bytes;

pub const HEARTBEAT_DEVICE_ID_HEADER: &str = "Heartbeat-Device-Id";
pub const HEARTBEAT_MESSAGE_ID_HEADER: &str = "Heartbeat-Message-Id";

/// Request to publish a message to NATS
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Outgoing headers; the tracing layer adds trace context here
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Tag the message with the heartbeat it carries or was derived from.
    pub fn for_heartbeat(self, device_id: &str, message_id: i64) -> Self {
        self.with_header(HEARTBEAT_DEVICE_ID_HEADER, device_id)
            .with_header(HEARTBEAT_MESSAGE_ID_HEADER, &message_id.to_string())
    }

    pub fn heartbeat(&self) -> Option<HeartbeatRef<'_>> {
        let device_id = self.headers.get(HEARTBEAT_DEVICE_ID_HEADER)?.as_str();
        let message_id = self.headers.get(HEARTBEAT_MESSAGE_ID_HEADER)?.as_str();
        Some(HeartbeatRef {
            device_id,
            message_id,
        })
    }
}

/// Heartbeat identity read back from publish headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRef<'a> {
    pub device_id: &'a str,
    pub message_id: &'a str,
}

/// Response from a publish operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResponse {
    /// The subject published to
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_request_headers() {
        let req = PublishRequest::new("heartbeat_latency.records", "{}")
            .with_header("Content-Type", "application/json");

        assert_eq!(req.subject, "heartbeat_latency.records");
        assert_eq!(req.payload, Bytes::from("{}"));
        assert_eq!(
            req.headers.get("Content-Type").unwrap().as_str(),
            "application/json"
        );
        assert_eq!(req.heartbeat(), None);
    }

    #[test]
    fn test_heartbeat_identity_round_trips_through_headers() {
        let req = PublishRequest::new("heartbeat_latency.records", "{}").for_heartbeat("dev-1", 42);

        assert_eq!(
            req.heartbeat(),
            Some(HeartbeatRef {
                device_id: "dev-1",
                message_id: "42",
            })
        );
    }
}
