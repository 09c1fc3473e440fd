use async_nats::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One consumed message, detached from the JetStream handle so it can move
/// through Tower layers freely.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// The NATS subject the message was published to
    pub subject: String,
    pub payload: Bytes,
    /// Optional headers (used for trace context propagation)
    pub headers: Option<HeaderMap>,
    /// When the stream stored the message, if the server reported it
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl InboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: None,
            enqueued_at: None,
        }
    }

    pub fn with_headers(mut self, headers: Option<HeaderMap>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: Option<DateTime<Utc>>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }
}

/// Request handed to the consuming service: every message of one fetch, in
/// delivery order.
#[derive(Debug, Clone)]
pub struct ConsumeBatchRequest {
    pub stream_name: String,
    pub consumer_name: String,
    pub messages: Vec<InboundMessage>,
    /// Wall-clock time the batch was handed to the service
    pub received_at: DateTime<Utc>,
}

impl ConsumeBatchRequest {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Outcome for a whole batch. The consumer applies it to every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeBatchResponse {
    /// Acknowledge every message in the batch
    Ack,
    /// Reject every message in the batch for redelivery
    Nak(Option<String>),
}

impl ConsumeBatchResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_builder() {
        let at = Utc::now();
        let msg = InboundMessage::new("heartbeats.dev-1", "payload").with_enqueued_at(Some(at));

        assert_eq!(msg.subject, "heartbeats.dev-1");
        assert_eq!(msg.payload, Bytes::from("payload"));
        assert!(msg.headers.is_none());
        assert_eq!(msg.enqueued_at, Some(at));
    }

    #[test]
    fn test_batch_len() {
        let batch = ConsumeBatchRequest {
            stream_name: "heartbeats".to_string(),
            consumer_name: "relay".to_string(),
            messages: vec![InboundMessage::new("a", "1"), InboundMessage::new("b", "2")],
            received_at: Utc::now(),
        };

        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_batch_response_nak() {
        let resp = ConsumeBatchResponse::nak("2 heartbeats failed");
        assert!(resp.is_nak());
        assert!(!resp.is_ack());
        assert_eq!(
            resp,
            ConsumeBatchResponse::Nak(Some("2 heartbeats failed".to_string()))
        );
    }
}
