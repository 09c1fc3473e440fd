use serde::{Deserialize, Serialize};

/// `msgType` value marking a heartbeat echoed back to its device.
pub const ACK_MESSAGE_TYPE: &str = "Ack";

/// One inbound device status report.
///
/// `module_id` is empty for device-level heartbeats. `message_id` is assigned
/// by the sender and is only unique per device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeartbeatMessage {
    pub device_id: String,
    pub module_id: String,
    pub message_id: i64,
    pub created_at_utc_ticks: i64,
    pub message_type: String,
}

impl HeartbeatMessage {
    /// Marks the heartbeat as an acknowledgment before it is echoed back.
    pub fn mark_acknowledged(&mut self) {
        self.message_type = ACK_MESSAGE_TYPE.to_string();
    }

    pub fn is_acknowledgment(&self) -> bool {
        self.message_type == ACK_MESSAGE_TYPE
    }
}

/// Latency telemetry derived from one heartbeat.
///
/// Latencies are whole milliseconds truncated toward zero and are negative
/// when the device clock runs ahead of the hub. Serialized field names are
/// the ones the analytics consumers already index on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeHeartbeatLatencyRecord {
    #[serde(rename = "DeviceId")]
    pub device_id: String,
    #[serde(rename = "ModuleId")]
    pub module_id: String,
    #[serde(rename = "MessageId")]
    pub message_id: i64,
    #[serde(rename = "EdgeCreatedTimeTicks")]
    pub edge_created_time_ticks: i64,
    #[serde(rename = "IoTHubEnqueuedTimeTicks")]
    pub hub_enqueued_time_ticks: i64,
    #[serde(rename = "AzFncInitializedTimeTicks")]
    pub process_initialized_time_ticks: i64,
    #[serde(rename = "EdgeToHubLatencyMs")]
    pub edge_to_hub_latency_ms: i64,
    #[serde(rename = "EdgeToAzFncLatencyMs")]
    pub edge_to_process_latency_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_acknowledged() {
        let mut msg = HeartbeatMessage {
            device_id: "dev-1".to_string(),
            message_type: "Heartbeat".to_string(),
            ..Default::default()
        };

        assert!(!msg.is_acknowledgment());
        msg.mark_acknowledged();
        assert!(msg.is_acknowledgment());
        assert_eq!(msg.message_type, "Ack");
    }

    #[test]
    fn test_latency_record_wire_names() {
        let record = EdgeHeartbeatLatencyRecord {
            device_id: "dev-1".to_string(),
            module_id: String::new(),
            message_id: 42,
            edge_created_time_ticks: 1,
            hub_enqueued_time_ticks: 2,
            process_initialized_time_ticks: 3,
            edge_to_hub_latency_ms: 4,
            edge_to_process_latency_ms: 5,
        };

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["DeviceId"], "dev-1");
        assert_eq!(json["ModuleId"], "");
        assert_eq!(json["MessageId"], 42);
        assert_eq!(json["EdgeCreatedTimeTicks"], 1);
        assert_eq!(json["IoTHubEnqueuedTimeTicks"], 2);
        assert_eq!(json["AzFncInitializedTimeTicks"], 3);
        assert_eq!(json["EdgeToHubLatencyMs"], 4);
        assert_eq!(json["EdgeToAzFncLatencyMs"], 5);
    }
}
