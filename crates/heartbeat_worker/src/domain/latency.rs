use common::domain::{EdgeHeartbeatLatencyRecord, HeartbeatMessage, TICKS_PER_MILLISECOND};

/// Derive latency telemetry for a heartbeat from the time it was enqueued
/// on the ingestion bus and the time processing started.
///
/// Inputs are not validated; skewed clocks give negative latencies.
pub fn compute_latency(
    msg: &HeartbeatMessage,
    hub_enqueued_utc_ticks: i64,
    process_initialized_utc_ticks: i64,
) -> EdgeHeartbeatLatencyRecord {
    let created = msg.created_at_utc_ticks;

    EdgeHeartbeatLatencyRecord {
        device_id: msg.device_id.clone(),
        module_id: msg.module_id.clone(),
        message_id: msg.message_id,
        edge_created_time_ticks: created,
        hub_enqueued_time_ticks: hub_enqueued_utc_ticks,
        process_initialized_time_ticks: process_initialized_utc_ticks,
        edge_to_hub_latency_ms: hub_enqueued_utc_ticks.saturating_sub(created)
            / TICKS_PER_MILLISECOND,
        edge_to_process_latency_ms: process_initialized_utc_ticks.saturating_sub(created)
            / TICKS_PER_MILLISECOND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 637_134_336_000_000_000;

    fn heartbeat() -> HeartbeatMessage {
        HeartbeatMessage {
            device_id: "dev-1".to_string(),
            module_id: "edge".to_string(),
            message_id: 42,
            created_at_utc_ticks: T,
            ..Default::default()
        }
    }

    #[test]
    fn test_copies_identity_and_ticks() {
        let record = compute_latency(&heartbeat(), T + 1, T + 2);

        assert_eq!(record.device_id, "dev-1");
        assert_eq!(record.module_id, "edge");
        assert_eq!(record.message_id, 42);
        assert_eq!(record.edge_created_time_ticks, T);
        assert_eq!(record.hub_enqueued_time_ticks, T + 1);
        assert_eq!(record.process_initialized_time_ticks, T + 2);
    }

    #[test]
    fn test_linear_in_delta() {
        for delta_ms in [0_i64, 1, 250, 1000, 86_400_000] {
            let delta = delta_ms * TICKS_PER_MILLISECOND;
            let record = compute_latency(&heartbeat(), T + delta, T + 2 * delta);

            assert_eq!(record.edge_to_hub_latency_ms, delta_ms);
            assert_eq!(record.edge_to_process_latency_ms, 2 * delta_ms);
        }
    }

    #[test]
    fn test_truncates_toward_zero() {
        let record = compute_latency(&heartbeat(), T + 19_999, T - 19_999);

        assert_eq!(record.edge_to_hub_latency_ms, 1);
        assert_eq!(record.edge_to_process_latency_ms, -1);
    }

    #[test]
    fn test_skewed_clock_is_negative() {
        let record = compute_latency(&heartbeat(), T - 5_000 * TICKS_PER_MILLISECOND, T);

        assert_eq!(record.edge_to_hub_latency_ms, -5_000);
        assert_eq!(record.edge_to_process_latency_ms, 0);
    }
}
