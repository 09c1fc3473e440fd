#![cfg(feature = "integration-tests")]

use chrono::Utc;
use common::domain::{ticks_from_datetime, EdgeHeartbeatLatencyRecord};
use common::nats::{
    NatsClient, NatsPublishLoggingLayer, NatsTracingConfig, HEARTBEAT_MESSAGE_ID_HEADER,
};
use futures::StreamExt;
use heartbeat_worker::{
    run_demo_method_responder, AckStatusPolicy, BatchFailurePolicy, HeartbeatProcessorConfig,
    HeartbeatWorker, HeartbeatWorkerConfig, HeartbeatWorkerConnections,
};
use std::time::Duration;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};
use tokio_util::sync::CancellationToken;

/// NATS image with JetStream enabled
#[derive(Debug, Clone)]
struct NatsWithJetStream {
    ports: Vec<ContainerPort>,
}

impl Default for NatsWithJetStream {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(4222)],
        }
    }
}

impl Image for NatsWithJetStream {
    fn name(&self) -> &str {
        "nats"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(3)]
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<std::borrow::Cow<'_, str>>> {
        vec!["--js"]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

async fn start_nats() -> (ContainerAsync<NatsWithJetStream>, String) {
    let container = NatsWithJetStream::default()
        .start()
        .await
        .expect("failed to start NATS container");
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(4222).await.unwrap();

    (container, format!("nats://{}:{}", host, port))
}

fn heartbeat(device_id: &str, id: i64) -> String {
    let created = ticks_from_datetime(Utc::now());
    format!(
        r#"{{"deviceId":"{device_id}","id":"{id}","msgType":"Heartbeat","heartbeatCreatedTicksUtc":"{created}"}}"#
    )
}

fn worker_config() -> HeartbeatWorkerConfig {
    HeartbeatWorkerConfig {
        inbound_stream: "heartbeats".to_string(),
        inbound_subject: "heartbeats.>".to_string(),
        consumer_name: "heartbeat-relay-test".to_string(),
        batch_size: 10,
        batch_wait: Duration::from_secs(1),
        failure_policy: BatchFailurePolicy::Acknowledge,
        processor: HeartbeatProcessorConfig::default(),
        ack_status_policy: AckStatusPolicy::Strict,
        device_method_subject_prefix: "devices.methods".to_string(),
        device_method_timeout: Duration::from_secs(5),
        telemetry_subject: "heartbeat_latency.records".to_string(),
        publish_tracing: NatsTracingConfig::new("heartbeat-relay-test"),
        publish_logging: NatsPublishLoggingLayer::new(),
        demo_device: None,
    }
}

#[tokio::test]
async fn test_heartbeats_are_acked_and_measured() {
    let (_container, url) = start_nats().await;
    let nats = NatsClient::connect(&url, Duration::from_secs(10))
        .await
        .unwrap();
    nats.ensure_stream("heartbeats", "test heartbeats")
        .await
        .unwrap();
    nats.ensure_stream("heartbeat_latency", "test latency records")
        .await
        .unwrap();

    let mut records = nats
        .client()
        .subscribe("heartbeat_latency.records")
        .await
        .unwrap();

    let ctx = CancellationToken::new();

    // dev-1 answers acks; dev-2 has no responder and fails its ack
    tokio::spawn(run_demo_method_responder(
        nats.client().clone(),
        "devices.methods.dev-1".to_string(),
        ctx.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    for payload in [
        heartbeat("dev-1", 1),
        r#"{"moduleId":"broken"}"#.to_string(),
        heartbeat("dev-2", 2),
        heartbeat("dev-1", 3),
    ] {
        nats.jetstream()
            .publish("heartbeats.test", payload.into())
            .await
            .unwrap()
            .await
            .unwrap();
    }

    let worker = HeartbeatWorker::new(
        HeartbeatWorkerConnections {
            inbound: &nats,
            device: &nats,
            telemetry: &nats,
        },
        worker_config(),
    )
    .await
    .unwrap();

    for (_, process) in worker.into_runner_processes() {
        tokio::spawn(process(ctx.clone()));
    }

    let mut received = Vec::new();
    while received.len() < 2 {
        let msg = tokio::time::timeout(Duration::from_secs(15), records.next())
            .await
            .expect("timed out waiting for latency records")
            .expect("subscription closed");
        let record: EdgeHeartbeatLatencyRecord = serde_json::from_slice(&msg.payload).unwrap();
        let tagged_id = msg
            .headers
            .as_ref()
            .and_then(|headers| headers.get(HEARTBEAT_MESSAGE_ID_HEADER))
            .map(|value| value.as_str().to_string());
        assert_eq!(tagged_id, Some(record.message_id.to_string()));
        received.push(record);
    }

    ctx.cancel();

    let ids: Vec<i64> = received.iter().map(|r| r.message_id).collect();
    assert_eq!(ids, vec![1, 3]);
    for record in &received {
        assert_eq!(record.device_id, "dev-1");
        assert!(record.edge_to_process_latency_ms >= record.edge_to_hub_latency_ms);
    }
}
