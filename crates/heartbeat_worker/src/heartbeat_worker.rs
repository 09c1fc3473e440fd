use crate::domain::{
    AckStatusPolicy, DeviceAcknowledger, HeartbeatBatchProcessor, HeartbeatProcessorConfig,
    TelemetryEmitter,
};
use crate::nats::{
    run_demo_heartbeat_publisher, run_demo_method_responder, BatchFailurePolicy,
    DemoDeviceConfig, HeartbeatBatchService, LatencyRecordProducer, NatsDeviceMethodClient,
};
use common::nats::{
    BatchConsumer, BatchConsumerConfig, LayeredPublisher, NatsBatchLoggingLayer,
    NatsBatchLoggingService, NatsBatchTracingLayer, NatsBatchTracingService, NatsClient,
    NatsPublishLoggingLayer, NatsPublisherBuilder, NatsTracingConfig,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub type RunnerProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

type HeartbeatConsumerStack =
    NatsBatchTracingService<NatsBatchLoggingService<HeartbeatBatchService>>;

pub struct HeartbeatWorkerConfig {
    pub inbound_stream: String,
    pub inbound_subject: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub batch_wait: Duration,
    pub failure_policy: BatchFailurePolicy,
    pub processor: HeartbeatProcessorConfig,
    pub ack_status_policy: AckStatusPolicy,
    pub device_method_subject_prefix: String,
    pub device_method_timeout: Duration,
    pub telemetry_subject: String,
    /// Base span settings for publishers; each one adds its component name
    pub publish_tracing: NatsTracingConfig,
    pub publish_logging: NatsPublishLoggingLayer,
    pub demo_device: Option<DemoDeviceConfig>,
}

/// NATS connections the worker talks through. They may all be the same
/// connection.
pub struct HeartbeatWorkerConnections<'a> {
    pub inbound: &'a NatsClient,
    pub device: &'a NatsClient,
    pub telemetry: &'a NatsClient,
}

struct DemoDevice {
    config: DemoDeviceConfig,
    method_subject: String,
    inbound: LayeredPublisher,
    device_client: async_nats::Client,
}

pub struct HeartbeatWorker {
    consumer: BatchConsumer<HeartbeatConsumerStack>,
    demo_device: Option<DemoDevice>,
}

impl HeartbeatWorker {
    pub async fn new(
        connections: HeartbeatWorkerConnections<'_>,
        config: HeartbeatWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!("Initializing heartbeat worker");

        let invoker = Arc::new(NatsDeviceMethodClient::new(
            connections.device.create_requester_client(),
            config.device_method_subject_prefix.clone(),
            config.device_method_timeout,
        ));
        let telemetry_publisher =
            NatsPublisherBuilder::new(connections.telemetry.create_publisher_client())
                .with_tracing(config.publish_tracing.for_component("latency_record_producer"))
                .with_logging(config.publish_logging.clone())
                .build();
        let producer = Arc::new(LatencyRecordProducer::new(
            telemetry_publisher,
            config.telemetry_subject.clone(),
        ));

        let processor = Arc::new(HeartbeatBatchProcessor::new(
            DeviceAcknowledger::new(invoker, config.ack_status_policy),
            TelemetryEmitter::new(producer),
            config.processor,
        ));

        let service = ServiceBuilder::new()
            .layer(NatsBatchTracingLayer::new())
            .layer(NatsBatchLoggingLayer::new())
            .service(HeartbeatBatchService::new(processor, config.failure_policy));

        let consumer = BatchConsumer::new(
            connections.inbound.create_consumer_client(),
            BatchConsumerConfig {
                stream_name: config.inbound_stream.clone(),
                consumer_name: config.consumer_name.clone(),
                filter_subject: config.inbound_subject.clone(),
                batch_size: config.batch_size,
                max_wait: config.batch_wait,
            },
            service,
        )
        .await?;

        let demo_device = match config.demo_device {
            Some(demo) => {
                let method_subject = demo.method_subject()?;
                let inbound =
                    NatsPublisherBuilder::new(connections.inbound.create_publisher_client())
                        .with_tracing(config.publish_tracing.for_component("demo_edge_device"))
                        .with_logging(config.publish_logging.clone())
                        .build();
                info!(
                    device_id = %demo.device_id,
                    method_subject = %method_subject,
                    "demo edge device enabled"
                );
                Some(DemoDevice {
                    config: demo,
                    method_subject,
                    inbound,
                    device_client: connections.device.client().clone(),
                })
            }
            None => None,
        };

        info!(
            stream = %config.inbound_stream,
            consumer = %config.consumer_name,
            expiration_minutes = config.processor.expiration_window.minutes(),
            "Heartbeat worker initialized"
        );

        Ok(Self {
            consumer,
            demo_device,
        })
    }

    /// Named processes for the runner: the batch consumer and, when enabled,
    /// the demo device's responder and heartbeat publisher.
    pub fn into_runner_processes(self) -> Vec<(String, RunnerProcess)> {
        let consumer = self.consumer;
        let mut processes: Vec<(String, RunnerProcess)> = vec![(
            "heartbeat_consumer".to_string(),
            Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await })),
        )];

        if let Some(demo) = self.demo_device {
            let DemoDevice {
                config,
                method_subject,
                inbound,
                device_client,
            } = demo;

            processes.push((
                "demo_device_responder".to_string(),
                Box::new(move |ctx| {
                    Box::pin(async move {
                        run_demo_method_responder(device_client, method_subject, ctx).await
                    })
                }),
            ));
            processes.push((
                "demo_device_publisher".to_string(),
                Box::new(move |ctx| {
                    Box::pin(async move { run_demo_heartbeat_publisher(inbound, config, ctx).await })
                }),
            ));
        }

        processes
    }
}
