mod config;

use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use heartbeat_runner::Runner;
use heartbeat_worker::{
    DemoDeviceConfig, HeartbeatProcessorConfig, HeartbeatWorker, HeartbeatWorkerConfig,
    HeartbeatWorkerConnections,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_config = config.telemetry_config();
    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&telemetry_config) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting heartbeat-relay service"
    );
    debug!("Configuration: {:?}", config);

    let connections = match connect_nats(&config).await {
        Ok(connections) => connections,
        Err(e) => {
            error!("Failed to initialize NATS: {:#}", e);
            std::process::exit(1);
        }
    };

    let worker = match HeartbeatWorker::new(
        HeartbeatWorkerConnections {
            inbound: &connections.inbound,
            device: &connections.device,
            telemetry: &connections.telemetry,
        },
        build_worker_config(&config, &telemetry_config),
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize heartbeat worker: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer(move || {
            Box::pin(async move {
                info!("Running cleanup tasks...");
                connections.close().await;

                // Flush pending traces and logs
                shutdown_telemetry(telemetry_providers);

                info!("Cleanup complete");
                Ok(())
            })
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

/// The three logical NATS endpoints. Endpoints sharing a URL share one
/// connection.
struct NatsConnections {
    inbound: Arc<NatsClient>,
    device: Arc<NatsClient>,
    telemetry: Arc<NatsClient>,
}

impl NatsConnections {
    async fn close(self) {
        let mut distinct: Vec<Arc<NatsClient>> = Vec::new();
        for client in [self.inbound, self.device, self.telemetry] {
            if !distinct.iter().any(|seen| Arc::ptr_eq(seen, &client)) {
                distinct.push(client);
            }
        }

        for client in distinct {
            if let Ok(client) = Arc::try_unwrap(client) {
                client.close().await;
            }
        }
    }
}

async fn connect_nats(config: &ServiceConfig) -> anyhow::Result<NatsConnections> {
    let timeout = Duration::from_secs(config.startup_timeout_secs);

    info!("Initializing NATS...");
    let inbound = Arc::new(NatsClient::connect(&config.nats_url, timeout).await?);

    let device = if config.device_nats_url() == config.nats_url {
        Arc::clone(&inbound)
    } else {
        Arc::new(NatsClient::connect(config.device_nats_url(), timeout).await?)
    };

    let telemetry = if config.telemetry_nats_url() == config.nats_url {
        Arc::clone(&inbound)
    } else if config.telemetry_nats_url() == config.device_nats_url() {
        Arc::clone(&device)
    } else {
        Arc::new(NatsClient::connect(config.telemetry_nats_url(), timeout).await?)
    };

    inbound
        .ensure_stream(&config.inbound_stream, "Edge device heartbeats")
        .await?;
    telemetry
        .ensure_stream(&config.telemetry_stream, "Edge heartbeat latency records")
        .await?;

    Ok(NatsConnections {
        inbound,
        device,
        telemetry,
    })
}

fn build_worker_config(
    config: &ServiceConfig,
    telemetry: &TelemetryConfig,
) -> HeartbeatWorkerConfig {
    let demo_device = config.demo_device_enabled.then(|| DemoDeviceConfig {
        device_id: config.demo_device_id.clone(),
        module_id: config.demo_module_id.clone(),
        heartbeat_subject: format!("{}.{}", config.inbound_stream, config.demo_device_id),
        method_subject_prefix: config.device_method_subject_prefix.clone(),
        interval: Duration::from_secs(config.demo_heartbeat_interval_secs),
    });

    HeartbeatWorkerConfig {
        inbound_stream: config.inbound_stream.clone(),
        inbound_subject: config.inbound_subject.clone(),
        consumer_name: config.inbound_consumer_name.clone(),
        batch_size: config.batch_size,
        batch_wait: Duration::from_secs(config.batch_wait_secs),
        failure_policy: config.batch_failure_policy(),
        processor: HeartbeatProcessorConfig {
            expiration_window: config.expiration_window(),
        },
        ack_status_policy: config.ack_status_policy(),
        device_method_subject_prefix: config.device_method_subject_prefix.clone(),
        device_method_timeout: Duration::from_secs(config.device_method_timeout_secs),
        telemetry_subject: config.telemetry_subject.clone(),
        publish_tracing: telemetry.publish_tracing(),
        publish_logging: config.publish_logging(),
        demo_device,
    }
}
