use common::nats::NatsPublishLoggingLayer;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use heartbeat_worker::{AckStatusPolicy, BatchFailurePolicy, ExpirationWindow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Telemetry configuration
    #[serde(default)]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS configuration
    /// Ingestion bus; also used for the other connections unless overridden
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Device management endpoint
    #[serde(default)]
    pub device_nats_url: Option<String>,

    /// Downstream telemetry bus
    #[serde(default)]
    pub telemetry_nats_url: Option<String>,

    #[serde(default = "default_inbound_stream")]
    pub inbound_stream: String,

    /// Subject filter for the heartbeat consumer
    #[serde(default = "default_inbound_subject")]
    pub inbound_subject: String,

    #[serde(default = "default_inbound_consumer_name")]
    pub inbound_consumer_name: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_batch_wait_secs")]
    pub batch_wait_secs: u64,

    /// Nak a batch with failed heartbeats instead of acking it
    #[serde(default)]
    pub nak_failed_batches: bool,

    // Pipeline configuration
    /// Kept raw: absent or non-integer values mean 5 minutes
    #[serde(default)]
    pub message_expiration_minutes: Option<String>,

    /// Fail heartbeats whose ack is answered with a non-200 status
    #[serde(default)]
    pub ack_reject_non_success_status: bool,

    #[serde(default = "default_device_method_subject_prefix")]
    pub device_method_subject_prefix: String,

    #[serde(default = "default_device_method_timeout_secs")]
    pub device_method_timeout_secs: u64,

    #[serde(default = "default_telemetry_stream")]
    pub telemetry_stream: String,

    #[serde(default = "default_telemetry_subject")]
    pub telemetry_subject: String,

    /// Publishes slower than this are logged at warn
    #[serde(default = "default_publish_slow_threshold_ms")]
    pub publish_slow_threshold_ms: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Demo edge device
    #[serde(default)]
    pub demo_device_enabled: bool,

    #[serde(default = "default_demo_device_id")]
    pub demo_device_id: String,

    #[serde(default)]
    pub demo_module_id: String,

    #[serde(default = "default_demo_heartbeat_interval_secs")]
    pub demo_heartbeat_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "heartbeat-relay".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_inbound_stream() -> String {
    "heartbeats".to_string()
}

fn default_inbound_subject() -> String {
    "heartbeats.>".to_string()
}

fn default_inbound_consumer_name() -> String {
    "heartbeat-relay".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_batch_wait_secs() -> u64 {
    5
}

fn default_device_method_subject_prefix() -> String {
    "devices.methods".to_string()
}

fn default_device_method_timeout_secs() -> u64 {
    30
}

fn default_telemetry_stream() -> String {
    "heartbeat_latency".to_string()
}

fn default_telemetry_subject() -> String {
    "heartbeat_latency.records".to_string()
}

fn default_publish_slow_threshold_ms() -> u64 {
    500
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_demo_device_id() -> String {
    "demo-edge-device".to_string()
}

fn default_demo_heartbeat_interval_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("HEARTBEAT"))
            .build()?
            .try_deserialize()
    }

    pub fn device_nats_url(&self) -> &str {
        self.device_nats_url.as_deref().unwrap_or(&self.nats_url)
    }

    pub fn telemetry_nats_url(&self) -> &str {
        self.telemetry_nats_url.as_deref().unwrap_or(&self.nats_url)
    }

    pub fn expiration_window(&self) -> ExpirationWindow {
        ExpirationWindow::from_setting(self.message_expiration_minutes.as_deref())
    }

    pub fn ack_status_policy(&self) -> AckStatusPolicy {
        AckStatusPolicy::from_reject_non_success(self.ack_reject_non_success_status)
    }

    pub fn batch_failure_policy(&self) -> BatchFailurePolicy {
        BatchFailurePolicy::from_nak_failed_batches(self.nak_failed_batches)
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
        }
    }

    pub fn publish_logging(&self) -> NatsPublishLoggingLayer {
        NatsPublishLoggingLayer::new()
            .with_slow_publish_threshold(Duration::from_millis(self.publish_slow_threshold_ms))
    }
}
