use crate::nats::NatsTracingConfig;
use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider as SdkTracerProvider};

pub const DEFAULT_SERVICE_NAME: &str = "heartbeat-relay";

/// Logging and trace export settings, resolved once at startup.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Reported as `service.version` on exported spans and logs
    pub service_version: String,
    pub otel_endpoint: String,
    pub otel_enabled: bool,
    /// Default filter directive, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Span settings for NATS publishers of this service. Components narrow
    /// it further with [`NatsTracingConfig::for_component`].
    pub fn publish_tracing(&self) -> NatsTracingConfig {
        NatsTracingConfig::new(self.service_name.clone())
    }

    /// Filter used when `RUST_LOG` is unset. Blank levels fall back to info.
    pub fn default_filter(&self) -> &str {
        match self.log_level.trim() {
            "" => "info",
            level => level,
        }
    }
}

pub struct TelemetryProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: LoggerProvider,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_tracing_uses_service_name() {
        let config = TelemetryConfig {
            service_name: "relay-eu".to_string(),
            ..Default::default()
        };

        let tracing = config.publish_tracing().for_component("latency_record_producer");

        assert_eq!(tracing.service_name, "relay-eu");
        assert_eq!(tracing.component.as_deref(), Some("latency_record_producer"));
    }

    #[test]
    fn test_default_filter() {
        let mut config = TelemetryConfig::default();
        assert_eq!(config.default_filter(), "info");

        config.log_level = " heartbeat_worker=debug ".to_string();
        assert_eq!(config.default_filter(), "heartbeat_worker=debug");

        config.log_level = "  ".to_string();
        assert_eq!(config.default_filter(), "info");
    }
}
