pub mod domain;
pub mod nats;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceMethodInvoker;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTelemetryPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockNatsRequester;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
