use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures reported by the collaborators the heartbeat pipeline talks to
/// (device management and the downstream telemetry bus).
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Device method invocation failed: {0}")]
    DeviceMethodInvocation(#[source] anyhow::Error),

    #[error("Device method {method} on {target} timed out after {timeout_ms}ms")]
    DeviceMethodTimeout {
        target: String,
        method: String,
        timeout_ms: u128,
    },

    #[error("Invalid device method target: {0}")]
    InvalidMethodTarget(String),

    #[error("Invalid device method response: {0}")]
    InvalidMethodResponse(String),

    #[error("Publish error: {0}")]
    PublishError(#[source] anyhow::Error),
}
