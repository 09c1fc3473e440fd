use common::domain::{DomainError, TICKS_PER_MILLISECOND};
use thiserror::Error;

/// Render ticks as milliseconds, keeping any sub-millisecond remainder.
pub(crate) fn ticks_as_millis(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let ticks = ticks.unsigned_abs();
    let per_ms = TICKS_PER_MILLISECOND.unsigned_abs();
    let (millis, rest) = (ticks / per_ms, ticks % per_ms);

    if rest == 0 {
        format!("{sign}{millis}")
    } else {
        let fraction = format!("{rest:04}");
        format!("{sign}{millis}.{}", fraction.trim_end_matches('0'))
    }
}

/// Why a single heartbeat did not make it through the pipeline.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("failed to decode heartbeat: {reason}")]
    Decode { reason: String, raw_payload: String },

    #[error(
        "heartbeat {message_id} from {device_id} expired: age {}ms exceeds window {}ms",
        ticks_as_millis(*.age_ticks),
        ticks_as_millis(*.window_ticks)
    )]
    Expired {
        device_id: String,
        message_id: i64,
        age_ticks: i64,
        window_ticks: i64,
    },

    #[error("failed to acknowledge heartbeat {message_id} on device {device_id}: {source}")]
    Ack {
        device_id: String,
        message_id: i64,
        #[source]
        source: AckFailure,
    },

    #[error("failed to emit latency record for heartbeat {message_id} from {device_id}: {source}")]
    Emit {
        device_id: String,
        message_id: i64,
        #[source]
        source: EmitFailure,
    },
}

impl HeartbeatError {
    pub fn kind(&self) -> &'static str {
        match self {
            HeartbeatError::Decode { .. } => "decode",
            HeartbeatError::Expired { .. } => "expired",
            HeartbeatError::Ack { .. } => "ack",
            HeartbeatError::Emit { .. } => "emit",
        }
    }

    /// Whether redelivering the same heartbeat could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            HeartbeatError::Decode { .. } | HeartbeatError::Expired { .. } => false,
            HeartbeatError::Ack { source, .. } => !matches!(
                source,
                AckFailure::Encode(_) | AckFailure::UnexpectedStatus { .. }
            ),
            HeartbeatError::Emit { source, .. } => matches!(source, EmitFailure::Publish(_)),
        }
    }
}

#[derive(Debug, Error)]
pub enum AckFailure {
    #[error("ack payload encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Invocation(#[from] DomainError),

    #[error("device answered with status {status_code}")]
    UnexpectedStatus { status_code: i32 },
}

#[derive(Debug, Error)]
pub enum EmitFailure {
    #[error("latency record serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Publish(#[from] DomainError),
}

/// Batch-level result handed back to the host.
///
/// One failure is surfaced as-is so its type and cause stay visible to
/// dead-lettering; two or more are wrapped together in encounter order.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Single(HeartbeatError),

    #[error("{} heartbeats in the batch failed", .0.len())]
    Aggregate(Vec<HeartbeatError>),
}

impl BatchError {
    /// `None` when nothing failed.
    pub fn from_failures(mut failures: Vec<HeartbeatError>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(BatchError::Single),
            _ => Some(BatchError::Aggregate(failures)),
        }
    }

    pub fn errors(&self) -> &[HeartbeatError] {
        match self {
            BatchError::Single(error) => std::slice::from_ref(error),
            BatchError::Aggregate(errors) => errors,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.errors().len()
    }

    pub fn shape(&self) -> &'static str {
        match self {
            BatchError::Single(_) => "single",
            BatchError::Aggregate(_) => "aggregate",
        }
    }
}
