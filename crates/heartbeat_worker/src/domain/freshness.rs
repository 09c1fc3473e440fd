use crate::domain::HeartbeatError;
use common::domain::{HeartbeatMessage, TICKS_PER_MINUTE};

pub const DEFAULT_EXPIRATION_MINUTES: i64 = 5;

/// How old a heartbeat may be before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationWindow {
    minutes: i64,
}

impl Default for ExpirationWindow {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_EXPIRATION_MINUTES)
    }
}

impl ExpirationWindow {
    pub fn from_minutes(minutes: i64) -> Self {
        Self { minutes }
    }

    /// Resolve the configured setting. Absent or non-integer values fall
    /// back to [`DEFAULT_EXPIRATION_MINUTES`].
    pub fn from_setting(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().parse::<i32>()) {
            Some(Ok(minutes)) => Self::from_minutes(i64::from(minutes)),
            Some(Err(_)) => {
                tracing::warn!(
                    value = raw.unwrap_or_default(),
                    default_minutes = DEFAULT_EXPIRATION_MINUTES,
                    "unparseable message expiration setting, using default"
                );
                Self::default()
            }
            None => Self::default(),
        }
    }

    pub fn minutes(&self) -> i64 {
        self.minutes
    }

    pub fn as_ticks(&self) -> i64 {
        self.minutes.saturating_mul(TICKS_PER_MINUTE)
    }
}

/// Reject a heartbeat older than `window` at `now_utc_ticks`.
///
/// Compared at tick resolution: an age equal to the window passes, one tick
/// more fails.
pub fn check_fresh(
    msg: &HeartbeatMessage,
    now_utc_ticks: i64,
    window: ExpirationWindow,
) -> Result<(), HeartbeatError> {
    let age_ticks = now_utc_ticks.saturating_sub(msg.created_at_utc_ticks);

    if age_ticks > window.as_ticks() {
        return Err(HeartbeatError::Expired {
            device_id: msg.device_id.clone(),
            message_id: msg.message_id,
            age_ticks,
            window_ticks: window.as_ticks(),
        });
    }

    Ok(())
}
