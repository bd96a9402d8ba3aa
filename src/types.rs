use std::{fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};

/// One dispatched attempt of a resilient send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Wall-clock time taken right before the request was handed to the transport.
    pub dispatched_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub(crate) fn now(attempt: u32) -> Self {
        Self {
            attempt,
            dispatched_at: Utc::now(),
        }
    }
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}",
            self.attempt,
            self.dispatched_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

/// Produces a fresh request body for every attempt.
///
/// Bodies may be single-use streams, so the same value is never sent twice.
pub type ContentFactory = Arc<dyn Fn() -> reqwest::Body + Send + Sync>;
