//! Backoff schedule for jobs that hit a transient failure
//!
//! Transient failures never exhaust a job. The delay doubles per attempt
//! until it reaches `cap`, and from then on the job is polled at that pace.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first transient failure
    pub base: Duration,
    pub cap: Duration,
    /// Growth per failed attempt
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Default growth, capped at `cap`. A cap below the default base also
    /// lowers the base.
    pub fn capped_at(cap: Duration) -> Self {
        let default = Self::default();
        Self {
            base: default.base.min(cap),
            cap,
            factor: default.factor,
        }
    }

    /// Delay before retrying a job that has already failed `failures` times.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() {
            return self.cap;
        }
        Duration::from_secs_f64(secs.min(self.cap.as_secs_f64()))
    }

    pub fn next_attempt_at(&self, failures: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(failures))
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now + delay
    }
}
