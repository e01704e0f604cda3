//! Circuit breaker over consecutive execution failures.
//!
//! Two states: closed (normal) and open (admissions blocked). The breaker
//! closes again only after the cooldown has elapsed since it opened
//! (checked lazily by the next validation) or by an explicit reset. State
//! lives under the guard's single lock, so transitions are atomic with the
//! admission checks that consult them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Snapshot of breaker state for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub is_open: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Breaker {
    failure_threshold: u32,
    is_open: bool,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

impl Breaker {
    pub(crate) fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            is_open: false,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            reason: None,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.is_open
    }

    /// Record a failed execution; trips the breaker once the streak
    /// reaches the threshold. Returns true when this call tripped it.
    pub(crate) fn record_failure(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        self.consecutive_failures += 1;
        self.last_failure_at = Some(now);
        warn!(
            "Execution failure #{}: {}",
            self.consecutive_failures, reason
        );

        if !self.is_open && self.consecutive_failures >= self.failure_threshold {
            self.trip(
                format!(
                    "{} consecutive failures (last: {})",
                    self.consecutive_failures, reason
                ),
                now,
            );
            return true;
        }
        false
    }

    /// A successful execution resets the streak.
    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Open unconditionally.
    pub(crate) fn trip(&mut self, reason: String, now: DateTime<Utc>) {
        if self.is_open {
            return;
        }
        warn!("Circuit breaker TRIPPED: {}", reason);
        self.is_open = true;
        self.opened_at = Some(now);
        self.reason = Some(reason);
    }

    /// Close and clear the streak.
    pub(crate) fn reset(&mut self) {
        if self.is_open {
            info!("Circuit breaker reset");
        }
        self.is_open = false;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.reason = None;
    }

    /// Seconds left before the cooldown elapses. None when closed;
    /// Some(0) when the cooldown has passed and the breaker may reset.
    pub(crate) fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown_secs: u64) -> Option<u64> {
        if !self.is_open {
            return None;
        }
        let opened_at = self.opened_at?;
        let elapsed = now.signed_duration_since(opened_at).num_seconds().max(0) as u64;
        Some(cooldown_secs.saturating_sub(elapsed))
    }

    pub(crate) fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }

    pub(crate) fn status(&self) -> BreakerStatus {
        BreakerStatus {
            is_open: self.is_open,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_at,
            opened_at: self.opened_at,
            reason: self.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn trips_at_threshold() {
        let mut breaker = Breaker::new(3);
        let now = Utc::now();

        assert!(!breaker.record_failure("e1", now));
        assert!(!breaker.record_failure("e2", now));
        assert!(!breaker.is_open());
        assert!(breaker.record_failure("e3", now));
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_streak() {
        let mut breaker = Breaker::new(3);
        let now = Utc::now();

        breaker.record_failure("e1", now);
        breaker.record_failure("e2", now);
        breaker.record_success();
        breaker.record_failure("e1", now);
        breaker.record_failure("e2", now);
        assert!(!breaker.is_open());
    }

    #[test]
    fn cooldown_counts_down_from_opened_at() {
        let mut breaker = Breaker::new(1);
        let opened = Utc::now();
        breaker.record_failure("e1", opened);

        let remaining = breaker
            .cooldown_remaining(opened + Duration::seconds(10), 30)
            .unwrap();
        assert_eq!(remaining, 20);

        let elapsed = breaker
            .cooldown_remaining(opened + Duration::seconds(31), 30)
            .unwrap();
        assert_eq!(elapsed, 0);
    }

    #[test]
    fn reset_closes_and_clears() {
        let mut breaker = Breaker::new(1);
        breaker.record_failure("e1", Utc::now());
        assert!(breaker.is_open());

        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.status().consecutive_failures, 0);
        assert!(breaker.status().opened_at.is_none());
    }
}
