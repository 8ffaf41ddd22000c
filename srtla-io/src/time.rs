//! Wall-clock helpers
//!
//! Timeouts, decay periods, and the selector's rehabilitation test all
//! operate on whole wall-clock seconds, so the proxy carries plain UNIX
//! timestamps instead of `Instant`s.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in whole seconds since the UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Gate for tasks that run at most once per period.
///
/// `try_fire` answers whether the period has elapsed since the last firing
/// and stamps the new firing time when it has. A fresh gate fires on its
/// first call.
pub struct PeriodGate {
    period: u64,
    last: u64,
}

impl PeriodGate {
    pub fn new(period: u64) -> Self {
        PeriodGate { period, last: 0 }
    }

    pub fn try_fire(&mut self, now: u64) -> bool {
        if self.last + self.period > now {
            return false;
        }
        self.last = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_secs_is_sane() {
        // Well past 2020-01-01
        assert!(now_secs() > 1_577_836_800);
    }

    #[test]
    fn test_period_gate() {
        let mut gate = PeriodGate::new(3);

        assert!(gate.try_fire(100));
        assert!(!gate.try_fire(101));
        assert!(!gate.try_fire(102));
        assert!(gate.try_fire(103));
        assert!(!gate.try_fire(103));
    }
}
