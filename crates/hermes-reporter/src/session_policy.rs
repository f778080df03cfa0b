//! Close-or-extend decision for idle report sessions.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use hermes_core::local_hour;
use hermes_types::Report;

use crate::ReporterConfig;

/// Outcome of consulting the policy on an idle session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDecision {
    /// Keep the session open and send an interim notification.
    Extend,
    /// Finish the report and release the context.
    Close,
}

/// Reports roll over once per operational day: an idle session may close
/// only once the local hour has reached the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    cutoff_hour: u32,
    timezone: Tz,
}

impl SessionPolicy {
    pub fn new(cutoff_hour: u32, timezone: Tz) -> Self {
        Self {
            cutoff_hour,
            timezone,
        }
    }

    pub fn from_config(config: &ReporterConfig) -> Self {
        Self::new(config.cutoff_hour, config.timezone)
    }

    /// Decides whether `report` may close at `now`.
    ///
    /// Only the local hour of `now` participates in the decision.
    pub fn decide(&self, _report: &Report, now: DateTime<Utc>) -> SessionDecision {
        if local_hour(now, self.timezone) >= self.cutoff_hour {
            SessionDecision::Close
        } else {
            SessionDecision::Extend
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use hermes_types::Report;

    use super::{SessionDecision, SessionPolicy};

    fn report() -> Report {
        Report::fresh(1, Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap())
    }

    #[test]
    fn unit_decide_switches_exactly_at_cutoff_hour() {
        let policy = SessionPolicy::new(9, chrono_tz::Europe::Moscow);
        // Moscow is UTC+3.
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 5, 59, 59).unwrap();
        let at_cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
        let late_evening = Utc.with_ymd_and_hms(2024, 6, 1, 20, 30, 0).unwrap();

        assert_eq!(policy.decide(&report(), before), SessionDecision::Extend);
        assert_eq!(policy.decide(&report(), at_cutoff), SessionDecision::Close);
        assert_eq!(policy.decide(&report(), late_evening), SessionDecision::Close);
    }

    #[test]
    fn unit_decide_is_deterministic_for_fixed_inputs() {
        let policy = SessionPolicy::new(9, chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 59, 0).unwrap();
        let first = policy.decide(&report(), now);
        for _ in 0..16 {
            assert_eq!(policy.decide(&report(), now), first);
        }
        assert_eq!(first, SessionDecision::Extend);
    }

    #[test]
    fn regression_cutoff_zero_always_closes() {
        let policy = SessionPolicy::new(0, chrono_tz::UTC);
        let midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(policy.decide(&report(), midnight), SessionDecision::Close);
    }

    #[test]
    fn regression_timezone_shifts_local_day_boundary() {
        let policy = SessionPolicy::new(9, chrono_tz::America::New_York);
        // 12:00 UTC is 08:00 in New York during daylight saving time.
        let noon_utc = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(policy.decide(&report(), noon_utc), SessionDecision::Extend);
    }
}
