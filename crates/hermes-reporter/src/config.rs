use std::time::Duration;

use anyhow::Result;
use chrono_tz::Tz;

/// Runtime configuration for report windows.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Quiet period after which an open session consults the policy.
    pub idle_timeout: Duration,
    /// Local hour (0-23) from which an idle session may close for the day.
    pub cutoff_hour: u32,
    pub timezone: Tz,
    /// Append the context display name to artifact names.
    pub include_context_name: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15),
            cutoff_hour: 9,
            timezone: chrono_tz::Europe::Moscow,
            include_context_name: true,
        }
    }
}

impl ReporterConfig {
    /// Validates idle timing and cutoff configuration.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            anyhow::bail!("idle_timeout must be greater than 0");
        }
        if self.cutoff_hour > 23 {
            anyhow::bail!("cutoff_hour must be in 0..=23, got {}", self.cutoff_hour);
        }
        Ok(())
    }
}
