use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for the timer engine (the `[timer]` config section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    /// Nominal tick cadence.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Re-persist a running record at least this often.
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,
    /// Cached vs recomputed remaining difference that gets logged as drift.
    #[serde(default = "default_drift_tolerance_secs")]
    pub drift_tolerance_secs: u32,
    /// Background episodes longer than this are excluded from elapsed time.
    #[serde(default = "default_visibility_grace_secs")]
    pub visibility_grace_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_persist_interval_ms() -> u64 {
    5000
}
fn default_drift_tolerance_secs() -> u32 {
    2
}
fn default_visibility_grace_secs() -> u64 {
    30
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            persist_interval_ms: default_persist_interval_ms(),
            drift_tolerance_secs: default_drift_tolerance_secs(),
            visibility_grace_secs: default_visibility_grace_secs(),
        }
    }
}

impl TimerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn visibility_grace_ms(&self) -> u64 {
        self.visibility_grace_secs * 1000
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 || self.tick_interval_ms > 60_000 {
            return Err(ConfigError::InvalidValue {
                key: "timer.tick_interval_ms".into(),
                message: format!("{} is outside 1..=60000", self.tick_interval_ms),
            });
        }
        if self.persist_interval_ms < self.tick_interval_ms {
            return Err(ConfigError::InvalidValue {
                key: "timer.persist_interval_ms".into(),
                message: "must not be shorter than the tick interval".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = TimerSettings::default();
        assert_eq!(s.tick_interval(), Duration::from_secs(1));
        assert_eq!(s.visibility_grace_ms(), 30_000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn rejects_zero_tick() {
        let s = TimerSettings {
            tick_interval_ms: 0,
            ..TimerSettings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let s: TimerSettings = toml::from_str("visibility_grace_secs = 45").unwrap();
        assert_eq!(s.visibility_grace_secs, 45);
        assert_eq!(s.persist_interval_ms, 5000);
    }
}
