//! Persisted timer record and its storage codec.
//!
//! One record per in-progress session lives under [`storage_key`]. Decoding is
//! strict: a record with an unknown version, an unsupported duration or a
//! foreign session id is rejected as a whole, and callers treat it as absent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::xp::SessionDuration;

/// Prefix shared by every persisted timer record key.
pub const STORAGE_KEY_PREFIX: &str = "deepfocus_timer_";

/// Current codec version.
pub const RECORD_VERSION: u32 = 1;

/// Storage key for a session's timer record.
pub fn storage_key(session_id: &str) -> String {
    format!("{STORAGE_KEY_PREFIX}{session_id}")
}

/// Session id encoded in a storage key, if the key belongs to a timer record.
pub fn session_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(STORAGE_KEY_PREFIX).filter(|id| !id.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    Completed,
    Interrupted,
}

impl TimerState {
    /// Completed and interrupted sessions accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted)
    }

    /// Running or paused: a session worth recovering after a reload.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Countdown state for one session, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    #[serde(rename = "v")]
    pub version: u32,
    pub session_id: String,
    /// When the session first started running (epoch milliseconds).
    pub start_time: u64,
    pub duration_minutes: u32,
    /// Cache of the last computed remaining time.
    pub remaining_seconds: u32,
    pub state: TimerState,
    /// Epoch milliseconds of the most recent state mutation.
    pub last_tick: u64,
    /// Time excluded from elapsed accounting (pauses and long absences).
    pub paused_time_ms: u64,
    pub visibility_changes: u32,
}

impl TimerRecord {
    /// Fresh idle record for a session.
    pub fn new(session_id: impl Into<String>, duration: SessionDuration, now_ms: u64) -> Self {
        Self {
            version: RECORD_VERSION,
            session_id: session_id.into(),
            start_time: now_ms,
            duration_minutes: duration.minutes(),
            remaining_seconds: duration.seconds(),
            state: TimerState::Idle,
            last_tick: now_ms,
            paused_time_ms: 0,
            visibility_changes: 0,
        }
    }

    pub fn duration(&self) -> Option<SessionDuration> {
        SessionDuration::from_minutes(self.duration_minutes)
    }

    pub fn total_seconds(&self) -> u32 {
        self.duration_minutes * 60
    }

    /// Milliseconds counted against the session at `now_ms`.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms
            .saturating_sub(self.start_time)
            .saturating_sub(self.paused_time_ms)
    }

    /// Remaining whole seconds at `now_ms`.
    ///
    /// Running records are computed from the wall clock; every other state
    /// returns the frozen cache.
    pub fn remaining_at(&self, now_ms: u64) -> u32 {
        match self.state {
            TimerState::Running => {
                let elapsed_secs = self.elapsed_ms(now_ms) / 1000;
                u64::from(self.total_seconds()).saturating_sub(elapsed_secs) as u32
            }
            _ => self.remaining_seconds,
        }
    }

    /// 0.0 .. 1.0 progress for a remaining value.
    pub fn progress_for(&self, remaining_seconds: u32) -> f64 {
        let total = self.total_seconds();
        if total == 0 {
            return 0.0;
        }
        (1.0 - f64::from(remaining_seconds) / f64::from(total)).clamp(0.0, 1.0)
    }

    pub fn storage_key(&self) -> String {
        storage_key(&self.session_id)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode and validate a stored record.
    pub fn decode(raw: &str) -> Result<Self, RecordError> {
        let record: TimerRecord =
            serde_json::from_str(raw).map_err(|e| RecordError::Malformed(e.to_string()))?;
        record.check()?;
        Ok(record)
    }

    /// Decode a record that must belong to `session_id`.
    pub fn decode_for(raw: &str, session_id: &str) -> Result<Self, RecordError> {
        let record = Self::decode(raw)?;
        if record.session_id != session_id {
            return Err(RecordError::SessionMismatch {
                found: record.session_id,
                expected: session_id.to_string(),
            });
        }
        Ok(record)
    }

    fn check(&self) -> Result<(), RecordError> {
        if self.version != RECORD_VERSION {
            return Err(RecordError::Version {
                found: self.version,
                expected: RECORD_VERSION,
            });
        }
        if self.session_id.is_empty() {
            return Err(RecordError::InvalidField {
                field: "sessionId",
                message: "empty".into(),
            });
        }
        if self.duration().is_none() {
            return Err(RecordError::InvalidField {
                field: "durationMinutes",
                message: format!("unsupported duration {}", self.duration_minutes),
            });
        }
        if self.remaining_seconds > self.total_seconds() {
            return Err(RecordError::InvalidField {
                field: "remainingSeconds",
                message: format!(
                    "{} exceeds duration of {}s",
                    self.remaining_seconds,
                    self.total_seconds()
                ),
            });
        }
        if self.last_tick < self.start_time {
            return Err(RecordError::InvalidField {
                field: "lastTick",
                message: "precedes startTime".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(now: u64) -> TimerRecord {
        let mut r = TimerRecord::new("sess-1", SessionDuration::Sixty, now);
        r.state = TimerState::Running;
        r
    }

    #[test]
    fn storage_key_round_trip() {
        let key = storage_key("abc");
        assert_eq!(key, "deepfocus_timer_abc");
        assert_eq!(session_id_from_key(&key), Some("abc"));
        assert_eq!(session_id_from_key("other_abc"), None);
        assert_eq!(session_id_from_key(STORAGE_KEY_PREFIX), None);
    }

    #[test]
    fn remaining_is_wall_clock_anchored() {
        let r = running(1_000);
        assert_eq!(r.remaining_at(1_000), 3600);
        assert_eq!(r.remaining_at(1_999), 3600);
        assert_eq!(r.remaining_at(2_000), 3599);
        assert_eq!(r.remaining_at(1_000 + 3_600_000), 0);
        assert_eq!(r.remaining_at(1_000 + 9_000_000), 0);
    }

    #[test]
    fn paused_time_is_excluded() {
        let mut r = running(0);
        r.paused_time_ms = 600_000;
        assert_eq!(r.remaining_at(600_000), 3600);
    }

    #[test]
    fn paused_record_is_frozen() {
        let mut r = running(0);
        r.state = TimerState::Paused;
        r.remaining_seconds = 1234;
        assert_eq!(r.remaining_at(99_999_999), 1234);
    }

    #[test]
    fn json_shape_uses_camel_case() {
        let json = running(5).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["sessionId"], "sess-1");
        assert_eq!(value["durationMinutes"], 60);
        assert_eq!(value["pausedTimeMs"], 0);
        assert_eq!(value["state"], "running");
        assert_eq!(value["v"], 1);
    }

    #[test]
    fn decode_fails_closed() {
        assert!(matches!(
            TimerRecord::decode("{not json"),
            Err(RecordError::Malformed(_))
        ));

        // Missing fields are not filled in.
        assert!(matches!(
            TimerRecord::decode(r#"{"v":1,"sessionId":"s","state":"running"}"#),
            Err(RecordError::Malformed(_))
        ));

        let mut r = running(0);
        r.version = 0;
        assert!(matches!(
            TimerRecord::decode(&r.encode().unwrap()),
            Err(RecordError::Version { found: 0, .. })
        ));

        let mut r = running(0);
        r.duration_minutes = 45;
        assert!(matches!(
            TimerRecord::decode(&r.encode().unwrap()),
            Err(RecordError::InvalidField { field: "durationMinutes", .. })
        ));

        let raw = running(0).encode().unwrap().replace("\"running\"", "\"sleeping\"");
        assert!(TimerRecord::decode(&raw).is_err());
    }

    #[test]
    fn decode_for_checks_session() {
        let raw = running(0).encode().unwrap();
        assert!(TimerRecord::decode_for(&raw, "sess-1").is_ok());
        assert!(matches!(
            TimerRecord::decode_for(&raw, "sess-2"),
            Err(RecordError::SessionMismatch { .. })
        ));
    }
}
