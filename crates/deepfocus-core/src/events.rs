use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::TimerState;

/// Every state change of a session timer produces an Event.
/// The CLI prints them; UIs receive them through `on_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        session_id: String,
        duration_minutes: u32,
        at: DateTime<Utc>,
    },
    TimerPaused {
        session_id: String,
        remaining_secs: u32,
        at: DateTime<Utc>,
    },
    TimerResumed {
        session_id: String,
        remaining_secs: u32,
        paused_for_ms: u64,
        at: DateTime<Utc>,
    },
    TimerCompleted {
        session_id: String,
        /// Counted time, excluding pauses and long absences.
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    TimerInterrupted {
        session_id: String,
        remaining_secs: u32,
        at: DateTime<Utc>,
    },
    /// A running or paused timer was restored from storage.
    TimerRecovered {
        session_id: String,
        state: TimerState,
        remaining_secs: u32,
        at: DateTime<Utc>,
    },
    /// Cached remaining time disagreed with the wall clock; the wall clock won.
    DriftCorrected {
        session_id: String,
        cached_secs: u32,
        actual_secs: u32,
        at: DateTime<Utc>,
    },
    VisibilityChanged {
        session_id: String,
        visible: bool,
        at: DateTime<Utc>,
    },
    /// A long background episode was excluded from elapsed time.
    AbsenceExcluded {
        session_id: String,
        absence_ms: u64,
        at: DateTime<Utc>,
    },
    /// State adopted from a newer record written by another tab.
    Synced {
        session_id: String,
        state: TimerState,
        remote_last_tick: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        session_id: String,
        state: TimerState,
        duration_minutes: u32,
        difficulty: String,
        remaining_secs: u32,
        progress: f64,
        paused_time_ms: u64,
        visibility_changes: u32,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn session_id(&self) -> &str {
        match self {
            Event::TimerStarted { session_id, .. }
            | Event::TimerPaused { session_id, .. }
            | Event::TimerResumed { session_id, .. }
            | Event::TimerCompleted { session_id, .. }
            | Event::TimerInterrupted { session_id, .. }
            | Event::TimerRecovered { session_id, .. }
            | Event::DriftCorrected { session_id, .. }
            | Event::VisibilityChanged { session_id, .. }
            | Event::AbsenceExcluded { session_id, .. }
            | Event::Synced { session_id, .. }
            | Event::StateSnapshot { session_id, .. } => session_id,
        }
    }
}

/// Epoch milliseconds as a UTC timestamp.
pub(crate) fn timestamp(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}
