//! # DeepFocus Core Library
//!
//! Core logic for long-form deep-work sessions: a wall-clock anchored session
//! timer that survives reloads, background throttling and several tabs open on
//! the same session, plus the XP rewards earned for finishing (or abandoning)
//! a session. The `deepfocus` CLI is a thin layer over this crate.
//!
//! ## Architecture
//!
//! - **Timer**: [`SessionTimer`] state machine, recomputed from the wall clock
//!   on every host tick and persisted to a [`KeyValueStore`]
//! - **Host**: injected tick, visibility and cross-tab storage notifications
//! - **Storage**: key-value timer records, SQLite session history and TOML
//!   configuration
//! - **XP**: optimistic reward formulas, validated against a remote source
//! - **Session**: [`SessionLifecycle`] ties timers to recorded outcomes
//!
//! ## Key Components
//!
//! - [`TimerRegistry`]: creates timers and answers recovery queries
//! - [`SessionTimer`]: one session's countdown
//! - [`Database`]: timer records and session history
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod host;
pub mod session;
pub mod storage;
pub mod timer;
pub mod xp;

pub use error::{ConfigError, CoreError, RecordError, StorageError, TimerError, XpError};
pub use events::Event;
pub use host::{EventKind, Host, HostEvent, LocalHost, StorageChange};
pub use session::{OutcomeStatus, SessionLifecycle, SessionOutcome, SessionRequest, SessionStore};
pub use storage::{Config, Database, KeyValueStore, MemoryStore, Stats, TabGroup};
pub use timer::{
    Clock, ManualClock, SessionTimer, SystemClock, TimerCallbacks, TimerConfig, TimerEnv,
    TimerRecord, TimerRegistry, TimerSettings, TimerState,
};
pub use xp::{
    interrupted_xp, project_xp, session_xp, RemoteXpSource, SessionDuration, WillpowerLevel,
    XpValidation,
};
