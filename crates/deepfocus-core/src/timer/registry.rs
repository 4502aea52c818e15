//! Timer factory and recovery queries.
//!
//! A [`TimerRegistry`] is an explicit object owned by the application's
//! session context. Independent registries never share state, which keeps
//! tests isolated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::callbacks::TimerConfig;
use super::clock::{Clock, SystemClock};
use super::engine::{report_config_error, SessionTimer};
use super::record::{session_id_from_key, storage_key, TimerRecord, TimerState};
use super::settings::TimerSettings;
use crate::error::TimerError;
use crate::host::{Host, LocalHost};
use crate::storage::{KeyValueStore, Tab};
use crate::xp::SessionDuration;

/// Capabilities a timer needs from its environment.
#[derive(Clone)]
pub struct TimerEnv {
    pub store: Rc<dyn KeyValueStore>,
    pub host: Rc<dyn Host>,
    pub clock: Rc<dyn Clock>,
    pub settings: TimerSettings,
}

impl TimerEnv {
    pub fn new(
        store: Rc<dyn KeyValueStore>,
        host: Rc<dyn Host>,
        clock: Rc<dyn Clock>,
        settings: TimerSettings,
    ) -> Self {
        Self {
            store,
            host,
            clock,
            settings,
        }
    }

    /// Environment for one tab of a [`TabGroup`](crate::storage::TabGroup).
    pub fn for_tab(tab: &Tab, clock: Rc<dyn Clock>, settings: TimerSettings) -> Self {
        Self {
            store: tab.storage.clone(),
            host: Rc::new(tab.host.clone()),
            clock,
            settings,
        }
    }

    /// Single-tab environment on the system clock.
    pub fn local(store: Rc<dyn KeyValueStore>, host: &LocalHost, settings: TimerSettings) -> Self {
        Self {
            store,
            host: Rc::new(host.clone()),
            clock: Rc::new(SystemClock),
            settings,
        }
    }
}

pub struct TimerRegistry {
    env: TimerEnv,
    timers: RefCell<HashMap<String, SessionTimer>>,
}

impl TimerRegistry {
    pub fn new(env: TimerEnv) -> Self {
        Self {
            env,
            timers: RefCell::new(HashMap::new()),
        }
    }

    pub fn env(&self) -> &TimerEnv {
        &self.env
    }

    /// Create the timer for a session, restoring stored state if any.
    ///
    /// A live timer for the same session in this registry is destroyed first.
    ///
    /// # Errors
    /// Returns (and reports through `on_error`) an error for an unsupported
    /// duration or empty ids.
    pub fn create_timer(&self, mut config: TimerConfig) -> Result<SessionTimer, TimerError> {
        let duration = match validate_config(&config) {
            Ok(duration) => duration,
            Err(err) => {
                report_config_error(&mut config.callbacks, &err);
                return Err(err);
            }
        };

        let previous = self.timers.borrow_mut().remove(&config.session_id);
        if let Some(previous) = previous {
            tracing::debug!(session_id = %config.session_id, "replacing existing timer");
            previous.destroy();
        }

        let session_id = config.session_id.clone();
        let timer = SessionTimer::create(config, duration, &self.env);
        self.timers.borrow_mut().insert(session_id, timer.clone());
        Ok(timer)
    }

    /// Live timer created by this registry.
    pub fn get_timer(&self, session_id: &str) -> Option<SessionTimer> {
        let timers = self.timers.borrow();
        timers
            .get(session_id)
            .filter(|t| !t.is_destroyed())
            .cloned()
    }

    /// Destroy and forget a timer. Returns false if none was registered.
    pub fn destroy_timer(&self, session_id: &str) -> bool {
        let timer = self.timers.borrow_mut().remove(session_id);
        match timer {
            Some(timer) => {
                timer.destroy();
                true
            }
            None => false,
        }
    }

    /// Sessions with a timer in this registry that is not destroyed.
    pub fn active_session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .timers
            .borrow()
            .iter()
            .filter(|(_, t)| !t.is_destroyed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether storage holds a recoverable timer for the session: paused, or
    /// running with time left.
    pub fn has_active_timer(&self, session_id: &str) -> bool {
        let now = self.env.clock.now_ms();
        self.get_stored_timer_data(session_id)
            .map(|record| match record.state {
                TimerState::Paused => true,
                TimerState::Running => record.remaining_at(now) > 0,
                _ => false,
            })
            .unwrap_or(false)
    }

    /// The stored record for a session, if present and decodable.
    pub fn get_stored_timer_data(&self, session_id: &str) -> Option<TimerRecord> {
        let raw = match self.env.store.get(&storage_key(session_id)) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to read stored timer");
                return None;
            }
        };
        match TimerRecord::decode_for(&raw, session_id) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(session_id, error = %e, "stored timer is unusable");
                None
            }
        }
    }

    /// Every decodable timer record in storage.
    pub fn stored_timers(&self) -> Vec<TimerRecord> {
        self.timer_keys()
            .iter()
            .filter_map(|key| session_id_from_key(key))
            .filter_map(|id| self.get_stored_timer_data(id))
            .collect()
    }

    /// Destroy every live timer and remove every stored timer record.
    ///
    /// For logout and cleanup. Returns how many records were removed.
    pub fn clear_all_timers(&self) -> usize {
        let timers: Vec<SessionTimer> = self.timers.borrow_mut().drain().map(|(_, t)| t).collect();
        for timer in timers {
            timer.destroy();
        }

        let mut removed = 0;
        for key in self.timer_keys() {
            match self.env.store.remove(&key) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(key = %key, error = %e, "failed to remove timer record"),
            }
        }
        tracing::info!(removed, "cleared stored timers");
        removed
    }

    fn timer_keys(&self) -> Vec<String> {
        match self.env.store.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|k| session_id_from_key(k).is_some())
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list stored timers");
                Vec::new()
            }
        }
    }
}

fn validate_config(config: &TimerConfig) -> Result<SessionDuration, TimerError> {
    if config.session_id.trim().is_empty() {
        return Err(TimerError::InvalidConfig {
            field: "session_id".into(),
            message: "must not be empty".into(),
        });
    }
    if config.user_id.trim().is_empty() {
        return Err(TimerError::InvalidConfig {
            field: "user_id".into(),
            message: "must not be empty".into(),
        });
    }
    SessionDuration::from_minutes(config.duration_minutes)
        .ok_or(TimerError::UnsupportedDuration(config.duration_minutes))
}
