//! Session lifecycle orchestration.
//!
//! Maps user intents (start, pause, resume, interrupt, complete) onto the
//! session timer, computes the optimistic XP and hands terminal outcomes to a
//! [`SessionStore`]. The timer itself never writes session history.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::events::timestamp;
use crate::timer::{Clock, SessionTimer, TimerCallbacks, TimerConfig, TimerRegistry, TimerState};
use crate::xp::{interrupted_xp, session_xp, SessionDuration, WillpowerLevel};

/// What the user committed to when starting a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
    pub user_id: String,
    pub duration: SessionDuration,
    pub willpower: WillpowerLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Interrupted,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::str::FromStr for OutcomeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(Self::Completed),
            "interrupted" => Ok(Self::Interrupted),
            other => Err(CoreError::Custom(format!("unknown outcome status: {other}"))),
        }
    }
}

/// Terminal record of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub user_id: String,
    pub status: OutcomeStatus,
    pub duration_minutes: u32,
    pub willpower: WillpowerLevel,
    pub xp: u32,
    pub ended_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn completed(req: &SessionRequest, ended_at: DateTime<Utc>) -> Self {
        Self::build(req, OutcomeStatus::Completed, session_xp(req.duration, req.willpower), ended_at)
    }

    pub fn interrupted(req: &SessionRequest, ended_at: DateTime<Utc>) -> Self {
        Self::build(req, OutcomeStatus::Interrupted, interrupted_xp(), ended_at)
    }

    fn build(req: &SessionRequest, status: OutcomeStatus, xp: u32, ended_at: DateTime<Utc>) -> Self {
        Self {
            session_id: req.session_id.clone(),
            user_id: req.user_id.clone(),
            status,
            duration_minutes: req.duration.minutes(),
            willpower: req.willpower,
            xp,
            ended_at,
        }
    }
}

/// System of record for sessions.
pub trait SessionStore {
    /// Store the request for a new session. An existing request for the same
    /// session id is kept.
    fn save_request(&self, req: &SessionRequest) -> Result<()>;

    fn request(&self, session_id: &str) -> Result<Option<SessionRequest>>;

    /// Record a terminal outcome. Returns false if the session already had one;
    /// the first write wins so racing tabs cannot count a session twice.
    fn record_outcome(&self, outcome: &SessionOutcome) -> Result<bool>;

    fn outcome(&self, session_id: &str) -> Result<Option<SessionOutcome>>;
}

pub struct SessionLifecycle {
    registry: Rc<TimerRegistry>,
    store: Rc<dyn SessionStore>,
    requests: RefCell<HashMap<String, SessionRequest>>,
}

impl SessionLifecycle {
    pub fn new(registry: Rc<TimerRegistry>, store: Rc<dyn SessionStore>) -> Self {
        Self {
            registry,
            store,
            requests: RefCell::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    /// XP shown before the session starts.
    pub fn preview_xp(req: &SessionRequest) -> u32 {
        session_xp(req.duration, req.willpower)
    }

    /// Record the request and start its timer.
    ///
    /// A session left running is recovered as is; a paused one continues.
    /// The first request recorded for a session id stays its commitment.
    pub fn start_session(
        &self,
        req: SessionRequest,
        callbacks: TimerCallbacks,
    ) -> Result<SessionTimer> {
        if let Some(outcome) = self.store.outcome(&req.session_id)? {
            return Err(CoreError::Custom(format!(
                "session {} already ended ({})",
                req.session_id,
                outcome.status.as_str()
            )));
        }
        let req = match self.store.request(&req.session_id)? {
            Some(stored) => {
                if stored != req {
                    tracing::warn!(
                        session_id = %req.session_id,
                        "session already started with different settings; keeping the original"
                    );
                }
                stored
            }
            None => {
                self.store.save_request(&req)?;
                req
            }
        };
        let timer = self.attach(req, callbacks)?;
        if matches!(timer.state(), TimerState::Idle | TimerState::Paused) {
            timer.start()?;
        }
        Ok(timer)
    }

    /// Re-attach to a session started earlier, e.g. after a reload.
    ///
    /// Recovers a stored running or paused timer; a timer that ran out while
    /// nobody was watching completes and is recorded here.
    pub fn attach_session(&self, session_id: &str, callbacks: TimerCallbacks) -> Result<SessionTimer> {
        if let Some(timer) = self.registry.get_timer(session_id) {
            return Ok(timer);
        }
        let req = self
            .store
            .request(session_id)?
            .ok_or_else(|| CoreError::Custom(format!("unknown session {session_id}")))?;
        self.attach(req, callbacks)
    }

    pub fn pause_session(&self, session_id: &str) -> Result<()> {
        self.timer(session_id)?.pause()?;
        Ok(())
    }

    pub fn resume_session(&self, session_id: &str) -> Result<()> {
        self.timer(session_id)?.resume()?;
        Ok(())
    }

    /// Complete a running session now and return its recorded outcome.
    pub fn complete_session(&self, session_id: &str) -> Result<SessionOutcome> {
        let timer = self.timer(session_id)?;
        timer.complete()?;
        self.registry.destroy_timer(session_id);
        self.store
            .outcome(session_id)?
            .ok_or_else(|| CoreError::Custom(format!("no outcome recorded for {session_id}")))
    }

    /// End a session early with the flat interruption reward.
    pub fn interrupt_session(&self, session_id: &str) -> Result<SessionOutcome> {
        let timer = self.timer(session_id)?;
        let req = self.request_for(session_id)?;
        timer.interrupt()?;
        self.registry.destroy_timer(session_id);

        let outcome = SessionOutcome::interrupted(&req, self.now());
        if !self.store.record_outcome(&outcome)? {
            tracing::info!(session_id, "interruption already recorded");
        }
        Ok(outcome)
    }

    fn attach(&self, req: SessionRequest, callbacks: TimerCallbacks) -> Result<SessionTimer> {
        let store = Rc::clone(&self.store);
        let clock = Rc::clone(&self.registry.env().clock);
        let completed = req.clone();
        let callbacks = callbacks.before_complete(move || {
            record_completion(store.as_ref(), clock.as_ref(), &completed);
        });

        let config = TimerConfig::new(
            req.session_id.clone(),
            req.user_id.clone(),
            req.duration.minutes(),
        )
        .with_callbacks(callbacks);
        self.requests
            .borrow_mut()
            .insert(req.session_id.clone(), req);
        Ok(self.registry.create_timer(config)?)
    }

    fn timer(&self, session_id: &str) -> Result<SessionTimer> {
        match self.registry.get_timer(session_id) {
            Some(timer) => Ok(timer),
            None => self.attach_session(session_id, TimerCallbacks::default()),
        }
    }

    fn request_for(&self, session_id: &str) -> Result<SessionRequest> {
        if let Some(req) = self.requests.borrow().get(session_id) {
            return Ok(req.clone());
        }
        self.store
            .request(session_id)?
            .ok_or_else(|| CoreError::Custom(format!("unknown session {session_id}")))
    }

    fn now(&self) -> DateTime<Utc> {
        timestamp(self.registry.env().clock.now_ms())
    }
}

fn record_completion(store: &dyn SessionStore, clock: &dyn Clock, req: &SessionRequest) {
    let outcome = SessionOutcome::completed(req, timestamp(clock.now_ms()));
    match store.record_outcome(&outcome) {
        Ok(true) => {
            tracing::info!(session_id = %req.session_id, xp = outcome.xp, "session completion recorded")
        }
        Ok(false) => tracing::info!(session_id = %req.session_id, "completion already recorded"),
        Err(e) => tracing::error!(session_id = %req.session_id, error = %e, "failed to record completion"),
    }
}
