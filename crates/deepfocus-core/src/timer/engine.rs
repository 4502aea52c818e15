//! Session timer engine.
//!
//! The engine is wall-clock anchored: remaining time is always recomputed as
//! `duration - (now - startTime - pausedTimeMs)`. The host's periodic tick only
//! triggers that recomputation, so scheduler jitter and throttling never
//! accumulate into drift.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running <-> Paused
//! Running -> Completed            (remaining reaches zero)
//! Running | Paused -> Interrupted (explicit)
//! ```
//!
//! Completed and Interrupted are terminal. Their stored record is removed.
//!
//! ## Usage
//!
//! ```ignore
//! let timer = registry.create_timer(TimerConfig::new("sess-1", "user-1", 90))?;
//! timer.start()?;
//! // host delivers ticks, visibility and storage events from here on
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use super::callbacks::{Notice, TimerCallbacks, TimerConfig};
use super::clock::Clock;
use super::record::{storage_key, TimerRecord, TimerState};
use super::registry::TimerEnv;
use super::settings::TimerSettings;
use crate::error::TimerError;
use crate::events::{timestamp, Event};
use crate::host::{EventHandler, EventKind, Host, HostEvent, StorageChange, SubscriptionToken};
use crate::storage::KeyValueStore;
use crate::xp::SessionDuration;

struct Shared {
    core: RefCell<TimerCore>,
    callbacks: RefCell<TimerCallbacks>,
    pending: RefCell<VecDeque<Notice>>,
}

/// Countdown for one session.
///
/// A cheap handle: clones refer to the same timer. All methods are
/// synchronous; notifications are delivered through [`TimerCallbacks`].
#[derive(Clone)]
pub struct SessionTimer {
    shared: Rc<Shared>,
}

impl std::fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.core.borrow();
        f.debug_struct("SessionTimer")
            .field("session_id", &core.record.session_id)
            .field("state", &core.record.state)
            .field("destroyed", &core.destroyed)
            .finish()
    }
}

struct TimerCore {
    record: TimerRecord,
    duration: SessionDuration,
    user_id: String,
    key: String,
    store: Rc<dyn KeyValueStore>,
    host: Rc<dyn Host>,
    clock: Rc<dyn Clock>,
    settings: TimerSettings,
    this: Weak<Shared>,
    tick_sub: Option<SubscriptionToken>,
    subs: Vec<SubscriptionToken>,
    /// When the host last went hidden; `None` while visible.
    hidden_since: Option<u64>,
    last_persist_ms: u64,
    completion_fired: bool,
    destroyed: bool,
    notices: Vec<Notice>,
}

impl SessionTimer {
    /// Build a timer, subscribe it to the host and restore any stored state.
    ///
    /// The config must already be validated.
    pub(crate) fn create(
        config: TimerConfig,
        duration: SessionDuration,
        env: &TimerEnv,
    ) -> SessionTimer {
        let TimerConfig {
            session_id,
            user_id,
            callbacks,
            ..
        } = config;
        let now = env.clock.now_ms();
        let key = storage_key(&session_id);

        let shared = Rc::new_cyclic(|this| Shared {
            core: RefCell::new(TimerCore {
                record: TimerRecord::new(session_id, duration, now),
                duration,
                user_id,
                key,
                store: Rc::clone(&env.store),
                host: Rc::clone(&env.host),
                clock: Rc::clone(&env.clock),
                settings: env.settings.clone(),
                this: this.clone(),
                tick_sub: None,
                subs: Vec::new(),
                hidden_since: (!env.host.is_visible()).then_some(now),
                last_persist_ms: now,
                completion_fired: false,
                destroyed: false,
                notices: Vec::new(),
            }),
            callbacks: RefCell::new(callbacks),
            pending: RefCell::new(VecDeque::new()),
        });

        let timer = SessionTimer { shared };
        timer.with_core(|core| {
            core.subscribe_host_events();
            core.restore();
        });
        timer
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn session_id(&self) -> String {
        self.shared.core.borrow().record.session_id.clone()
    }

    pub fn user_id(&self) -> String {
        self.shared.core.borrow().user_id.clone()
    }

    pub fn state(&self) -> TimerState {
        self.shared.core.borrow().record.state
    }

    pub fn duration(&self) -> SessionDuration {
        self.shared.core.borrow().duration
    }

    /// Cosmetic label for the committed duration.
    pub fn difficulty_label(&self) -> &'static str {
        self.duration().difficulty_label()
    }

    /// Remaining whole seconds, recomputed from the wall clock.
    pub fn remaining_seconds(&self) -> u32 {
        let core = self.shared.core.borrow();
        core.record.remaining_at(core.clock.now_ms())
    }

    /// 0.0 .. 1.0 progress through the session.
    pub fn progress(&self) -> f64 {
        let core = self.shared.core.borrow();
        let remaining = core.record.remaining_at(core.clock.now_ms());
        core.record.progress_for(remaining)
    }

    /// Copy of the in-memory record.
    pub fn record(&self) -> TimerRecord {
        self.shared.core.borrow().record.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.core.borrow().destroyed
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        let core = self.shared.core.borrow();
        let now = core.clock.now_ms();
        let remaining = core.record.remaining_at(now);
        Event::StateSnapshot {
            session_id: core.record.session_id.clone(),
            state: core.record.state,
            duration_minutes: core.record.duration_minutes,
            difficulty: core.duration.difficulty_label().to_string(),
            remaining_secs: remaining,
            progress: core.record.progress_for(remaining),
            paused_time_ms: core.record.paused_time_ms,
            visibility_changes: core.record.visibility_changes,
            at: timestamp(now),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start from idle, or continue from paused.
    pub fn start(&self) -> Result<(), TimerError> {
        self.with_core(TimerCore::start)
    }

    pub fn pause(&self) -> Result<(), TimerError> {
        self.with_core(TimerCore::pause)
    }

    pub fn resume(&self) -> Result<(), TimerError> {
        self.with_core(TimerCore::resume)
    }

    /// Complete a running session now. A second call after completion is a no-op.
    pub fn complete(&self) -> Result<(), TimerError> {
        self.with_core(TimerCore::complete)
    }

    /// End a running or paused session early.
    pub fn interrupt(&self) -> Result<(), TimerError> {
        self.with_core(TimerCore::interrupt)
    }

    /// Stop reacting to the host. Safe in any state and idempotent.
    ///
    /// A running or paused record stays in storage so a later timer can
    /// recover it; a terminal one is removed.
    pub fn destroy(&self) {
        self.with_core(TimerCore::destroy);
        // Drop callbacks so closures holding this timer don't keep it alive.
        if let Ok(mut callbacks) = self.shared.callbacks.try_borrow_mut() {
            *callbacks = TimerCallbacks::default();
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn with_core<R>(&self, f: impl FnOnce(&mut TimerCore) -> R) -> R {
        let result = {
            let mut core = self.shared.core.borrow_mut();
            let result = f(&mut core);
            let notices = std::mem::take(&mut core.notices);
            self.shared.pending.borrow_mut().extend(notices);
            result
        };
        self.flush();
        result
    }

    /// Deliver queued notifications. A reentrant call leaves the queue to the
    /// outer delivery loop.
    fn flush(&self) {
        let Ok(mut callbacks) = self.shared.callbacks.try_borrow_mut() else {
            return;
        };
        loop {
            let next = self.shared.pending.borrow_mut().pop_front();
            let Some(notice) = next else { break };
            callbacks.deliver(notice);
        }
    }

    fn handle_host_event(&self, event: &HostEvent) {
        match event {
            HostEvent::Tick => self.with_core(TimerCore::on_tick),
            HostEvent::Visibility { visible } => {
                let visible = *visible;
                self.with_core(|core| core.on_visibility(visible))
            }
            HostEvent::Storage(change) => self.with_core(|core| core.on_storage(change)),
        }
    }
}

/// Report a rejected construction to the caller's error callback.
pub(crate) fn report_config_error(callbacks: &mut TimerCallbacks, err: &TimerError) {
    tracing::warn!(%err, "rejected timer configuration");
    callbacks.report(err);
}

fn host_handler(this: &Weak<Shared>) -> EventHandler {
    let this = this.clone();
    Box::new(move |event| {
        if let Some(shared) = this.upgrade() {
            SessionTimer { shared }.handle_host_event(event);
        }
    })
}

impl TimerCore {
    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn session_id(&self) -> &str {
        &self.record.session_id
    }

    fn emit(&mut self, event: Event) {
        self.notices.push(Notice::Event(event));
    }

    fn notify_tick(&mut self, remaining: u32) {
        let progress = self.record.progress_for(remaining);
        self.notices.push(Notice::Tick(remaining, progress));
    }

    fn reject(&mut self, action: &'static str) -> Result<(), TimerError> {
        let err = if self.destroyed {
            TimerError::Destroyed(self.record.session_id.clone())
        } else {
            TimerError::IllegalTransition {
                action,
                from: self.record.state,
            }
        };
        tracing::warn!(session_id = %self.record.session_id, %err, "rejected timer command");
        self.notices.push(Notice::Error(err.clone()));
        Err(err)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    fn start(&mut self) -> Result<(), TimerError> {
        if self.destroyed {
            return self.reject("start");
        }
        match self.record.state {
            TimerState::Idle => {
                let now = self.now();
                self.record.start_time = now;
                self.record.last_tick = now;
                self.record.paused_time_ms = 0;
                self.record.state = TimerState::Running;
                self.record.remaining_seconds = self.record.total_seconds();
                self.schedule_ticks();
                self.persist();
                tracing::debug!(session_id = %self.session_id(), duration = %self.duration, "timer started");
                self.emit(Event::TimerStarted {
                    session_id: self.record.session_id.clone(),
                    duration_minutes: self.record.duration_minutes,
                    at: timestamp(now),
                });
                let remaining = self.record.remaining_seconds;
                self.notify_tick(remaining);
                Ok(())
            }
            TimerState::Paused => self.resume(),
            _ => self.reject("start"),
        }
    }

    fn pause(&mut self) -> Result<(), TimerError> {
        if self.destroyed || self.record.state != TimerState::Running {
            return self.reject("pause");
        }
        let now = self.now();
        let remaining = self.record.remaining_at(now);
        if remaining == 0 {
            // Already over; pausing would freeze a finished session.
            self.finish_completion();
            return Ok(());
        }
        self.record.remaining_seconds = remaining;
        self.record.last_tick = now;
        self.record.state = TimerState::Paused;
        self.cancel_ticks();
        self.persist();
        tracing::debug!(session_id = %self.session_id(), remaining, "timer paused");
        self.emit(Event::TimerPaused {
            session_id: self.record.session_id.clone(),
            remaining_secs: remaining,
            at: timestamp(now),
        });
        self.notify_tick(remaining);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TimerError> {
        if self.destroyed || self.record.state != TimerState::Paused {
            return self.reject("resume");
        }
        let now = self.now();
        let paused_for = now.saturating_sub(self.record.last_tick);
        self.record.paused_time_ms += paused_for;
        self.record.last_tick = now;
        self.record.state = TimerState::Running;
        let remaining = self.record.remaining_at(now);
        self.record.remaining_seconds = remaining;
        self.schedule_ticks();
        self.persist();
        tracing::debug!(session_id = %self.session_id(), paused_for, remaining, "timer resumed");
        self.emit(Event::TimerResumed {
            session_id: self.record.session_id.clone(),
            remaining_secs: remaining,
            paused_for_ms: paused_for,
            at: timestamp(now),
        });
        self.notify_tick(remaining);
        Ok(())
    }

    fn complete(&mut self) -> Result<(), TimerError> {
        match self.record.state {
            TimerState::Completed => Ok(()),
            TimerState::Running if !self.destroyed => {
                self.finish_completion();
                Ok(())
            }
            _ => self.reject("complete"),
        }
    }

    fn interrupt(&mut self) -> Result<(), TimerError> {
        if self.destroyed || !self.record.state.is_live() {
            return self.reject("interrupt");
        }
        let now = self.now();
        self.record.state = TimerState::Interrupted;
        self.record.last_tick = now;
        self.cancel_ticks();
        self.persist_terminal();
        tracing::info!(session_id = %self.session_id(), "session interrupted");
        self.emit(Event::TimerInterrupted {
            session_id: self.record.session_id.clone(),
            remaining_secs: self.record.remaining_seconds,
            at: timestamp(now),
        });
        Ok(())
    }

    fn finish_completion(&mut self) {
        let now = self.now();
        let elapsed_ms = self.record.elapsed_ms(now);
        self.record.state = TimerState::Completed;
        self.record.remaining_seconds = 0;
        self.record.last_tick = now;
        self.cancel_ticks();
        self.persist_terminal();
        if self.completion_fired {
            return;
        }
        self.completion_fired = true;
        tracing::info!(session_id = %self.session_id(), elapsed_ms, "session completed");
        self.notify_tick(0);
        self.notices.push(Notice::Complete);
        self.emit(Event::TimerCompleted {
            session_id: self.record.session_id.clone(),
            elapsed_ms,
            at: timestamp(now),
        });
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.cancel_ticks();
        for token in std::mem::take(&mut self.subs) {
            self.host.unsubscribe(token);
        }
        match self.record.state {
            TimerState::Running | TimerState::Paused => self.persist(),
            TimerState::Completed | TimerState::Interrupted => self.remove_stored(),
            TimerState::Idle => {}
        }
        self.destroyed = true;
        tracing::debug!(session_id = %self.session_id(), state = %self.record.state, "timer destroyed");
    }

    // ── Host events ──────────────────────────────────────────────────

    fn subscribe_host_events(&mut self) {
        for kind in [EventKind::Visibility, EventKind::Storage] {
            let token = self.host.subscribe(kind, host_handler(&self.this));
            self.subs.push(token);
        }
    }

    fn schedule_ticks(&mut self) {
        if self.tick_sub.is_none() {
            self.tick_sub = Some(self.host.subscribe(EventKind::Tick, host_handler(&self.this)));
        }
    }

    fn cancel_ticks(&mut self) {
        if let Some(token) = self.tick_sub.take() {
            self.host.unsubscribe(token);
        }
    }

    fn on_tick(&mut self) {
        if self.destroyed || self.hidden_since.is_some() || self.record.state != TimerState::Running {
            return;
        }
        let now = self.now();
        let remaining = self.record.remaining_at(now);
        let cached = self.record.remaining_seconds;
        if cached.abs_diff(remaining) > self.settings.drift_tolerance_secs {
            tracing::info!(
                session_id = %self.session_id(),
                cached,
                actual = remaining,
                "corrected timer drift"
            );
            self.emit(Event::DriftCorrected {
                session_id: self.record.session_id.clone(),
                cached_secs: cached,
                actual_secs: remaining,
                at: timestamp(now),
            });
        }
        self.record.remaining_seconds = remaining;

        if remaining == 0 {
            // Another tab may have paused or ended the session since our
            // last notification.
            if self.adopt_stored_if_newer() {
                return;
            }
            self.finish_completion();
            return;
        }

        self.notify_tick(remaining);
        if now.saturating_sub(self.last_persist_ms) >= self.settings.persist_interval_ms {
            // Not every writer announces its changes; never clobber a newer record.
            if self.adopt_stored_if_newer() {
                return;
            }
            self.persist();
        }
    }

    fn on_visibility(&mut self, visible: bool) {
        if self.destroyed {
            return;
        }
        let now = self.now();
        self.record.visibility_changes += 1;
        self.notices.push(Notice::Visibility(visible));
        self.emit(Event::VisibilityChanged {
            session_id: self.record.session_id.clone(),
            visible,
            at: timestamp(now),
        });

        if !visible {
            if self.hidden_since.is_none() {
                self.hidden_since = Some(now);
            }
            if self.record.state == TimerState::Running {
                self.record.last_tick = now;
                self.persist();
            }
            return;
        }

        let Some(hidden_since) = self.hidden_since.take() else {
            return;
        };
        if self.record.state != TimerState::Running {
            return;
        }
        // A start, resume or adopted write while hidden moves the anchor forward.
        let absence = now.saturating_sub(hidden_since.max(self.record.last_tick));
        if absence > self.settings.visibility_grace_ms() {
            self.record.paused_time_ms += absence;
            tracing::info!(session_id = %self.session_id(), absence_ms = absence, "excluded background time");
            self.emit(Event::AbsenceExcluded {
                session_id: self.record.session_id.clone(),
                absence_ms: absence,
                at: timestamp(now),
            });
        }
        self.record.last_tick = now;
        self.record.remaining_seconds = self.record.remaining_at(now);
        self.persist();
        self.on_tick();
    }

    fn on_storage(&mut self, change: &StorageChange) {
        if self.destroyed || change.key != self.key {
            return;
        }
        let Some(raw) = change.new_value.as_deref() else {
            tracing::debug!(session_id = %self.session_id(), "timer record removed by another tab");
            return;
        };
        match TimerRecord::decode_for(raw, &self.record.session_id) {
            Ok(remote) => {
                self.adopt(remote);
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "ignoring unusable timer record from another tab");
            }
        }
    }

    /// Last-writer-wins: take the remote record if its `lastTick` is strictly newer.
    fn adopt(&mut self, remote: TimerRecord) -> bool {
        if remote.last_tick <= self.record.last_tick || self.record.state.is_terminal() {
            return false;
        }
        if remote.state == TimerState::Idle && self.record.state != TimerState::Idle {
            return false;
        }
        let previous = self.record.state;
        self.record = remote;
        let now = self.now();
        match self.record.state {
            TimerState::Running => {
                self.record.remaining_seconds = self.record.remaining_at(now);
                self.schedule_ticks();
            }
            TimerState::Completed | TimerState::Interrupted => {
                // The writing tab owns the completion handoff.
                self.completion_fired = true;
                self.cancel_ticks();
            }
            TimerState::Idle | TimerState::Paused => self.cancel_ticks(),
        }
        tracing::info!(
            session_id = %self.session_id(),
            from = %previous,
            to = %self.record.state,
            "adopted newer timer state from another tab"
        );
        let remaining = self.record.remaining_at(now);
        self.notify_tick(remaining);
        self.emit(Event::Synced {
            session_id: self.record.session_id.clone(),
            state: self.record.state,
            remote_last_tick: self.record.last_tick,
            at: timestamp(now),
        });
        true
    }

    fn adopt_stored_if_newer(&mut self) -> bool {
        match self.store.get(&self.key) {
            Ok(Some(raw)) => match TimerRecord::decode_for(&raw, &self.record.session_id) {
                Ok(stored) => self.adopt(stored),
                Err(_) => false,
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "failed to re-read timer record");
                false
            }
        }
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Restore a running or paused record left by a previous timer.
    fn restore(&mut self) {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "failed to read stored timer; starting fresh");
                return;
            }
        };
        let stored = match TimerRecord::decode_for(&raw, &self.record.session_id) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "discarding unusable stored timer");
                return;
            }
        };

        if stored.state.is_terminal() {
            tracing::info!(session_id = %self.session_id(), state = %stored.state, "removing leftover terminal timer record");
            self.remove_stored();
            return;
        }
        if !stored.state.is_live() {
            return;
        }

        if stored.duration_minutes != self.duration.minutes() {
            tracing::warn!(
                session_id = %self.session_id(),
                stored = stored.duration_minutes,
                requested = self.duration.minutes(),
                "stored timer duration differs from request; keeping stored duration"
            );
            if let Some(duration) = stored.duration() {
                self.duration = duration;
            }
        }

        let now = self.now();
        self.record = stored;
        let remaining = self.record.remaining_at(now);
        if self.record.state == TimerState::Running {
            if remaining == 0 {
                tracing::info!(session_id = %self.session_id(), "stored timer expired while away");
                self.finish_completion();
                return;
            }
            self.record.remaining_seconds = remaining;
            self.schedule_ticks();
        }
        tracing::info!(session_id = %self.session_id(), state = %self.record.state, remaining, "recovered stored timer");
        self.emit(Event::TimerRecovered {
            session_id: self.record.session_id.clone(),
            state: self.record.state,
            remaining_secs: remaining,
            at: timestamp(now),
        });
        self.notify_tick(remaining);
    }

    /// Write the current record. Failures only cost recoverability.
    fn persist(&mut self) {
        let now = self.now();
        if self.record.state == TimerState::Running {
            self.record.remaining_seconds = self.record.remaining_at(now);
        }
        let json = match self.record.encode() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "failed to encode timer record");
                return;
            }
        };
        match self.store.set(&self.key, &json) {
            Ok(()) => self.last_persist_ms = now,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id(), error = %e, "failed to persist timer; continuing in memory");
            }
        }
    }

    /// Publish the terminal record so other tabs see it, then delete it.
    fn persist_terminal(&mut self) {
        self.persist();
        self.remove_stored();
    }

    fn remove_stored(&mut self) {
        if let Err(e) = self.store.remove(&self.key) {
            tracing::warn!(session_id = %self.session_id(), error = %e, "failed to remove timer record");
        }
    }
}
