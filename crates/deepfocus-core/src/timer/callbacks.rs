//! Construction contract for a session timer.

use std::fmt;

use crate::error::TimerError;
use crate::events::Event;

type TickFn = Box<dyn FnMut(u32, f64)>;
type CompleteFn = Box<dyn FnMut()>;
type VisibilityFn = Box<dyn FnMut(bool)>;
type ErrorFn = Box<dyn FnMut(&TimerError)>;
type EventFn = Box<dyn FnMut(&Event)>;

/// Notifications a timer sends to its owner.
///
/// Every callback is optional. Callbacks run after the timer has released its
/// internal state, so they may call back into the timer.
#[derive(Default)]
pub struct TimerCallbacks {
    tick: Option<TickFn>,
    complete: Option<CompleteFn>,
    visibility: Option<VisibilityFn>,
    error: Option<ErrorFn>,
    event: Option<EventFn>,
}

impl TimerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining seconds and 0..1 progress, on every recomputation.
    pub fn on_tick(mut self, f: impl FnMut(u32, f64) + 'static) -> Self {
        self.tick = Some(Box::new(f));
        self
    }

    /// Fired once when this timer completes the session.
    pub fn on_complete(mut self, f: impl FnMut() + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    pub fn on_visibility_change(mut self, f: impl FnMut(bool) + 'static) -> Self {
        self.visibility = Some(Box::new(f));
        self
    }

    /// Caller contract violations: illegal transitions and invalid configuration.
    pub fn on_error(mut self, f: impl FnMut(&TimerError) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    /// Every [`Event`] the timer produces.
    pub fn on_event(mut self, f: impl FnMut(&Event) + 'static) -> Self {
        self.event = Some(Box::new(f));
        self
    }

    /// Run `f` on completion before any user-supplied `on_complete`.
    pub(crate) fn before_complete(mut self, mut f: impl FnMut() + 'static) -> Self {
        let mut user = self.complete.take();
        self.complete = Some(Box::new(move || {
            f();
            if let Some(user) = user.as_mut() {
                user();
            }
        }));
        self
    }

    pub(crate) fn deliver(&mut self, notice: Notice) {
        match notice {
            Notice::Tick(remaining, progress) => {
                if let Some(f) = self.tick.as_mut() {
                    f(remaining, progress);
                }
            }
            Notice::Complete => {
                if let Some(f) = self.complete.as_mut() {
                    f();
                }
            }
            Notice::Visibility(visible) => {
                if let Some(f) = self.visibility.as_mut() {
                    f(visible);
                }
            }
            Notice::Error(err) => {
                if let Some(f) = self.error.as_mut() {
                    f(&err);
                }
            }
            Notice::Event(event) => {
                if let Some(f) = self.event.as_mut() {
                    f(&event);
                }
            }
        }
    }

    pub(crate) fn report(&mut self, err: &TimerError) {
        if let Some(f) = self.error.as_mut() {
            f(err);
        }
    }
}

impl fmt::Debug for TimerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCallbacks")
            .field("on_tick", &self.tick.is_some())
            .field("on_complete", &self.complete.is_some())
            .field("on_visibility_change", &self.visibility.is_some())
            .field("on_error", &self.error.is_some())
            .field("on_event", &self.event.is_some())
            .finish()
    }
}

/// Queued notification, delivered once the timer state is released.
#[derive(Debug)]
pub(crate) enum Notice {
    Tick(u32, f64),
    Complete,
    Visibility(bool),
    Error(TimerError),
    Event(Event),
}

/// Everything needed to create a session timer.
#[derive(Debug)]
pub struct TimerConfig {
    pub session_id: String,
    pub user_id: String,
    /// Must be 60, 90 or 120.
    pub duration_minutes: u32,
    pub callbacks: TimerCallbacks,
}

impl TimerConfig {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            duration_minutes,
            callbacks: TimerCallbacks::default(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: TimerCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}
