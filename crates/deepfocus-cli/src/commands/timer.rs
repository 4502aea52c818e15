use std::rc::Rc;

use clap::Subcommand;
use deepfocus_core::host::run_ticks;
use deepfocus_core::session::SessionStore;
use deepfocus_core::storage::Database;
use deepfocus_core::{
    Config, LocalHost, SessionDuration, SessionLifecycle, SessionRequest, SessionTimer,
    TimerCallbacks, TimerEnv, TimerRegistry, TimerSettings, TimerState, WillpowerLevel,
};
use serde_json::json;

use super::{print_json, CliResult};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a session, or continue a paused one
    Start {
        /// Session id (a new UUID if omitted)
        #[arg(long)]
        session: Option<String>,
        /// User id (defaults to session.user_id from config)
        #[arg(long)]
        user: Option<String>,
        /// Committed duration in minutes: 60, 90 or 120
        #[arg(long)]
        duration: Option<u32>,
        /// Willpower level: high, medium or low
        #[arg(long)]
        willpower: Option<WillpowerLevel>,
        /// Keep ticking in the foreground until the session ends
        #[arg(long)]
        watch: bool,
    },
    /// Pause a running session
    Pause {
        #[arg(long)]
        session: String,
    },
    /// Resume a paused session
    Resume {
        #[arg(long)]
        session: String,
    },
    /// End a session early
    Interrupt {
        #[arg(long)]
        session: String,
    },
    /// Complete a running session now
    Complete {
        #[arg(long)]
        session: String,
    },
    /// Print a session's timer state (or its outcome once ended) as JSON
    Status {
        #[arg(long)]
        session: String,
    },
    /// Tick a running session in the foreground until it ends
    Watch {
        #[arg(long)]
        session: String,
    },
    /// List stored timer records
    List,
    /// Remove every stored timer record
    ClearAll,
}

/// One CLI invocation behaves like a freshly loaded tab: it owns a host and a
/// registry, and recovers whatever the database holds.
struct Tab {
    host: LocalHost,
    db: Rc<Database>,
    lifecycle: SessionLifecycle,
    settings: TimerSettings,
}

impl Tab {
    fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Rc::new(Database::open()?);
        let host = LocalHost::new();
        let env = TimerEnv::local(db.clone(), &host, config.timer.clone());
        let lifecycle = SessionLifecycle::new(Rc::new(TimerRegistry::new(env)), db.clone());
        tracing::debug!(tick_interval_ms = config.timer.tick_interval_ms, "tab opened");
        Ok(Self {
            host,
            db,
            lifecycle,
            settings: config.timer.clone(),
        })
    }

    fn registry(&self) -> &TimerRegistry {
        self.lifecycle.registry()
    }

    fn print_snapshot(&self, session_id: &str) -> CliResult {
        match self.registry().get_timer(session_id) {
            Some(timer) if !timer.state().is_terminal() => print_json(&timer.snapshot()),
            _ => self.print_outcome(session_id),
        }
    }

    fn print_outcome(&self, session_id: &str) -> CliResult {
        match self.db.outcome(session_id)? {
            Some(outcome) => print_json(&outcome),
            None => Err(format!("no timer for session {session_id}").into()),
        }
    }

    /// Tick until the timer stops running, then report how it ended.
    fn drive(&self, timer: &SessionTimer) -> CliResult {
        if timer.state() == TimerState::Running {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()?;
            let period = self.settings.tick_interval();
            tracing::info!(session_id = %timer.session_id(), "watching session");
            runtime.block_on(run_ticks(&self.host, period, || {
                timer.state() != TimerState::Running
            }));
        }
        if timer.state().is_terminal() {
            self.print_outcome(&timer.session_id())
        } else {
            print_json(&timer.snapshot())
        }
    }
}

fn watch_callbacks() -> TimerCallbacks {
    TimerCallbacks::new()
        .on_tick(|remaining, progress| {
            println!("{}", json!({ "remaining_secs": remaining, "progress": progress }));
        })
        .on_event(|event| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        })
}

pub fn run(action: TimerAction, config: &Config) -> CliResult {
    let tab = Tab::open(config)?;

    match action {
        TimerAction::Start {
            session,
            user,
            duration,
            willpower,
            watch,
        } => {
            let defaults = &config.session;
            let minutes = duration.unwrap_or(defaults.duration_minutes);
            let req = SessionRequest {
                session_id: session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                user_id: user.unwrap_or_else(|| defaults.user_id.clone()),
                duration: SessionDuration::try_from(minutes)?,
                willpower: willpower.unwrap_or(defaults.willpower),
            };
            let callbacks = if watch {
                watch_callbacks()
            } else {
                TimerCallbacks::default()
            };
            let timer = tab.lifecycle.start_session(req, callbacks)?;
            if watch {
                tab.drive(&timer)?;
            } else {
                print_json(&timer.snapshot())?;
            }
        }
        TimerAction::Pause { session } => {
            tab.lifecycle.pause_session(&session)?;
            tab.print_snapshot(&session)?;
        }
        TimerAction::Resume { session } => {
            tab.lifecycle.resume_session(&session)?;
            tab.print_snapshot(&session)?;
        }
        TimerAction::Interrupt { session } => {
            let outcome = tab.lifecycle.interrupt_session(&session)?;
            print_json(&outcome)?;
        }
        TimerAction::Complete { session } => {
            let outcome = tab.lifecycle.complete_session(&session)?;
            print_json(&outcome)?;
        }
        TimerAction::Status { session } => {
            if tab.registry().get_stored_timer_data(&session).is_some() {
                tab.lifecycle
                    .attach_session(&session, TimerCallbacks::default())?;
            }
            tab.print_snapshot(&session)?;
        }
        TimerAction::Watch { session } => {
            if tab.registry().get_stored_timer_data(&session).is_none() {
                return tab.print_outcome(&session);
            }
            let timer = tab.lifecycle.attach_session(&session, watch_callbacks())?;
            tab.drive(&timer)?;
        }
        TimerAction::List => {
            print_json(&tab.registry().stored_timers())?;
        }
        TimerAction::ClearAll => {
            let removed = tab.registry().clear_all_timers();
            print_json(&json!({ "removed": removed }))?;
        }
    }
    Ok(())
}
