//! Integration tests for wall-clock accuracy under irregular ticks.
//!
//! The host is free to deliver ticks late, early or not at all; the countdown
//! must always report the true remaining time and complete on the first tick
//! at or after the deadline.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use deepfocus_core::{
    Clock, LocalHost, ManualClock, MemoryStore, SessionTimer, TimerCallbacks, TimerConfig,
    TimerEnv, TimerRegistry, TimerSettings, TimerState,
};
use proptest::prelude::*;
use proptest::test_runner::Config;

const T0: u64 = 1_700_000_000_000;

struct Run {
    clock: ManualClock,
    host: LocalHost,
    _registry: TimerRegistry,
    timer: SessionTimer,
    ticks: Rc<RefCell<Vec<(u64, u32)>>>,
    completed_at: Rc<Cell<Option<u64>>>,
}

fn start_run(duration_minutes: u32) -> Run {
    let clock = ManualClock::new(T0);
    let host = LocalHost::new();
    let registry = TimerRegistry::new(TimerEnv::new(
        Rc::new(MemoryStore::new()),
        Rc::new(host.clone()),
        Rc::new(clock.clone()),
        TimerSettings::default(),
    ));

    let ticks = Rc::new(RefCell::new(Vec::new()));
    let completed_at = Rc::new(Cell::new(None));
    let (tick_log, tick_clock) = (Rc::clone(&ticks), clock.clone());
    let (done, done_clock) = (Rc::clone(&completed_at), clock.clone());
    let callbacks = TimerCallbacks::new()
        .on_tick(move |remaining, _| tick_log.borrow_mut().push((tick_clock.now_ms(), remaining)))
        .on_complete(move || done.set(Some(done_clock.now_ms())));

    let timer = registry
        .create_timer(TimerConfig::new("accuracy", "user-1", duration_minutes).with_callbacks(callbacks))
        .unwrap();
    timer.start().unwrap();

    Run {
        clock,
        host,
        _registry: registry,
        timer,
        ticks,
        completed_at,
    }
}

fn true_remaining(total_secs: u32, now: u64) -> u32 {
    let elapsed = (now - T0) / 1000;
    u64::from(total_secs).saturating_sub(elapsed) as u32
}

proptest! {
    #![proptest_config(Config::with_cases(8))]
    #[test]
    fn jittered_ticks_track_wall_clock(gaps in prop::collection::vec(500_u64..=1500, 15_000)) {
        let run = start_run(120);
        let total = 120 * 60;
        let deadline = T0 + u64::from(total) * 1000;

        let mut previous_tick_at = T0;
        for gap in gaps {
            if run.timer.state() == TimerState::Completed {
                break;
            }
            previous_tick_at = run.clock.now_ms();
            run.clock.advance_ms(gap);
            run.host.tick();
            run.host.dispatch_pending();
        }

        for &(at, remaining) in run.ticks.borrow().iter() {
            prop_assert!(true_remaining(total, at).abs_diff(remaining) <= 1);
        }

        let completed_at = run.completed_at.get();
        prop_assert!(completed_at.is_some());
        let completed_at = completed_at.unwrap_or_default();
        prop_assert!(completed_at >= deadline);
        prop_assert!(previous_tick_at < deadline);
        prop_assert_eq!(run.ticks.borrow().last().map(|(_, r)| *r), Some(0));
    }
}

#[test]
fn test_wall_clock_jump_completes_on_next_tick() {
    let run = start_run(60);
    run.clock.advance_ms(3 * 60 * 60 * 1000);
    run.host.tick();
    run.host.dispatch_pending();

    assert_eq!(run.timer.state(), TimerState::Completed);
    assert_eq!(run.completed_at.get(), Some(T0 + 3 * 60 * 60 * 1000));
    assert_eq!(run.ticks.borrow().last(), Some(&(T0 + 3 * 60 * 60 * 1000, 0)));
}

#[test]
fn test_missed_ticks_do_not_slow_the_countdown() {
    let run = start_run(90);
    // One tick every 20s, as a throttled background page would deliver them.
    for _ in 0..10 {
        run.clock.advance_ms(20_000);
        run.host.tick();
        run.host.dispatch_pending();
    }
    assert_eq!(run.timer.remaining_seconds(), 90 * 60 - 200);
    assert_eq!(run.ticks.borrow().last().map(|(_, r)| *r), Some(90 * 60 - 200));
}

#[test]
fn test_early_ticks_do_not_speed_up_the_countdown() {
    let run = start_run(60);
    for _ in 0..50 {
        run.clock.advance_ms(100);
        run.host.tick();
    }
    run.host.dispatch_pending();
    assert_eq!(run.timer.remaining_seconds(), 60 * 60 - 5);
}
