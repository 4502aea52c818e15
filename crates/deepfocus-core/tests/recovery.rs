//! Integration tests for recovering timers across reloads.
//!
//! Each "reload" opens a fresh registry (and, for SQLite, a fresh connection)
//! on the same storage, the way a page reload starts from nothing but what
//! was persisted.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use deepfocus_core::timer::storage_key;
use deepfocus_core::{
    Database, KeyValueStore, LocalHost, ManualClock, MemoryStore, TimerCallbacks, TimerConfig,
    TimerEnv, TimerRegistry, TimerSettings, TimerState,
};

const T0: u64 = 1_700_000_000_000;

fn registry(store: Rc<dyn KeyValueStore>, clock: &ManualClock) -> (TimerRegistry, LocalHost) {
    let host = LocalHost::new();
    let env = TimerEnv::new(
        store,
        Rc::new(host.clone()),
        Rc::new(clock.clone()),
        TimerSettings::default(),
    );
    (TimerRegistry::new(env), host)
}

fn sqlite(path: &Path) -> Rc<dyn KeyValueStore> {
    Rc::new(Database::open_at(path).unwrap())
}

#[test]
fn test_reload_recovers_remaining_time() {
    let clock = ManualClock::new(T0);
    let store: Rc<dyn KeyValueStore> = Rc::new(MemoryStore::new());

    let (first, host) = registry(Rc::clone(&store), &clock);
    let timer = first.create_timer(TimerConfig::new("s", "u", 90)).unwrap();
    timer.start().unwrap();
    for _ in 0..100 {
        clock.advance_ms(1000);
        host.tick();
        host.dispatch_pending();
    }
    let before = timer.remaining_seconds();
    // A reload does not get to run destroy.
    drop(timer);
    drop(first);

    let (second, _host) = registry(Rc::clone(&store), &clock);
    let recovered = second.create_timer(TimerConfig::new("s", "u", 90)).unwrap();
    assert_eq!(recovered.state(), TimerState::Running);
    assert!(recovered.remaining_seconds().abs_diff(before) <= 1);
}

#[test]
fn test_repeated_reloads_are_idempotent() {
    let clock = ManualClock::new(T0);
    let store: Rc<dyn KeyValueStore> = Rc::new(MemoryStore::new());
    let (first, _host) = registry(Rc::clone(&store), &clock);
    first
        .create_timer(TimerConfig::new("s", "u", 60))
        .unwrap()
        .start()
        .unwrap();
    clock.advance_ms(42_500);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (reg, _host) = registry(Rc::clone(&store), &clock);
        let timer = reg.create_timer(TimerConfig::new("s", "u", 60)).unwrap();
        seen.push(timer.remaining_seconds());
        reg.destroy_timer("s");
    }
    assert!(seen.iter().all(|r| r.abs_diff(60 * 60 - 42) <= 1), "{seen:?}");
}

#[test]
fn test_paused_timer_survives_reload() {
    let clock = ManualClock::new(T0);
    let store: Rc<dyn KeyValueStore> = Rc::new(MemoryStore::new());
    let (first, _host) = registry(Rc::clone(&store), &clock);
    let timer = first.create_timer(TimerConfig::new("s", "u", 90)).unwrap();
    timer.start().unwrap();
    clock.advance_ms(300_000);
    timer.pause().unwrap();
    drop(timer);
    drop(first);

    clock.advance_ms(3_600_000);
    let (second, _host) = registry(Rc::clone(&store), &clock);
    let recovered = second.create_timer(TimerConfig::new("s", "u", 90)).unwrap();
    assert_eq!(recovered.state(), TimerState::Paused);
    assert_eq!(recovered.remaining_seconds(), 90 * 60 - 300);

    recovered.resume().unwrap();
    assert_eq!(recovered.remaining_seconds(), 90 * 60 - 300);
}

#[test]
fn test_expired_timer_completes_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deepfocus.db");
    let clock = ManualClock::new(T0);

    {
        let (first, _host) = registry(sqlite(&path), &clock);
        first
            .create_timer(TimerConfig::new("s", "u", 60))
            .unwrap()
            .start()
            .unwrap();
    }

    clock.advance_ms(61 * 60 * 1000);
    let store = sqlite(&path);
    let (second, _host) = registry(Rc::clone(&store), &clock);
    assert!(!second.has_active_timer("s"));

    let completions = Rc::new(Cell::new(0));
    let counter = Rc::clone(&completions);
    let timer = second
        .create_timer(
            TimerConfig::new("s", "u", 60)
                .with_callbacks(TimerCallbacks::new().on_complete(move || counter.set(counter.get() + 1))),
        )
        .unwrap();

    assert_eq!(timer.state(), TimerState::Completed);
    assert_eq!(completions.get(), 1);
    assert!(store.get(&storage_key("s")).unwrap().is_none());
}

#[test]
fn test_sqlite_store_recovers_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deepfocus.db");
    let clock = ManualClock::new(T0);

    {
        let (first, _host) = registry(sqlite(&path), &clock);
        first
            .create_timer(TimerConfig::new("s", "u", 120))
            .unwrap()
            .start()
            .unwrap();
    }

    clock.advance_ms(600_000);
    let (second, _host) = registry(sqlite(&path), &clock);
    assert!(second.has_active_timer("s"));
    let stored = second.get_stored_timer_data("s").unwrap();
    assert_eq!(stored.state, TimerState::Running);
    assert_eq!(stored.start_time, T0);

    let timer = second.create_timer(TimerConfig::new("s", "u", 120)).unwrap();
    assert_eq!(timer.remaining_seconds(), 120 * 60 - 600);
}

#[test]
fn test_corrupt_record_starts_fresh() {
    let clock = ManualClock::new(T0);
    let store: Rc<dyn KeyValueStore> = Rc::new(MemoryStore::new());
    store.set(&storage_key("s"), "{not json").unwrap();

    let (reg, _host) = registry(Rc::clone(&store), &clock);
    assert!(reg.get_stored_timer_data("s").is_none());
    assert!(!reg.has_active_timer("s"));

    let timer = reg.create_timer(TimerConfig::new("s", "u", 90)).unwrap();
    assert_eq!(timer.state(), TimerState::Idle);
    timer.start().unwrap();
    assert_eq!(timer.remaining_seconds(), 90 * 60);
}
