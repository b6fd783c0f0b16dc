// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{
    fs,
    path::PathBuf,
    sync::OnceLock,
    thread::sleep,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{kill, Signal},
    unistd::getpid,
};
use scuttle_common::{descriptor, Descriptor, JobKind};
use serial_test::serial;

use super::{config, fixture, returns_zero, scratch, Fixture};
use crate::{
    config::Mode,
    context::SlotState,
    lifecycle::{JobProducer, RandomGenesis, Supervisor},
    mutate::keep_arguments,
};

static CALLS: &[Descriptor] = &[
    descriptor!("nothing", 6000, []),
    descriptor!("with_buffer", 6001, [VoidBuf => "buf", Length => "length"]),
];

static HANGING: &[Descriptor] = &[descriptor!("hangs", 6002, [Int => "int"])];

static HANGING_PID_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Leaves its pid behind and blocks with no alarm to end it.
fn hangs(_: i64, _: &[u64]) -> i64 {
    if let Some(path) = HANGING_PID_FILE.get() {
        let _ = fs::write(path, getpid().as_raw().to_string());
    }
    unsafe { libc::pause() };
    0
}

/// Whether `pid` is still around and not a zombie.
fn running(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_some_and(|(_, rest)| !rest.starts_with('Z')),
        Err(_) => false,
    }
}

fn supervisor(f: &Fixture) -> Supervisor<'static> {
    Supervisor::new(f.run, Box::new(RandomGenesis::new(Some(3))))
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(5));
    }
}

fn assert_all_slots_empty(f: &Fixture) {
    for ctx in f.run.slots.iter() {
        assert!(ctx.is_empty());
        assert_eq!(ctx.state(), SlotState::Empty);
    }
    assert_eq!(f.run.state.running(), 0);
}

#[test]
#[serial]
fn killed_worker_is_replaced() {
    let f = fixture(CALLS, returns_zero, keep_arguments, config("respawn", 2));
    let mut supervisor = supervisor(&f);

    supervisor.spawn_workers().unwrap();
    let first = supervisor.children();
    assert_eq!(first.len(), 2);
    assert_eq!(f.run.state.running(), 2);
    for ctx in f.run.slots.iter() {
        assert_eq!(ctx.state(), SlotState::Running);
        assert!(!ctx.is_empty());
    }

    let victim = first[0];
    kill(victim, Signal::SIGKILL).unwrap();
    wait_until("the reaper", || {
        supervisor.reap();
        supervisor.children().len() == 1
    });

    assert_eq!(f.run.state.running(), 1);
    assert!(f.run.slots.by_pid(victim.as_raw()).is_none());
    assert_eq!(f.run.slots.iter().filter(|c| c.is_empty()).count(), 1);

    supervisor.spawn_workers().unwrap();
    let second = supervisor.children();
    assert_eq!(second.len(), 2);
    assert!(!second.contains(&victim));
    assert_eq!(f.run.state.running(), 2);

    f.run.state.request_stop();
    supervisor.kill_all_children();
    assert!(supervisor.children().is_empty());
    assert_all_slots_empty(&f);
    assert_eq!(f.run.buffers.allocated_count(), 0);
}

#[test]
#[serial]
fn blocked_invocations_die_with_their_worker() {
    let pid_file = HANGING_PID_FILE.get_or_init(|| scratch("hanging.pid"));
    let _ = fs::remove_file(pid_file);

    let f = fixture(HANGING, hangs, keep_arguments, config("hanging", 1));
    let mut supervisor = supervisor(&f);
    supervisor.spawn_workers().unwrap();

    let mut invocation = 0;
    wait_until("the invocation to start", || {
        invocation = fs::read_to_string(pid_file)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        invocation > 0
    });
    assert!(running(invocation));

    f.run.state.request_stop();
    supervisor.kill_all_children();
    assert_all_slots_empty(&f);

    wait_until("the invocation to die", || !running(invocation));
    fs::remove_file(pid_file).unwrap();
}

#[test]
#[serial]
fn dumb_run_stops_at_test_budget() {
    let mut cfg = config("dumb-run", 2);
    cfg.max_tests = Some(50);
    let f = fixture(CALLS, returns_zero, keep_arguments, cfg);

    supervisor(&f).start_main_loop().unwrap();

    assert!(f.run.state.tests() >= 50);
    assert!(f.run.state.stop_requested());
    assert_all_slots_empty(&f);
    assert_eq!(f.run.buffers.allocated_count(), 0);
}

#[test]
#[serial]
fn smart_run_feeds_jobs() {
    let mut cfg = config("smart-run", 2);
    cfg.mode = Mode::Smart;
    cfg.max_tests = Some(40);
    let f = fixture(CALLS, returns_zero, keep_arguments, cfg);

    supervisor(&f).start_main_loop().unwrap();

    assert!(f.run.state.tests() >= 40);
    assert_all_slots_empty(&f);
}

#[test]
#[serial]
fn run_stops_after_duration() {
    let mut cfg = config("duration", 1);
    cfg.duration = Some(Duration::from_millis(200));
    let f = fixture(CALLS, returns_zero, keep_arguments, cfg);

    let started = Instant::now();
    supervisor(&f).start_main_loop().unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(f.run.state.tests() > 0);
    assert_all_slots_empty(&f);
}

#[test]
fn random_genesis_stays_in_the_table() {
    let mut producer = RandomGenesis::new(Some(9));
    for _ in 0..1000 {
        let job = producer.next_job(5);
        assert_eq!(job.kind(), Some(JobKind::Genesis));
        assert!(job.syscall_index < 5);
    }
}
