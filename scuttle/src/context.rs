// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Records shared between the supervisor and its workers.
//!
//! Everything here lives in a [`BlockPool`] block and is observed from several
//! processes at once, so every field is an atomic. Only the worker
//! that owns a slot writes its test fields; the supervisor reads them for
//! bookkeeping and touches the pid and state words during spawn and reap.

use std::{
    mem::size_of,
    sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use nix::errno::Errno;
use scuttle_common::ARG_LIMIT;

use crate::pool::{BlockPool, PoolError};

/// Pid value of a slot no process owns.
pub const EMPTY_PID: i32 = 0;

/// Process-wide flags and counters. Lock-free so signal handlers may use them.
#[repr(C)]
#[derive(Default)]
pub struct RunState {
    stop: AtomicBool,
    running: AtomicU32,
    tests: AtomicU64,
    faults: AtomicU64,
}

impl RunState {
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn running(&self) -> u32 {
        self.running.load(Ordering::Acquire)
    }

    pub fn tests(&self) -> u64 {
        self.tests.load(Ordering::Acquire)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Acquire)
    }

    pub(crate) fn worker_started(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn worker_gone(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns the number of tests started so far, this one included.
    pub(crate) fn test_started(&self) -> u64 {
        self.tests.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn fault_recovered(&self) {
        self.faults.fetch_add(1, Ordering::AcqRel);
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty = 0,
    Spawning = 1,
    Running = 2,
    Terminated = 3,
}

impl SlotState {
    fn from_raw(raw: u8) -> SlotState {
        match raw {
            1 => SlotState::Spawning,
            2 => SlotState::Running,
            3 => SlotState::Terminated,
            _ => SlotState::Empty,
        }
    }
}

/// Where the test in flight stands. `Invoking` is the checkpoint: a worker
/// finding its invocation dead with this phase set knows exactly which test to
/// account for.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle = 0,
    Armed = 1,
    Invoking = 2,
    Completed = 3,
}

impl Phase {
    fn from_raw(raw: u8) -> Phase {
        match raw {
            1 => Phase::Armed,
            2 => Phase::Invoking,
            3 => Phase::Completed,
            _ => Phase::Idle,
        }
    }
}

#[repr(C)]
pub struct WorkerContext {
    pid: AtomicI32,
    state: AtomicU8,
    counted: AtomicBool,

    syscall_index: AtomicU32,
    syscall_number: AtomicI64,
    needs_alarm: AtomicBool,
    arg_count: AtomicU32,
    current_arg: AtomicU32,

    args: [AtomicU64; ARG_LIMIT],
    sizes: [AtomicU64; ARG_LIMIT],
    originals: [AtomicU64; ARG_LIMIT],

    return_value: AtomicI64,
    had_error: AtomicBool,
    errno: AtomicI32,
    fault_signal: AtomicI32,
    last_test_us: AtomicU64,

    phase: AtomicU8,
    resumed: AtomicBool,
}

impl Default for WorkerContext {
    fn default() -> Self {
        WorkerContext {
            pid: AtomicI32::new(EMPTY_PID),
            state: AtomicU8::new(SlotState::Empty as u8),
            counted: AtomicBool::new(false),
            syscall_index: AtomicU32::new(0),
            syscall_number: AtomicI64::new(0),
            needs_alarm: AtomicBool::new(false),
            arg_count: AtomicU32::new(0),
            current_arg: AtomicU32::new(0),
            args: Default::default(),
            sizes: Default::default(),
            originals: Default::default(),
            return_value: AtomicI64::new(0),
            had_error: AtomicBool::new(false),
            errno: AtomicI32::new(0),
            fault_signal: AtomicI32::new(0),
            last_test_us: AtomicU64::new(0),
            phase: AtomicU8::new(Phase::Idle as u8),
            resumed: AtomicBool::new(false),
        }
    }
}

impl WorkerContext {
    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.pid() == EMPTY_PID
    }

    /// Claims the slot for `pid`. Fails if someone else holds it.
    pub fn claim(&self, pid: i32) -> bool {
        self.pid
            .compare_exchange(EMPTY_PID, pid, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Gives the slot up on behalf of `pid`. Only one caller per incarnation
    /// gets `true`, that caller does the accounting.
    pub fn vacate(&self, pid: i32) -> bool {
        self.pid
            .compare_exchange(pid, EMPTY_PID, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_counted(&self) {
        self.counted.store(true, Ordering::Release);
    }

    /// Clears the "counted in the running total" mark, reporting whether it
    /// was set.
    pub(crate) fn take_counted(&self) -> bool {
        self.counted.swap(false, Ordering::AcqRel)
    }

    /// Returns the slot of the dead or exiting `pid` to `Empty`. Whoever wins
    /// the pid exchange, the worker itself or the reaper, also takes it out
    /// of the running count.
    pub(crate) fn release(&self, pid: i32, state: &RunState) -> bool {
        if !self.vacate(pid) {
            return false;
        }
        self.set_state(SlotState::Terminated);
        if self.take_counted() {
            state.worker_gone();
        }
        self.set_phase(Phase::Idle);
        self.set_state(SlotState::Empty);
        true
    }

    pub fn syscall_index(&self) -> usize {
        self.syscall_index.load(Ordering::Acquire) as usize
    }

    pub fn syscall_number(&self) -> i64 {
        self.syscall_number.load(Ordering::Acquire)
    }

    pub fn needs_alarm(&self) -> bool {
        self.needs_alarm.load(Ordering::Acquire)
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count.load(Ordering::Acquire) as usize
    }

    pub fn current_arg(&self) -> usize {
        self.current_arg.load(Ordering::Acquire) as usize
    }

    pub(crate) fn select(&self, index: usize, number: i64, arg_count: usize, needs_alarm: bool) {
        self.syscall_index.store(index as u32, Ordering::Release);
        self.syscall_number.store(number, Ordering::Release);
        self.arg_count.store(arg_count as u32, Ordering::Release);
        self.needs_alarm.store(needs_alarm, Ordering::Release);
        self.current_arg.store(0, Ordering::Release);
        self.had_error.store(false, Ordering::Release);
        self.errno.store(0, Ordering::Release);
        self.fault_signal.store(0, Ordering::Release);
        self.return_value.store(0, Ordering::Release);
        self.resumed.store(false, Ordering::Release);
    }

    pub(crate) fn set_current_arg(&self, i: usize) {
        self.current_arg.store(i as u32, Ordering::Release);
    }

    /// Live value of argument `i`, possibly mutated.
    pub fn arg(&self, i: usize) -> u64 {
        self.args[i].load(Ordering::Acquire)
    }

    pub fn set_arg(&self, i: usize, value: u64) {
        self.args[i].store(value, Ordering::Release);
    }

    pub fn arg_size(&self, i: usize) -> u64 {
        self.sizes[i].load(Ordering::Acquire)
    }

    pub(crate) fn set_arg_size(&self, i: usize, size: u64) {
        self.sizes[i].store(size, Ordering::Release);
    }

    /// Value of argument `i` as generated, before any mutation ran.
    pub fn original(&self, i: usize) -> u64 {
        self.originals[i].load(Ordering::Acquire)
    }

    pub(crate) fn set_original(&self, i: usize, value: u64) {
        self.originals[i].store(value, Ordering::Release);
    }

    pub fn args(&self) -> Vec<u64> {
        (0..self.arg_count()).map(|i| self.arg(i)).collect()
    }

    pub fn return_value(&self) -> i64 {
        self.return_value.load(Ordering::Acquire)
    }

    pub fn had_error(&self) -> bool {
        self.had_error.load(Ordering::Acquire)
    }

    pub fn errno(&self) -> i32 {
        self.errno.load(Ordering::Acquire)
    }

    pub fn fault_signal(&self) -> i32 {
        self.fault_signal.load(Ordering::Acquire)
    }

    /// Written by the invocation child, so only plain atomic stores here.
    pub(crate) fn record_return(&self, value: i64, errno: i32) {
        self.return_value.store(value, Ordering::Release);
        self.errno.store(errno, Ordering::Release);
    }

    pub(crate) fn record_error(&self) {
        self.had_error.store(true, Ordering::Release);
    }

    pub(crate) fn record_fault(&self, signal: i32) {
        self.fault_signal.store(signal, Ordering::Release);
        self.had_error.store(true, Ordering::Release);
    }

    pub fn error_description(&self) -> &'static str {
        if self.had_error() && self.errno() != 0 {
            Errno::from_raw(self.errno()).desc()
        } else {
            ""
        }
    }

    pub fn last_test_us(&self) -> u64 {
        self.last_test_us.load(Ordering::Acquire)
    }

    pub(crate) fn stamp(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        self.last_test_us.store(now, Ordering::Release);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_raw(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn resumed(&self) -> bool {
        self.resumed.load(Ordering::Acquire)
    }

    pub(crate) fn set_resumed(&self, resumed: bool) {
        self.resumed.store(resumed, Ordering::Release);
    }
}

/// A pool sized for one [`RunState`] and `workers` worker contexts.
pub fn context_pool(workers: usize) -> Result<BlockPool, PoolError> {
    let block_size = size_of::<WorkerContext>().max(size_of::<RunState>());
    BlockPool::create(block_size, workers + 1)
}

/// The fixed set of worker contexts, allocated once for the whole run.
pub struct WorkerSlots<'p> {
    slots: Vec<&'p WorkerContext>,
}

impl<'p> WorkerSlots<'p> {
    pub fn new(pool: &'p BlockPool, count: usize) -> Result<Self, PoolError> {
        let slots = (0..count)
            .map(|_| pool.alloc_shared(WorkerContext::default()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WorkerSlots { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn by_index(&self, index: usize) -> Option<&'p WorkerContext> {
        self.slots.get(index).copied()
    }

    pub fn by_pid(&self, pid: i32) -> Option<&'p WorkerContext> {
        if pid == EMPTY_PID {
            return None;
        }
        self.slots.iter().copied().find(|s| s.pid() == pid)
    }

    pub fn index_of_pid(&self, pid: i32) -> Option<usize> {
        if pid == EMPTY_PID {
            return None;
        }
        self.slots.iter().position(|s| s.pid() == pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'p WorkerContext> + '_ {
        self.slots.iter().copied()
    }
}
