// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! The test loop that runs inside every worker process.
//!
//! Each call is made from a short-lived child of the worker. Before forking
//! it the worker stores the whole test in its shared context with the phase
//! set to [`Phase::Invoking`]; that is the checkpoint. If the child dies on a
//! signal, gets stopped, or is interrupted by its alarm, the worker resumes
//! from the checkpoint: it records the fault and runs the same outcome
//! logging and cleanup a normal return gets, exactly once.

use std::borrow::Cow;

use log::{debug, error, info, trace, warn};
use nix::{
    errno::Errno,
    sys::{
        prctl::set_pdeathsig,
        signal::{kill, Signal},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::{fork, getpid, getppid, ForkResult, Pid},
};
use rand::Rng;
use scuttle_common::JobKind;
use thiserror::Error;

use crate::{
    arg_context::Cleanup,
    channel::{ChannelError, Port},
    config::Mode,
    context::{Phase, WorkerContext},
    generate::{ArgSlot, GenerateCtx, GenerateError},
    mutate::MutateError,
    platform::FuzzRng,
    probe::{ProbeError, ProbeHandle},
    resource::{ResourceError, Resources},
    run::Run,
    signals,
    sink::SinkError,
    table::{ShadowEntry, TableError},
};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker slot {0} does not exist")]
    NoSlot(usize),
    #[error("worker slot {slot} is already held by pid {holder}")]
    SlotTaken { slot: usize, holder: i32 },
    #[error("installing signal handlers: {0}")]
    Signals(Errno),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("generating argument {position} of {syscall}: {source}")]
    Generate {
        syscall: &'static str,
        position: usize,
        source: GenerateError,
    },
    #[error(transparent)]
    Mutate(#[from] MutateError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("forking the invocation: {0}")]
    Fork(Errno),
    #[error("waiting for the invocation: {0}")]
    Wait(Errno),
}

/// Exit status of an invocation child that could not tie itself to its
/// worker and never made the call.
pub const ORPHANED_EXIT: i32 = 125;

/// How the invocation child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Returned,
    Faulted(Signal),
    TimedOut,
    /// Stopped by the given signal and killed.
    Stopped(Signal),
    /// The call ended the process itself, `exit(2)` and friends.
    Exited(i32),
}

impl Outcome {
    fn signal(&self) -> i32 {
        match self {
            Outcome::Faulted(s) | Outcome::Stopped(s) => *s as i32,
            Outcome::TimedOut => Signal::SIGALRM as i32,
            Outcome::Returned | Outcome::Exited(_) => 0,
        }
    }

    fn describe(&self, alarm_secs: u32) -> String {
        match self {
            Outcome::Returned => String::new(),
            Outcome::Faulted(s) => format!("killed by {s}"),
            Outcome::TimedOut => format!("timed out after {alarm_secs}s"),
            Outcome::Stopped(s) => format!("stopped by {s}, killed"),
            Outcome::Exited(code) => format!("process exited with status {code}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub tests: u64,
    pub faults: u64,
    pub cleanups: u64,
    pub cleanup_failures: u64,
}

/// Uniform pick over the shadow table.
pub fn pick_syscall<R: Rng + ?Sized>(rng: &mut R, count: usize) -> usize {
    rng.gen_range(0..count)
}

pub struct Worker<'r> {
    run: &'r Run<'r>,
    slot: usize,
    pid: Pid,
    ctx: &'r WorkerContext,
    rng: FuzzRng,
    resources: Resources<'r>,
    probe: ProbeHandle,
    stats: WorkerStats,
}

impl<'r> Worker<'r> {
    pub fn new(run: &'r Run<'r>, slot: usize) -> Result<Self, WorkerError> {
        let ctx = run.slots.by_index(slot).ok_or(WorkerError::NoSlot(slot))?;
        let pid = getpid();
        let resources = Resources::new(run.config.scratch_dir.join(format!("worker-{slot}-{pid}")))?;

        Ok(Worker {
            run,
            slot,
            pid,
            ctx,
            rng: FuzzRng::for_platform(),
            resources,
            probe: ProbeHandle {
                slot,
                injected: false,
            },
            stats: WorkerStats::default(),
        })
    }

    pub fn context(&self) -> &'r WorkerContext {
        self.ctx
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn resources(&self) -> &Resources<'r> {
        &self.resources
    }

    /// Claims the slot and gets the process ready to run tests.
    pub fn init(&mut self) -> Result<(), WorkerError> {
        if !self.ctx.claim(self.pid.as_raw()) {
            return Err(WorkerError::SlotTaken {
                slot: self.slot,
                holder: self.ctx.pid(),
            });
        }

        signals::install_stop_handlers(self.run.state).map_err(WorkerError::Signals)?;
        self.rng.reseed(self.run.config.seed, self.slot);

        if self.run.config.mode == Mode::Smart {
            self.run.probes.inject(&mut self.probe)?;
        }

        // Counted before marked: dying in between leaks one count instead of
        // letting the reaper decrement a count that was never taken.
        self.run.state.worker_started();
        self.ctx.mark_counted();
        self.ctx.set_phase(Phase::Idle);

        debug!("worker {} running as {}", self.slot, self.pid);
        Ok(())
    }

    pub fn run_dumb(&mut self) -> Result<(), WorkerError> {
        while !self.run.should_stop() {
            let index = pick_syscall(&mut self.rng, self.run.table.len());
            self.run_test(index)?;
        }
        Ok(())
    }

    pub fn run_smart(&mut self, port: &Port) -> Result<(), WorkerError> {
        while !self.run.should_stop() {
            let job = match port.receive() {
                Err(ChannelError::Interrupted) => continue,
                other => other?,
            };
            let Some(job) = job else {
                if self.run.should_stop() {
                    break;
                }
                error!("worker {}: job channel closed", self.slot);
                return Err(ChannelError::Closed.into());
            };

            match job.kind() {
                Some(JobKind::Genesis) => match self.run_test(job.syscall_index as usize) {
                    Err(WorkerError::Table(e)) => error!("worker {}: dropping job: {e}", self.slot),
                    other => {
                        other?;
                    }
                },
                Some(JobKind::NewGeneration) => trace!("worker {}: new generation", self.slot),
                None => error!("worker {}: unknown job kind {}", self.slot, job.kind),
            }
        }
        Ok(())
    }

    /// Runs one complete test of shadow entry `index`.
    pub fn run_test(&mut self, index: usize) -> Result<Outcome, WorkerError> {
        let run = self.run;
        let entry = run.table.get(index)?;

        self.ctx.select(index, entry.number, entry.arg_count, entry.needs_alarm);
        self.ctx.set_phase(Phase::Armed);

        self.generate_arguments(entry)?;
        (run.mutate)(self.ctx, &mut self.rng)?;

        let contexts = entry.contexts();
        run.sink
            .log_arguments(entry.arg_count, entry.name, &self.ctx.args(), &contexts)?;

        let outcome = self.invoke(entry)?;
        if outcome != Outcome::Returned {
            self.resume_from_checkpoint(entry, outcome);
        }

        self.finish(outcome)?;
        Ok(outcome)
    }

    fn generate_arguments(&mut self, entry: &ShadowEntry) -> Result<(), WorkerError> {
        for (position, arg) in entry.args.iter().enumerate() {
            self.ctx.set_current_arg(position);

            let mut slot = ArgSlot::default();
            let mut gen = GenerateCtx {
                worker: self.ctx,
                context: arg.context,
                rng: &mut self.rng,
                buffers: self.run.buffers,
                resources: &mut self.resources,
            };
            (arg.generate)(&mut slot, &mut gen).map_err(|source| {
                error!("{}: {} generator failed: {source}", entry.name, arg.generator);
                WorkerError::Generate {
                    syscall: entry.name,
                    position,
                    source,
                }
            })?;

            self.ctx.set_arg(position, slot.value);
            self.ctx.set_arg_size(position, slot.size);
            self.ctx.set_original(position, slot.value);
        }
        Ok(())
    }

    fn invoke(&mut self, entry: &ShadowEntry) -> Result<Outcome, WorkerError> {
        let args = self.ctx.args();
        let alarm = if self.ctx.needs_alarm() {
            self.run.config.alarm_secs
        } else {
            0
        };
        let invoke = entry.invoke;
        let number = entry.number;
        let ctx = self.ctx;
        let worker = self.pid;

        self.stats.tests += 1;
        self.run.state.test_started();
        ctx.stamp();
        ctx.set_phase(Phase::Invoking);

        match unsafe { fork() }.map_err(WorkerError::Fork)? {
            ForkResult::Child => {
                // Nothing but the call and plain stores from here on. The
                // call must not outlive the worker, whatever it blocks on.
                if set_pdeathsig(Signal::SIGKILL).is_err() || getppid() != worker {
                    unsafe { libc::_exit(ORPHANED_EXIT) }
                }
                if alarm > 0 {
                    unsafe { libc::alarm(alarm) };
                }
                let ret = invoke(number, &args);
                let errno = if ret < 0 {
                    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
                } else {
                    0
                };
                ctx.record_return(ret, errno);
                unsafe { libc::_exit(0) }
            }
            ForkResult::Parent { child } => self.supervise(child),
        }
    }

    fn supervise(&self, child: Pid) -> Result<Outcome, WorkerError> {
        let mut stopped_by = None;
        loop {
            match waitpid(child, Some(WaitPidFlag::WUNTRACED)) {
                Ok(WaitStatus::Exited(_, 0)) => return Ok(Outcome::Returned),
                Ok(WaitStatus::Exited(_, code)) => return Ok(Outcome::Exited(code)),
                Ok(WaitStatus::Signaled(_, Signal::SIGALRM, _)) => return Ok(Outcome::TimedOut),
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    return Ok(match stopped_by {
                        Some(stop) => Outcome::Stopped(stop),
                        None => Outcome::Faulted(signal),
                    })
                }
                Ok(WaitStatus::Stopped(_, signal)) => {
                    warn!("invocation {child} stopped by {signal}, killing it");
                    stopped_by = Some(signal);
                    if let Err(e) = kill(child, Signal::SIGKILL) {
                        error!("can't kill stopped invocation {child}: {e}");
                    }
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!("waiting for invocation {child}: {e}");
                    return Err(WorkerError::Wait(e));
                }
            }
        }
    }

    fn resume_from_checkpoint(&mut self, entry: &ShadowEntry, outcome: Outcome) {
        debug_assert_eq!(self.ctx.phase(), Phase::Invoking);

        self.ctx.set_resumed(true);
        self.ctx.record_fault(outcome.signal());
        self.run.state.fault_recovered();
        self.stats.faults += 1;

        warn!(
            "worker {}: {} {}",
            self.slot,
            entry.name,
            outcome.describe(self.run.config.alarm_secs)
        );
    }

    fn finish(&mut self, outcome: Outcome) -> Result<(), WorkerError> {
        if outcome == Outcome::Returned && self.ctx.return_value() < 0 {
            self.ctx.record_error();
        }
        self.ctx.set_phase(Phase::Completed);

        let text = match outcome {
            Outcome::Returned => Cow::Borrowed(self.ctx.error_description()),
            other => Cow::Owned(other.describe(self.run.config.alarm_secs)),
        };
        let logged = self
            .run
            .sink
            .log_results(self.ctx.had_error(), self.ctx.return_value(), &text);

        self.free_old_arguments();
        self.ctx.set_phase(Phase::Idle);

        logged?;
        Ok(())
    }

    /// Releases whatever the generators created for the current test, by the
    /// original value of each argument. Returns the number of failures.
    pub fn free_old_arguments(&mut self) -> usize {
        let Ok(entry) = self.run.table.get(self.ctx.syscall_index()) else {
            return 0;
        };

        self.stats.cleanups += 1;
        let mut failures = 0;

        for (i, arg) in entry.args.iter().enumerate() {
            let original = self.ctx.original(i);
            let result = match arg.context.cleanup {
                Cleanup::Descriptor => self.resources.free_descriptor(original),
                Cleanup::Socket => self.resources.free_socket(original),
                Cleanup::FilePath => self.resources.free_filepath(original),
                Cleanup::DirPath => self.resources.free_dirpath(original),
                Cleanup::SharedBuffer => {
                    self.resources
                        .free_buffer(self.run.buffers, original, self.ctx.arg_size(i))
                }
                Cleanup::Process | Cleanup::Nothing => Ok(()),
            };

            if let Err(e) = result {
                error!("{}: can't free argument {i}: {e}", entry.name);
                failures += 1;
            }
        }

        self.stats.cleanup_failures += failures as u64;
        failures
    }

    /// Tears the worker down and gives its slot back. Returns the exit code
    /// the process should use.
    pub fn exit(mut self, code: i32) -> i32 {
        let mut code = code;

        if self.probe.injected {
            if let Err(e) = self.run.probes.cleanup(&mut self.probe) {
                error!("{e}");
                code = 1;
            }
        }

        self.resources.release_all(self.run.buffers);
        self.ctx.release(self.pid.as_raw(), self.run.state);

        info!(
            "worker {} ({}) exiting: {} tests, {} faults recovered",
            self.slot, self.pid, self.stats.tests, self.stats.faults
        );
        code
    }
}

/// Entry point of a freshly forked worker process.
pub fn worker_main(run: &Run<'_>, slot: usize, port: Port) -> i32 {
    let mut worker = match Worker::new(run, slot) {
        Ok(worker) => worker,
        Err(e) => {
            error!("worker {slot} can't start: {e}");
            return 1;
        }
    };

    if let Err(e) = worker.init() {
        error!("worker {slot} initialization failed: {e}");
        return worker.exit(1);
    }

    if let Err(e) = port.acknowledge(worker.pid) {
        error!("worker {slot} can't acknowledge: {e}");
        return worker.exit(1);
    }

    let result = match run.config.mode {
        Mode::Dumb => worker.run_dumb(),
        Mode::Smart => worker.run_smart(&port),
    };

    match result {
        Ok(()) => worker.exit(0),
        Err(e) => {
            error!("worker {slot} stopping: {e}");
            worker.exit(1)
        }
    }
}
