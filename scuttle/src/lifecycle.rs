// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Keeps the configured number of workers alive until the run stops.
//!
//! Slots move `Empty -> Spawning -> Running -> Terminated -> Empty`. A worker
//! claims its slot's pid word itself; the slot is handed back by whoever
//! first notices the worker is gone, the worker on its way out or the reaper.

use std::{
    os::fd::{AsRawFd, RawFd},
    thread::sleep,
    time::Instant,
};

use log::{debug, error, info, trace, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{kill, Signal},
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};
use rand::Rng;
use scuttle_common::{Job, JobKind};
use thiserror::Error;

use crate::{
    channel::{spawn_with_channel, ChannelError, Port},
    config::Mode,
    context::SlotState,
    platform::FuzzRng,
    run::Run,
    worker::worker_main,
};

/// Jobs queued per worker and poll round at most.
const JOB_BATCH: usize = 8;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no worker could be started: {0}")]
    FirstSpawn(#[source] ChannelError),
    #[error("installing signal handlers: {0}")]
    Signals(Errno),
}

/// Decides what smart-mode workers run next.
pub trait JobProducer {
    fn next_job(&mut self, table_len: usize) -> Job;
}

/// Stands in for a real scheduler: every job is a `Genesis` of a uniformly
/// random table entry.
pub struct RandomGenesis {
    rng: FuzzRng,
}

impl RandomGenesis {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => FuzzRng::seeded(seed),
            None => FuzzRng::for_platform(),
        };
        RandomGenesis { rng }
    }
}

impl JobProducer for RandomGenesis {
    fn next_job(&mut self, table_len: usize) -> Job {
        let index = self.rng.gen_range(0..table_len.max(1));
        Job::new(JobKind::Genesis, index as u32)
    }
}

pub struct Supervisor<'r> {
    run: &'r Run<'r>,
    target: usize,
    children: Vec<Option<Pid>>,
    ports: Vec<Option<Port>>,
    producer: Box<dyn JobProducer + 'r>,
    ever_started: bool,
    started: Instant,
}

impl<'r> Supervisor<'r> {
    pub fn new(run: &'r Run<'r>, producer: Box<dyn JobProducer + 'r>) -> Self {
        let slots = run.slots.len();
        Supervisor {
            run,
            target: run.config.workers.min(slots),
            children: (0..slots).map(|_| None).collect(),
            ports: (0..slots).map(|_| None).collect(),
            producer,
            ever_started: false,
            started: Instant::now(),
        }
    }

    /// Pids of the workers this supervisor forked and has not reaped yet.
    pub fn children(&self) -> Vec<Pid> {
        self.children.iter().flatten().copied().collect()
    }

    pub fn start_main_loop(&mut self) -> Result<(), LifecycleError> {
        crate::signals::install_stop_handlers(self.run.state).map_err(LifecycleError::Signals)?;

        info!(
            "Starting {} {:?} workers on {} syscalls",
            self.target,
            self.run.config.mode,
            self.run.table.len()
        );
        self.started = Instant::now();

        while !self.run.state.stop_requested() {
            self.reap();

            if self.limits_reached() {
                self.run.state.request_stop();
                break;
            }

            if (self.run.state.running() as usize) < self.target {
                self.spawn_workers()?;
            }

            if self.run.config.mode == Mode::Smart {
                self.feed_jobs();
            }

            sleep(self.run.config.poll_interval);
        }

        info!("Stopping workers");
        self.shutdown();
        Ok(())
    }

    fn limits_reached(&self) -> bool {
        if let Some(max) = self.run.config.max_tests {
            if self.run.state.tests() >= max {
                info!("Reached {max} tests");
                return true;
            }
        }

        if let Some(duration) = self.run.config.duration {
            if self.started.elapsed() >= duration {
                info!("Ran for {duration:?}");
                return true;
            }
        }

        false
    }

    /// Starts a worker in every empty slot.
    pub fn spawn_workers(&mut self) -> Result<(), LifecycleError> {
        for slot in 0..self.run.slots.len() {
            if self.children.iter().flatten().count() >= self.target {
                break;
            }

            let Some(ctx) = self.run.slots.by_index(slot) else {
                continue;
            };
            if !ctx.is_empty() || self.children[slot].is_some() {
                continue;
            }
            if !ctx.transition(SlotState::Empty, SlotState::Spawning) {
                continue;
            }

            match self.spawn_worker(slot) {
                Ok(()) => {
                    ctx.transition(SlotState::Spawning, SlotState::Running);
                    self.ever_started = true;
                }
                Err(e) => {
                    error!("can't start worker {slot}: {e}");
                    if ctx.state() == SlotState::Spawning {
                        ctx.set_state(SlotState::Empty);
                    }
                    if !self.ever_started {
                        return Err(LifecycleError::FirstSpawn(e));
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_worker(&mut self, slot: usize) -> Result<(), ChannelError> {
        let run = self.run;
        let inherited: Vec<RawFd> = self.ports.iter().flatten().map(|p| p.as_raw_fd()).collect();

        let (pid, port) = spawn_with_channel(move |port| {
            // Siblings' channels must not stay open in here, or a dead
            // supervisor never reads as end of stream to them.
            for fd in inherited {
                unsafe { libc::close(fd) };
            }
            worker_main(run, slot, port)
        })?;

        trace!("forked worker {slot} as {pid}");
        self.children[slot] = Some(pid);

        if let Err(e) = port.wait_ack(pid, run.config.handshake_timeout) {
            self.discard(slot, pid);
            return Err(e);
        }

        debug!("worker {slot} is up as {pid}");
        self.ports[slot] = Some(port);
        Ok(())
    }

    /// Gets rid of a worker that never finished its handshake.
    fn discard(&mut self, slot: usize, pid: Pid) {
        if let Err(e) = kill(pid, Signal::SIGKILL) {
            if e != Errno::ESRCH {
                error!("can't kill worker {pid}: {e}");
            }
        }
        loop {
            match waitpid(pid, None) {
                Err(Errno::EINTR) => continue,
                Ok(status) => {
                    self.worker_gone(slot, pid, status);
                    break;
                }
                Err(e) => {
                    error!("can't reap worker {pid}: {e}");
                    self.worker_gone(slot, pid, WaitStatus::StillAlive);
                    break;
                }
            }
        }
    }

    fn feed_jobs(&mut self) {
        let table_len = self.run.table.len();
        for slot in 0..self.ports.len() {
            let Some(port) = &self.ports[slot] else {
                continue;
            };

            for _ in 0..JOB_BATCH {
                let job = self.producer.next_job(table_len);
                match port.try_send(&job) {
                    Ok(true) => (),
                    Ok(false) => break,
                    Err(e) => {
                        debug!("worker {slot} stopped taking jobs: {e}");
                        self.ports[slot] = None;
                        break;
                    }
                }
            }
        }
    }

    /// Collects every exited worker without blocking.
    pub fn reap(&mut self) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    let Some(pid) = status.pid() else {
                        continue;
                    };
                    match self.slot_of(pid) {
                        Some(slot) => self.worker_gone(slot, pid, status),
                        None => warn!("reaped unknown child {pid}"),
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break,
                Err(e) => {
                    error!("waitpid: {e}");
                    break;
                }
            }
        }
    }

    fn slot_of(&self, pid: Pid) -> Option<usize> {
        self.children
            .iter()
            .position(|c| *c == Some(pid))
            .or_else(|| self.run.slots.index_of_pid(pid.as_raw()))
    }

    fn worker_gone(&mut self, slot: usize, pid: Pid, status: WaitStatus) {
        match status {
            WaitStatus::Exited(_, 0) => debug!("worker {slot} ({pid}) exited"),
            WaitStatus::Exited(_, code) => warn!("worker {slot} ({pid}) exited with status {code}"),
            WaitStatus::Signaled(_, signal, _) => warn!("worker {slot} ({pid}) killed by {signal}"),
            other => trace!("worker {slot} ({pid}) gone: {other:?}"),
        }

        let reclaimed = self.run.buffers.reclaim_owned_by(pid.as_raw());
        if reclaimed > 0 {
            debug!("reclaimed {reclaimed} buffers from worker {slot}");
        }

        if let Some(ctx) = self.run.slots.by_index(slot) {
            ctx.release(pid.as_raw(), self.run.state);
        }

        if self.children[slot] == Some(pid) {
            self.children[slot] = None;
            self.ports[slot] = None;
        }
    }

    /// Kills and reaps every worker, then gives their slots and buffers back.
    /// Failures are logged and do not stop the sweep.
    pub fn kill_all_children(&mut self) {
        let mut victims: Vec<(usize, Pid)> = self
            .children
            .iter()
            .enumerate()
            .filter_map(|(slot, c)| c.map(|pid| (slot, pid)))
            .collect();

        for (slot, ctx) in self.run.slots.iter().enumerate() {
            let raw = ctx.pid();
            if !ctx.is_empty() && !victims.iter().any(|(_, p)| p.as_raw() == raw) {
                victims.push((slot, Pid::from_raw(raw)));
            }
        }

        for &(_, pid) in &victims {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                if e != Errno::ESRCH {
                    error!("can't kill worker {pid}: {e}");
                }
            }
        }

        for (slot, pid) in victims {
            let status = loop {
                match waitpid(pid, None) {
                    Err(Errno::EINTR) => continue,
                    Ok(status) => break status,
                    Err(e) => {
                        if e != Errno::ECHILD {
                            error!("can't reap worker {pid}: {e}");
                        }
                        break WaitStatus::StillAlive;
                    }
                }
            };
            self.worker_gone(slot, pid, status);
        }
    }

    fn shutdown(&mut self) {
        self.run.state.request_stop();

        // Smart-mode workers blocked on their inbox wake up to end of stream.
        self.ports.iter_mut().for_each(|p| *p = None);

        let deadline = Instant::now() + self.run.config.shutdown_grace;
        while self.children.iter().any(Option::is_some) && Instant::now() < deadline {
            self.reap();
            sleep(self.run.config.poll_interval);
        }

        self.kill_all_children();

        info!(
            "{} tests run, {} faults recovered",
            self.run.state.tests(),
            self.run.state.faults()
        );
    }
}
