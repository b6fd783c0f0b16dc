// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{path::PathBuf, time::Duration};

use clap::ValueEnum;
use log::{error, warn};
use scuttle_common::Descriptor;
use thiserror::Error;

use crate::platform;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Pick syscalls uniformly at random.
    #[default]
    Dumb,
    /// Run the syscalls the supervisor sends down the job channel.
    Smart,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown syscall {0:?}")]
    UnknownSyscall(String),
    #[error("at least one worker is needed")]
    NoWorkers,
    #[error("the syscall timeout must be at least one second")]
    NoTimeout,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub workers: usize,
    pub max_tests: Option<u64>,
    pub duration: Option<Duration>,
    /// Seconds before a blocking call is interrupted by `SIGALRM`.
    pub alarm_secs: u32,
    pub seed: Option<u64>,
    pub scratch_dir: PathBuf,
    pub handshake_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    /// Number of argument buffers in the shared pool, per worker.
    pub buffers_per_worker: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::default(),
            workers: platform::core_count(),
            max_tests: None,
            duration: None,
            alarm_secs: 1,
            seed: None,
            scratch_dir: std::env::temp_dir().join(format!("scuttle-{}", std::process::id())),
            handshake_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(2),
            buffers_per_worker: 32,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            error!("worker count is zero");
            return Err(ConfigError::NoWorkers);
        }
        // Calls that need the alarm would otherwise block forever.
        if self.alarm_secs == 0 {
            error!("syscall timeout is zero");
            return Err(ConfigError::NoTimeout);
        }
        Ok(())
    }
}

/// Narrows `descriptors` to the named syscalls by disabling all others. An
/// empty `names` keeps the list as it is.
pub fn select_syscalls<'d, I>(descriptors: I, names: &[String]) -> Result<Vec<Descriptor>, ConfigError>
where
    I: IntoIterator<Item = &'d Descriptor>,
{
    let all: Vec<Descriptor> = descriptors.into_iter().copied().collect();
    if names.is_empty() {
        return Ok(all);
    }

    for name in names {
        match all.iter().find(|d| d.name == name) {
            None => {
                error!("syscall {name} is not supported by this build");
                return Err(ConfigError::UnknownSyscall(name.clone()));
            }
            Some(d) if !d.enabled() => warn!("syscall {name} is disabled, it will not be tested"),
            Some(_) => (),
        }
    }

    Ok(all
        .into_iter()
        .map(|d| {
            if names.iter().any(|n| n == d.name) {
                d
            } else {
                d.disabled()
            }
        })
        .collect())
}
