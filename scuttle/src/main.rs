// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use log::{info, warn};
use scuttle::{
    config::{select_syscalls, Config, Mode},
    context::{context_pool, RunState, WorkerSlots},
    generate::GeneratorRegistry,
    lifecycle::{RandomGenesis, Supervisor},
    mutate::mutate_arguments,
    platform,
    pool::BlockPool,
    probe::NoProbes,
    run::Run,
    sink::{FileSink, LogSink, TestSink},
    table::{ShadowTable, TableBuilder},
};
use scuttle_common::ARG_BUF_LEN;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How syscalls are picked
    #[arg(long, value_enum, default_value_t = Mode::default())]
    mode: Mode,

    /// Number of worker processes, defaults to the number of cores
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Stop after this many tests
    #[arg(short = 'n', long)]
    max_tests: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Seconds a blocking syscall may take before it is interrupted
    #[arg(long, default_value_t = 1)]
    timeout: u32,

    /// Seed for reproducible argument generation
    #[arg(long)]
    seed: Option<u64>,

    /// Syscall(s) to fuzz (can be repeated or comma-separated)
    #[arg(short = 'e', long = "syscall", value_delimiter = ',', action = clap::ArgAction::Append)]
    syscalls: Vec<String>,

    /// Where workers create their scratch files
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Append test records to this file instead of the log
    #[arg(long)]
    record: Option<PathBuf>,

    /// Print the syscall table and exit
    #[arg(long)]
    list: bool,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config {
            mode: self.mode,
            max_tests: self.max_tests,
            duration: self.duration.map(Duration::from_secs),
            alarm_secs: self.timeout,
            seed: self.seed,
            ..Config::default()
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(dir) = &self.scratch_dir {
            config.scratch_dir = dir.clone();
        }
        config
    }
}

fn print_table(table: &ShadowTable) {
    for (index, entry) in table.iter().enumerate() {
        let args: Vec<&str> = entry.args.iter().map(|a| a.kind.name()).collect();
        println!(
            "{index:4} {:<20} nr={:<4} ({}){}",
            entry.name,
            entry.number,
            args.join(", "),
            if entry.needs_alarm { " [alarm]" } else { "" }
        );
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let descriptors = select_syscalls(scuttle_common::syscalls::descriptors(), &args.syscalls)?;
    let registry = GeneratorRegistry::builtin();
    let table = TableBuilder::new(&registry)
        .privileged(platform::running_as_root())
        .build(&descriptors)
        .context("building the syscall table")?;

    if args.list {
        print_table(&table);
        return Ok(());
    }

    let contexts = context_pool(config.workers).context("allocating worker contexts")?;
    let state = contexts
        .alloc_shared(RunState::default())
        .context("allocating the run state")?;
    let slots = WorkerSlots::new(&contexts, config.workers).context("allocating worker contexts")?;
    let buffers = BlockPool::create(ARG_BUF_LEN, config.workers * config.buffers_per_worker)
        .context("allocating argument buffers")?;

    if !platform::hardware_rng_available() {
        info!("No hardware random number generator, workers seed their own");
    }

    let file_sink = args
        .record
        .as_deref()
        .map(FileSink::create)
        .transpose()
        .context("opening the record file")?;
    let sink: &dyn TestSink = match &file_sink {
        Some(sink) => sink,
        None => &LogSink,
    };

    let run = Run {
        config: &config,
        table: &table,
        state,
        slots: &slots,
        buffers: &buffers,
        sink,
        probes: &NoProbes,
        mutate: mutate_arguments,
    };

    let mut supervisor = Supervisor::new(&run, Box::new(RandomGenesis::new(config.seed)));
    let result = supervisor.start_main_loop();

    if let Err(e) = fs::remove_dir_all(&config.scratch_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("can't remove {}: {e}", config.scratch_dir.display());
        }
    }

    result.context("supervising workers")
}
