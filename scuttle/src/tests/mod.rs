// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{cell::RefCell, path::PathBuf};

use scuttle_common::{Descriptor, ARG_BUF_LEN};

use crate::{
    arg_context::ArgTypeContext,
    config::Config,
    context::{context_pool, RunState, WorkerSlots},
    generate::GeneratorRegistry,
    mutate::MutateFn,
    pool::BlockPool,
    probe::NoProbes,
    run::Run,
    sink::{format_call, SinkError, TestSink},
    table::{InvokeFn, TableBuilder},
};

mod channel;
mod config;
mod lifecycle;
mod pool;
mod sink;

/// Test fixtures outlive every test that forks, leaking them keeps the
/// lifetimes simple.
pub(crate) fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

pub(crate) fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("scuttle-test-{name}-{}", std::process::id()))
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    pub calls: RefCell<Vec<String>>,
    pub results: RefCell<Vec<(bool, i64, String)>>,
}

impl TestSink for RecordingSink {
    fn log_arguments(
        &self,
        count: usize,
        name: &str,
        values: &[u64],
        contexts: &[&ArgTypeContext],
    ) -> Result<(), SinkError> {
        self.calls
            .borrow_mut()
            .push(format_call(count, name, values, contexts));
        Ok(())
    }

    fn log_results(&self, had_error: bool, return_value: i64, error_text: &str) -> Result<(), SinkError> {
        self.results
            .borrow_mut()
            .push((had_error, return_value, error_text.to_owned()));
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub run: &'static Run<'static>,
    pub sink: &'static RecordingSink,
}

pub(crate) fn fixture(
    descriptors: &[Descriptor],
    invoke: InvokeFn,
    mutate: MutateFn,
    config: Config,
) -> Fixture {
    fixture_with(GeneratorRegistry::builtin(), descriptors, invoke, mutate, config)
}

pub(crate) fn fixture_with(
    registry: GeneratorRegistry,
    descriptors: &[Descriptor],
    invoke: InvokeFn,
    mutate: MutateFn,
    config: Config,
) -> Fixture {
    let config = leak(config);
    let table = leak(
        TableBuilder::new(&registry)
            .invoker(invoke)
            .build(descriptors)
            .unwrap(),
    );

    let contexts = leak(context_pool(config.workers).unwrap());
    let state = contexts.alloc_shared(RunState::default()).unwrap();
    let slots = leak(WorkerSlots::new(contexts, config.workers).unwrap());
    let buffers = leak(BlockPool::create(ARG_BUF_LEN, config.workers * 8).unwrap());
    let sink = leak(RecordingSink::default());

    let run = leak(Run {
        config,
        table,
        state,
        slots,
        buffers,
        sink,
        probes: &NoProbes,
        mutate,
    });

    Fixture { run, sink }
}

pub(crate) fn config(name: &str, workers: usize) -> Config {
    Config {
        workers,
        scratch_dir: scratch(name),
        alarm_secs: 1,
        ..Config::default()
    }
}

pub(crate) fn returns_zero(_: i64, _: &[u64]) -> i64 {
    0
}
