// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use crate::{
    config::Config,
    context::{RunState, WorkerSlots},
    mutate::MutateFn,
    pool::BlockPool,
    probe::ProbeInjector,
    sink::TestSink,
    table::ShadowTable,
};

/// Everything a run shares between the supervisor and its workers. Built
/// before the first fork; workers get their copy of it through the fork.
pub struct Run<'a> {
    pub config: &'a Config,
    pub table: &'a ShadowTable,
    pub state: &'a RunState,
    pub slots: &'a WorkerSlots<'a>,
    /// Argument buffers handed out by the `buf` generator.
    pub buffers: &'a BlockPool,
    pub sink: &'a dyn TestSink,
    pub probes: &'a dyn ProbeInjector,
    pub mutate: MutateFn,
}

impl Run<'_> {
    /// True once the run was asked to stop or ran its test budget.
    pub fn should_stop(&self) -> bool {
        self.state.stop_requested()
            || self
                .config
                .max_tests
                .is_some_and(|max| self.state.tests() >= max)
    }
}
