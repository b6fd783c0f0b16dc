// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use log::trace;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe setup for worker {slot} failed: {reason}")]
    Inject { slot: usize, reason: String },
    #[error("probe teardown for worker {slot} failed: {reason}")]
    Cleanup { slot: usize, reason: String },
}

/// What a worker knows about its own probes.
#[derive(Debug, Default)]
pub struct ProbeHandle {
    pub slot: usize,
    pub injected: bool,
}

/// Instrumentation attached to a worker for the smart mode's feedback.
pub trait ProbeInjector {
    fn inject(&self, handle: &mut ProbeHandle) -> Result<(), ProbeError>;
    fn cleanup(&self, handle: &mut ProbeHandle) -> Result<(), ProbeError>;
}

pub struct NoProbes;

impl ProbeInjector for NoProbes {
    fn inject(&self, handle: &mut ProbeHandle) -> Result<(), ProbeError> {
        trace!("no probes to inject for worker {}", handle.slot);
        handle.injected = true;
        Ok(())
    }

    fn cleanup(&self, handle: &mut ProbeHandle) -> Result<(), ProbeError> {
        handle.injected = false;
        Ok(())
    }
}
