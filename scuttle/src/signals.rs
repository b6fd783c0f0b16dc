// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::context::RunState;

static STOP_TARGET: AtomicPtr<RunState> = AtomicPtr::new(ptr::null_mut());

extern "C" fn request_stop(_: libc::c_int) {
    let state = STOP_TARGET.load(Ordering::Acquire);
    if !state.is_null() {
        // SAFETY: the run state lives in shared memory that outlives every
        // process this handler is installed in.
        unsafe { (*state).request_stop() }
    }
}

/// Makes SIGINT and SIGTERM set the stop flag of `state`. Blocking calls are
/// not restarted, so waits return `EINTR` and loops see the flag promptly.
pub fn install_stop_handlers(state: &RunState) -> nix::Result<()> {
    STOP_TARGET.store(ptr::from_ref(state).cast_mut(), Ordering::Release);

    let action = SigAction::new(
        SigHandler::Handler(request_stop),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(signal, &action)? };
    }

    // Writes to a closed socket are test outcomes, not a reason to die.
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(Signal::SIGPIPE, &ignore)? };

    Ok(())
}
