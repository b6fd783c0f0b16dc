// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

#![no_std]

pub mod arg_types;
pub mod descriptor;
pub mod job;
pub mod syscalls;

pub use arg_types::ArgType;
pub use descriptor::{ArgDescriptor, Descriptor, Status};
pub use job::{Job, JobKind, JOB_FRAME_SIZE};

/// Most arguments any syscall takes on the supported platforms.
pub const ARG_LIMIT: usize = 6;

/// Size of the shared buffers handed to syscalls taking a `void *`.
pub const ARG_BUF_LEN: usize = 4096;
