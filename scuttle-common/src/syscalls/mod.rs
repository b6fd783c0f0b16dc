// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Linux descriptor tables. `generic` holds the calls every supported
//! architecture shares, the per-architecture modules add the legacy calls only
//! some of them still carry.

use crate::Descriptor;

mod generic;

#[cfg(aarch64)]
mod aarch64;
#[cfg(aarch64)]
use aarch64::ARCH_DESCRIPTORS;

#[cfg(x86_64)]
mod x86_64;
#[cfg(x86_64)]
use x86_64::ARCH_DESCRIPTORS;

#[cfg(not(any(aarch64, x86_64)))]
compile_error!("Unsupported architecture. Currently only aarch64 and x86_64 are supported.");

pub use generic::GENERIC_DESCRIPTORS;

/// Every descriptor known for the running platform, in table order.
pub fn descriptors() -> impl Iterator<Item = &'static Descriptor> + Clone {
    GENERIC_DESCRIPTORS.iter().chain(ARCH_DESCRIPTORS.iter())
}
