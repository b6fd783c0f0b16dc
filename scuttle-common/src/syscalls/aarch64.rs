// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use crate::{descriptor, Descriptor};

// The asm-generic table dropped the legacy path-only calls, ppoll with an
// empty set is the closest thing to pause() left.
pub static ARCH_DESCRIPTORS: &[Descriptor] = &[
    descriptor!("ppoll", libc::SYS_ppoll, [Address => "address", Int => "int", Address => "address", Address => "address", Length => "length"], root: false, alarm: true),
];
