// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use crate::{descriptor, Descriptor};

pub static ARCH_DESCRIPTORS: &[Descriptor] = &[
    descriptor!("open", libc::SYS_open, [FilePath => "path", OpenFlags => "open_flags", Mode => "mode"]),
    descriptor!("creat", libc::SYS_creat, [FilePath => "path", Mode => "mode"]),
    descriptor!("access", libc::SYS_access, [FilePath => "path", Mode => "mode"]),
    descriptor!("mkdir", libc::SYS_mkdir, [DirPath => "dirpath", Mode => "mode"]),
    descriptor!("rmdir", libc::SYS_rmdir, [DirPath => "dirpath"]),
    descriptor!("pause", libc::SYS_pause, [], root: false, alarm: true),
];
