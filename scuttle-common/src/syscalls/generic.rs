// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use crate::{descriptor, Descriptor};

pub static GENERIC_DESCRIPTORS: &[Descriptor] = &[
    descriptor!("read", libc::SYS_read, [FileDesc => "fd", VoidBuf => "buf", Length => "length"]),
    descriptor!("write", libc::SYS_write, [FileDesc => "fd", VoidBuf => "buf", Length => "length"]),
    descriptor!("openat", libc::SYS_openat, [FileDesc => "dirfd", FilePath => "path", OpenFlags => "open_flags", Mode => "mode"]),
    descriptor!("close", libc::SYS_close, [FileDesc => "fd"]),
    descriptor!("lseek", libc::SYS_lseek, [FileDesc => "fd", Offset => "offset", Whence => "whence"]),
    descriptor!("dup", libc::SYS_dup, [FileDesc => "fd"]),
    descriptor!("dup3", libc::SYS_dup3, [FileDesc => "fd", FileDesc => "fd", OpenFlags => "open_flags"]),
    descriptor!("fsync", libc::SYS_fsync, [FileDesc => "fd"]),
    descriptor!("fdatasync", libc::SYS_fdatasync, [FileDesc => "fd"]),
    descriptor!("ftruncate", libc::SYS_ftruncate, [FileDesc => "fd", Length => "length"]),
    descriptor!("truncate", libc::SYS_truncate, [FilePath => "path", Length => "length"]),
    descriptor!("fallocate", libc::SYS_fallocate, [FileDesc => "fd", Int => "int", Offset => "offset", Length => "length"]),
    descriptor!("fadvise64", libc::SYS_fadvise64, [FileDesc => "fd", Offset => "offset", Length => "length", Int => "int"]),
    descriptor!("flock", libc::SYS_flock, [FileDesc => "fd", Int => "int"]),
    descriptor!("mkdirat", libc::SYS_mkdirat, [FileDesc => "dirfd", DirPath => "dirpath", Mode => "mode"]),
    descriptor!("unlinkat", libc::SYS_unlinkat, [FileDesc => "dirfd", FilePath => "path", AtFlags => "at_flags"]),
    descriptor!("fchmod", libc::SYS_fchmod, [FileDesc => "fd", Mode => "mode"]),
    descriptor!("fchmodat", libc::SYS_fchmodat, [FileDesc => "dirfd", FilePath => "path", Mode => "mode"]),
    descriptor!("faccessat", libc::SYS_faccessat, [FileDesc => "dirfd", FilePath => "path", Mode => "mode"]),
    descriptor!("readlinkat", libc::SYS_readlinkat, [FileDesc => "dirfd", FilePath => "path", VoidBuf => "buf", Length => "length"]),
    descriptor!("getdents64", libc::SYS_getdents64, [FileDesc => "dirfd", VoidBuf => "buf", Length => "length"]),
    descriptor!("fchdir", libc::SYS_fchdir, [FileDesc => "dirfd"]),
    descriptor!("getcwd", libc::SYS_getcwd, [VoidBuf => "buf", Length => "length"]),
    descriptor!("socket", libc::SYS_socket, [Int => "int", Int => "int", Int => "int"]),
    descriptor!("shutdown", libc::SYS_shutdown, [Socket => "socket", Int => "int"]),
    descriptor!("listen", libc::SYS_listen, [Socket => "socket", Int => "int"]),
    descriptor!("sendto", libc::SYS_sendto, [Socket => "socket", VoidBuf => "buf", Length => "length", Int => "int", Address => "address", Length => "length"]),
    descriptor!("recvfrom", libc::SYS_recvfrom, [Socket => "socket", VoidBuf => "buf", Length => "length", Int => "int", Address => "address", Address => "address"], root: false, alarm: true),
    descriptor!("madvise", libc::SYS_madvise, [Address => "address", Length => "length", Int => "int"]),
    descriptor!("mlock", libc::SYS_mlock, [Address => "address", Length => "length"]),
    descriptor!("munlock", libc::SYS_munlock, [Address => "address", Length => "length"]),
    descriptor!("getpid", libc::SYS_getpid, []),
    descriptor!("sched_yield", libc::SYS_sched_yield, []),
    descriptor!("getpgid", libc::SYS_getpgid, [Pid => "pid"]),
    descriptor!("getsid", libc::SYS_getsid, [Pid => "pid"]),
    descriptor!("sched_getscheduler", libc::SYS_sched_getscheduler, [Pid => "pid"]),
    descriptor!("kill", libc::SYS_kill, [Pid => "pid", Signal => "signal"]).disabled(),
    descriptor!("mount", libc::SYS_mount, [MountType => "mount_type", MountPath => "dirpath", MountType => "mount_type", MountFlags => "mount_flags", VoidBuf => "buf"], root: true, alarm: false),
    descriptor!("umount2", libc::SYS_umount2, [MountPath => "dirpath", MountFlags => "mount_flags"], root: true, alarm: false),
];
