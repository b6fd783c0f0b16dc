// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Argument generators and the registry the table builder resolves them from.

use std::{collections::HashMap, mem::size_of};

use log::trace;
use nix::{
    sys::socket::{AddressFamily, SockType},
    unistd::{getpid, getppid},
};
use rand::{seq::SliceRandom, Rng};
use thiserror::Error;

use crate::{
    arg_context::{ArgTypeContext, Cleanup},
    context::WorkerContext,
    platform::FuzzRng,
    pool::{BlockPool, PoolError},
    resource::{ResourceError, Resources},
};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no buffer for the argument: {0}")]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// The value a generator produces and the size of whatever it points at.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArgSlot {
    pub value: u64,
    pub size: u64,
}

pub struct GenerateCtx<'g, 'p> {
    pub worker: &'g WorkerContext,
    pub context: &'static ArgTypeContext,
    pub rng: &'g mut FuzzRng,
    pub buffers: &'p BlockPool,
    pub resources: &'g mut Resources<'p>,
}

pub type GenerateFn = fn(&mut ArgSlot, &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError>;

#[derive(Clone, Copy)]
struct Generator {
    generate: GenerateFn,
    /// Resource kind every value of this generator is tracked as. `None` for
    /// generators registered without saying.
    creates: Option<Cleanup>,
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<&'static str, Generator>,
}

impl GeneratorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for &(name, generate, creates) in BUILTIN {
            registry.register_creating(name, generate, creates);
        }
        registry
    }

    /// Registers a generator whose resources the table builder cannot check.
    /// Returns the generator previously registered under `name`, if any.
    pub fn register(&mut self, name: &'static str, generate: GenerateFn) -> Option<GenerateFn> {
        self.insert(name, Generator { generate, creates: None })
    }

    /// Registers a generator whose values are always released with `creates`;
    /// `Cleanup::Nothing` for plain values.
    pub fn register_creating(
        &mut self,
        name: &'static str,
        generate: GenerateFn,
        creates: Cleanup,
    ) -> Option<GenerateFn> {
        self.insert(
            name,
            Generator {
                generate,
                creates: Some(creates),
            },
        )
    }

    fn insert(&mut self, name: &'static str, generator: Generator) -> Option<GenerateFn> {
        self.generators.insert(name, generator).map(|g| g.generate)
    }

    pub fn get(&self, name: &str) -> Option<GenerateFn> {
        self.generators.get(name).map(|g| g.generate)
    }

    /// What the generator's values have to be released with, if known.
    pub fn creates(&self, name: &str) -> Option<Cleanup> {
        self.generators.get(name).and_then(|g| g.creates)
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

/// Whether values made by a generator that creates `creates` are released by
/// an argument cleaned up with `cleanup`.
pub fn releases(creates: Cleanup, cleanup: Cleanup) -> bool {
    let tracked = |c| {
        matches!(
            c,
            Cleanup::Descriptor
                | Cleanup::Socket
                | Cleanup::FilePath
                | Cleanup::DirPath
                | Cleanup::SharedBuffer
        )
    };
    if tracked(creates) || tracked(cleanup) {
        creates == cleanup
    } else {
        true
    }
}

static BUILTIN: &[(&str, GenerateFn, Cleanup)] = &[
    ("fd", gen_fd, Cleanup::Descriptor),
    ("dirfd", gen_dirfd, Cleanup::Descriptor),
    ("path", gen_path, Cleanup::FilePath),
    ("dirpath", gen_dirpath, Cleanup::DirPath),
    ("socket", gen_socket, Cleanup::Socket),
    ("buf", gen_buf, Cleanup::SharedBuffer),
    ("length", gen_bounded, Cleanup::Nothing),
    ("mode", gen_bounded, Cleanup::Nothing),
    ("offset", gen_bounded, Cleanup::Nothing),
    ("whence", gen_bounded, Cleanup::Nothing),
    ("int", gen_bounded, Cleanup::Nothing),
    ("signal", gen_bounded, Cleanup::Nothing),
    ("open_flags", gen_open_flags, Cleanup::Nothing),
    ("at_flags", gen_at_flags, Cleanup::Nothing),
    ("pid", gen_pid, Cleanup::Nothing),
    ("address", gen_address, Cleanup::Nothing),
    ("mount_type", gen_mount_type, Cleanup::Nothing),
    ("mount_flags", gen_mount_flags, Cleanup::Nothing),
];

fn gen_fd(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    slot.value = ctx.resources.open_file()?;
    slot.size = size_of::<libc::c_int>() as u64;
    Ok(())
}

fn gen_dirfd(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    slot.value = ctx.resources.open_dir()?;
    slot.size = size_of::<libc::c_int>() as u64;
    Ok(())
}

fn gen_path(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    slot.value = ctx.resources.create_file()?;
    Ok(())
}

fn gen_dirpath(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    slot.value = ctx.resources.create_dir()?;
    Ok(())
}

fn gen_socket(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    let family = *[AddressFamily::Unix, AddressFamily::Inet, AddressFamily::Inet6]
        .choose(&mut *ctx.rng)
        .unwrap_or(&AddressFamily::Unix);
    let ty = if ctx.rng.gen() {
        SockType::Stream
    } else {
        SockType::Datagram
    };
    slot.value = ctx.resources.open_socket(family, ty)?;
    slot.size = size_of::<libc::c_int>() as u64;
    Ok(())
}

/// A pool block filled with random bytes. Exhaustion is fatal for the worker.
fn gen_buf(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    let mut block = ctx.buffers.acquire()?;
    ctx.rng.fill(block.as_mut_slice());
    slot.size = block.len() as u64;
    slot.value = ctx.resources.track_buffer(block);
    Ok(())
}

/// Uniform within the type's bounds, with the edges picked more often.
fn gen_bounded(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    slot.value = match ctx.context.bounds {
        Some(b) => match ctx.rng.gen_range(0..8) {
            0 => b.min,
            1 => b.max,
            _ => ctx.rng.gen_range(b.min..=b.max),
        },
        None => ctx.rng.gen(),
    };
    Ok(())
}

fn random_flags(rng: &mut FuzzRng, flags: &[libc::c_int]) -> u64 {
    let picks = rng.gen_range(0..=3);
    flags
        .choose_multiple(rng, picks)
        .fold(0, |acc, &f| acc | f as u64)
}

fn gen_open_flags(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    const ACCESS: [libc::c_int; 3] = [libc::O_RDONLY, libc::O_WRONLY, libc::O_RDWR];
    const FLAGS: &[libc::c_int] = &[
        libc::O_CREAT,
        libc::O_EXCL,
        libc::O_TRUNC,
        libc::O_APPEND,
        libc::O_NONBLOCK,
        libc::O_DIRECTORY,
        libc::O_NOFOLLOW,
        libc::O_CLOEXEC,
        libc::O_SYNC,
        libc::O_NOATIME,
        libc::O_PATH,
    ];
    let access = ACCESS[ctx.rng.gen_range(0..ACCESS.len())] as u64;
    slot.value = access | random_flags(ctx.rng, FLAGS);
    Ok(())
}

fn gen_at_flags(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    const FLAGS: &[libc::c_int] = &[
        libc::AT_REMOVEDIR,
        libc::AT_SYMLINK_NOFOLLOW,
        libc::AT_EMPTY_PATH,
        libc::AT_NO_AUTOMOUNT,
    ];
    slot.value = random_flags(ctx.rng, FLAGS);
    Ok(())
}

/// Our own pid, our parent, init, or "the caller".
fn gen_pid(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    let pid = match ctx.rng.gen_range(0..4) {
        0 => 0,
        1 => 1,
        2 => getppid().as_raw(),
        _ => getpid().as_raw(),
    };
    slot.value = pid as u64;
    Ok(())
}

/// Addresses the kernel has to validate: NULL, kernel space, a low page and
/// random page-aligned user addresses that are most likely unmapped.
fn gen_address(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    slot.value = match ctx.rng.gen_range(0..4) {
        0 => 0,
        1 => u64::MAX & !0xfff,
        2 => 0x1000,
        _ => ctx.rng.gen_range(0x10..0x7fff_ffff_u64) << 12,
    };
    Ok(())
}

fn gen_mount_type(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    const TYPES: [&std::ffi::CStr; 5] = [c"tmpfs", c"ramfs", c"proc", c"sysfs", c"scuttlefs"];
    let name = TYPES[ctx.rng.gen_range(0..TYPES.len())];
    slot.value = name.as_ptr() as u64;
    slot.size = name.to_bytes_with_nul().len() as u64;
    Ok(())
}

fn gen_mount_flags(slot: &mut ArgSlot, ctx: &mut GenerateCtx<'_, '_>) -> Result<(), GenerateError> {
    const FLAGS: &[libc::c_int] = &[
        libc::MS_RDONLY as libc::c_int,
        libc::MS_NOSUID as libc::c_int,
        libc::MS_NODEV as libc::c_int,
        libc::MS_NOEXEC as libc::c_int,
        libc::MS_REMOUNT as libc::c_int,
        libc::MS_BIND as libc::c_int,
        libc::MNT_FORCE,
        libc::MNT_DETACH,
    ];
    slot.value = random_flags(ctx.rng, FLAGS);
    trace!("mount flags {:#x}", slot.value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use scuttle_common::ArgType;

    use super::*;
    use crate::arg_context::type_context;

    #[test]
    fn builtin_registry_covers_the_linux_tables() {
        let registry = GeneratorRegistry::builtin();
        for descriptor in scuttle_common::syscalls::descriptors() {
            for arg in descriptor.args {
                assert!(
                    registry.get(arg.generator).is_some(),
                    "{} uses unknown generator {}",
                    descriptor.name,
                    arg.generator
                );
            }
        }
    }

    #[test]
    fn register_replaces() {
        let mut registry = GeneratorRegistry::empty();
        assert!(registry.register("int", gen_bounded).is_none());
        assert!(registry.register("int", gen_pid).is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.creates("int"), None);
    }

    #[test]
    fn builtin_generators_match_the_linux_tables() {
        let registry = GeneratorRegistry::builtin();
        for descriptor in scuttle_common::syscalls::descriptors() {
            for arg in descriptor.args {
                let cleanup = crate::arg_context::type_context_for_tag(arg.type_tag)
                    .unwrap()
                    .cleanup;
                let creates = registry.creates(arg.generator).unwrap();
                assert!(
                    releases(creates, cleanup),
                    "{}: {} makes {creates:?}, argument is released as {cleanup:?}",
                    descriptor.name,
                    arg.generator
                );
            }
        }
    }

    #[test]
    fn resources_need_a_matching_cleanup() {
        assert!(releases(Cleanup::Descriptor, Cleanup::Descriptor));
        assert!(releases(Cleanup::Nothing, Cleanup::Process));
        assert!(!releases(Cleanup::FilePath, Cleanup::Descriptor));
        assert!(!releases(Cleanup::Nothing, Cleanup::SharedBuffer));
        assert!(!releases(Cleanup::Socket, Cleanup::Nothing));
    }

    #[test]
    fn bounded_values_stay_in_bounds() {
        let pool = BlockPool::create(64, 1).unwrap();
        let worker = WorkerContext::default();
        let scratch = std::env::temp_dir().join(format!("scuttle-gen-{}", std::process::id()));
        let mut resources = Resources::new(scratch).unwrap();
        let mut rng = FuzzRng::seeded(7);

        let context = type_context(ArgType::Whence).unwrap();
        let mut ctx = GenerateCtx {
            worker: &worker,
            context,
            rng: &mut rng,
            buffers: &pool,
            resources: &mut resources,
        };

        for _ in 0..200 {
            let mut slot = ArgSlot::default();
            gen_bounded(&mut slot, &mut ctx).unwrap();
            assert!(slot.value <= 4);
        }

        resources.release_all(&pool);
    }
}
