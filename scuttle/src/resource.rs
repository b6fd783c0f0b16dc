// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Per-worker bookkeeping of everything a generator created for a test.
//!
//! Generators hand the kernel raw integers: descriptor numbers, pointers to
//! path strings, pointers into pool blocks. The owning Rust value is parked
//! here, keyed by that raw value, until the cleanup pass asks for it back by
//! the argument's original value.

use std::{
    collections::HashMap,
    ffi::CString,
    fs::{self, OpenOptions},
    io,
    os::{
        fd::{AsRawFd, OwnedFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
};

use log::{trace, warn};
use nix::{
    errno::Errno,
    sys::socket::{socket, AddressFamily, SockFlag, SockType},
};
use thiserror::Error;

use crate::pool::{Block, BlockPool};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("no {kind} tracked for value {value:#x}")]
    NotTracked { kind: &'static str, value: u64 },
    #[error("buffer {value:#x} recorded as {recorded} bytes, cleanup asked for {requested}")]
    SizeMismatch {
        value: u64,
        recorded: u64,
        requested: u64,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Errno(#[from] Errno),
}

struct TrackedPath {
    c_path: CString,
    path: PathBuf,
}

impl TrackedPath {
    fn new(path: PathBuf) -> Result<Self, ResourceError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(TrackedPath { c_path, path })
    }

    fn raw(&self) -> u64 {
        self.c_path.as_ptr() as u64
    }
}

pub struct Resources<'p> {
    scratch: PathBuf,
    serial: u64,
    descriptors: HashMap<u64, OwnedFd>,
    sockets: HashMap<u64, OwnedFd>,
    files: HashMap<u64, TrackedPath>,
    dirs: HashMap<u64, TrackedPath>,
    buffers: HashMap<u64, Block<'p>>,
}

fn remove_if_present(result: io::Result<()>) -> Result<(), ResourceError> {
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl<'p> Resources<'p> {
    /// Files and directories are created under `scratch`, which is created if
    /// needed and removed again by [`Resources::release_all`].
    pub fn new(scratch: PathBuf) -> Result<Self, ResourceError> {
        fs::create_dir_all(&scratch)?;
        Ok(Resources {
            scratch,
            serial: 0,
            descriptors: HashMap::new(),
            sockets: HashMap::new(),
            files: HashMap::new(),
            dirs: HashMap::new(),
            buffers: HashMap::new(),
        })
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Number of resources still waiting for cleanup.
    pub fn outstanding(&self) -> usize {
        self.descriptors.len()
            + self.sockets.len()
            + self.files.len()
            + self.dirs.len()
            + self.buffers.len()
    }

    fn next_path(&mut self, prefix: &str) -> PathBuf {
        self.serial += 1;
        self.scratch.join(format!("{prefix}-{}", self.serial))
    }

    /// Opens a fresh scratch file for reading and writing.
    pub fn open_file(&mut self) -> Result<u64, ResourceError> {
        let path = self.next_path("fd");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        // The descriptor stays usable after the name is gone.
        fs::remove_file(&path)?;

        let fd: OwnedFd = file.into();
        let raw = fd.as_raw_fd() as u64;
        self.descriptors.insert(raw, fd);
        Ok(raw)
    }

    /// Opens a fresh scratch directory, for `*at()` calls and friends.
    pub fn open_dir(&mut self) -> Result<u64, ResourceError> {
        let path = self.next_path("dirfd");
        fs::create_dir(&path)?;
        let dir = fs::File::open(&path);
        fs::remove_dir(&path)?;

        let fd: OwnedFd = dir?.into();
        let raw = fd.as_raw_fd() as u64;
        self.descriptors.insert(raw, fd);
        Ok(raw)
    }

    /// Creates a scratch file and returns a pointer to its NUL-terminated
    /// absolute path.
    pub fn create_file(&mut self) -> Result<u64, ResourceError> {
        let path = self.next_path("file");
        fs::write(&path, b"scuttle")?;
        let tracked = TrackedPath::new(path)?;
        let raw = tracked.raw();
        self.files.insert(raw, tracked);
        Ok(raw)
    }

    pub fn create_dir(&mut self) -> Result<u64, ResourceError> {
        let path = self.next_path("dir");
        fs::create_dir(&path)?;
        let tracked = TrackedPath::new(path)?;
        let raw = tracked.raw();
        self.dirs.insert(raw, tracked);
        Ok(raw)
    }

    pub fn open_socket(&mut self, family: AddressFamily, ty: SockType) -> Result<u64, ResourceError> {
        let fd = socket(family, ty, SockFlag::SOCK_CLOEXEC, None)?;
        let raw = fd.as_raw_fd() as u64;
        self.sockets.insert(raw, fd);
        Ok(raw)
    }

    /// Parks a pool block; the returned value is its payload address.
    pub fn track_buffer(&mut self, block: Block<'p>) -> u64 {
        let raw = block.as_ptr() as u64;
        self.buffers.insert(raw, block);
        raw
    }

    pub fn free_descriptor(&mut self, original: u64) -> Result<(), ResourceError> {
        let fd = self
            .descriptors
            .remove(&original)
            .ok_or(ResourceError::NotTracked {
                kind: "descriptor",
                value: original,
            })?;
        trace!("closing descriptor {}", fd.as_raw_fd());
        drop(fd);
        Ok(())
    }

    pub fn free_socket(&mut self, original: u64) -> Result<(), ResourceError> {
        self.sockets
            .remove(&original)
            .map(drop)
            .ok_or(ResourceError::NotTracked {
                kind: "socket",
                value: original,
            })
    }

    /// Removes the scratch file. The test may already have unlinked or
    /// renamed it, which is not an error.
    pub fn free_filepath(&mut self, original: u64) -> Result<(), ResourceError> {
        let tracked = self
            .files
            .remove(&original)
            .ok_or(ResourceError::NotTracked {
                kind: "file path",
                value: original,
            })?;
        remove_if_present(fs::remove_file(&tracked.path))
    }

    pub fn free_dirpath(&mut self, original: u64) -> Result<(), ResourceError> {
        let tracked = self
            .dirs
            .remove(&original)
            .ok_or(ResourceError::NotTracked {
                kind: "directory path",
                value: original,
            })?;
        remove_if_present(fs::remove_dir_all(&tracked.path))
    }

    /// Returns the block behind `original` to `pool`. `size` is the size the
    /// context recorded for the argument and has to match the block's.
    pub fn free_buffer(&mut self, pool: &BlockPool, original: u64, size: u64) -> Result<(), ResourceError> {
        let recorded = match self.buffers.get(&original) {
            Some(block) => block.len() as u64,
            None => {
                return Err(ResourceError::NotTracked {
                    kind: "buffer",
                    value: original,
                })
            }
        };

        if recorded != size {
            return Err(ResourceError::SizeMismatch {
                value: original,
                recorded,
                requested: size,
            });
        }

        if let Some(block) = self.buffers.remove(&original) {
            pool.release(block);
        }
        Ok(())
    }

    /// Drops everything still tracked and removes the scratch directory.
    /// Used when the worker exits.
    pub fn release_all(&mut self, pool: &BlockPool) {
        let leftover = self.outstanding();
        if leftover > 0 {
            warn!("releasing {leftover} resources that were never cleaned up");
        }

        self.descriptors.clear();
        self.sockets.clear();
        self.files.clear();
        self.dirs.clear();
        for (_, block) in self.buffers.drain() {
            pool.release(block);
        }

        if let Err(e) = remove_if_present(fs::remove_dir_all(&self.scratch)) {
            warn!("can't remove scratch directory {}: {e}", self.scratch.display());
        }
    }
}
