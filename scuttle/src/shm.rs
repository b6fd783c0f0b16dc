// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{ffi::c_void, num::NonZeroUsize, ptr::NonNull};

use log::{error, trace};
use nix::{
    errno::Errno,
    sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags},
};

/// An anonymous `MAP_SHARED` mapping. Forked children inherit it at the same
/// address, so plain pointers into it stay valid on both sides.
pub struct SharedMapping {
    ptr: NonNull<c_void>,
    len: NonZeroUsize,
}

// The mapping is only ever handed out as raw memory, whoever builds on top of
// it is responsible for synchronizing access (atomics or the pool lock).
unsafe impl Send for SharedMapping {}
unsafe impl Sync for SharedMapping {}

impl SharedMapping {
    /// Maps `len` zeroed bytes readable and writable by this process and every
    /// process forked from it afterwards.
    pub fn new(len: usize) -> Result<Self, Errno> {
        let len = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;

        let ptr = unsafe {
            mmap_anonymous(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_ANONYMOUS,
            )?
        };

        trace!("mapped {} shared bytes at {:p}", len, ptr);

        Ok(SharedMapping { ptr, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }
}

impl Drop for SharedMapping {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr, self.len.get()) } {
            error!("failed to unmap shared memory at {:p}: {e}", self.ptr);
        }
    }
}
