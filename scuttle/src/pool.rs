// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Fixed-capacity block allocator living entirely in shared memory.
//!
//! The header, the node array and every payload block sit in one
//! [`SharedMapping`], so all processes forked after [`BlockPool::create`]
//! observe the same free and allocated lists. List transitions happen under a
//! spinlock stored in the mapping itself; the lock word holds the pid of its
//! holder so the lock can be broken when that process is found dead.

use std::{
    hint::spin_loop,
    marker::PhantomData,
    mem::{align_of, size_of},
    ptr::NonNull,
    sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
};

use log::{error, trace, warn};
use nix::errno::Errno;
use thiserror::Error;

use crate::shm::SharedMapping;

/// Payload blocks start on this boundary, enough for any context record.
pub const BLOCK_ALIGN: usize = 64;

const NIL: u32 = u32::MAX;
const UNLOCKED: i32 = 0;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool geometry: {0}")]
    InvalidArgument(&'static str),
    #[error("mapping shared pool memory: {0}")]
    Map(#[from] Errno),
    #[error("shared pool exhausted, all {block_count} blocks are allocated")]
    Exhausted { block_count: u32 },
    #[error("value of {size} bytes (align {align}) does not fit a {block_size} byte block")]
    BlockTooSmall {
        size: usize,
        align: usize,
        block_size: usize,
    },
}

#[repr(C)]
struct PoolHeader {
    lock: AtomicI32,
    block_size: usize,
    block_count: u32,
    free_head: AtomicU32,
    allocated_head: AtomicU32,
    free_len: AtomicU32,
    allocated_len: AtomicU32,
}

#[repr(C)]
struct Node {
    next: AtomicU32,
    owner: AtomicI32,
    allocated: AtomicBool,
}

/// A payload block handed out by [`BlockPool::acquire`]. Holding the handle is
/// what makes the payload yours; give it back with [`BlockPool::release`].
#[derive(Debug)]
pub struct Block<'p> {
    index: u32,
    ptr: NonNull<u8>,
    len: usize,
    _pool: PhantomData<&'p BlockPool>,
}

impl Block<'_> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the block is on the allocated list and this handle is its
        // only owner until it is released.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// List membership of every block at one observation point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub free: Vec<u32>,
    pub allocated: Vec<u32>,
}

pub struct BlockPool {
    mapping: SharedMapping,
    nodes_offset: usize,
    payload_offset: usize,
    stride: usize,
}

struct PoolGuard<'a> {
    word: &'a AtomicI32,
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        self.word.store(UNLOCKED, Ordering::Release);
    }
}

fn align_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

fn current_pid() -> i32 {
    std::process::id() as i32
}

impl BlockPool {
    pub fn create(block_size: usize, block_count: usize) -> Result<Self, PoolError> {
        if block_size == 0 {
            error!("block_size is zero");
            return Err(PoolError::InvalidArgument("block_size is zero"));
        }

        if block_count == 0 {
            error!("block_count is zero");
            return Err(PoolError::InvalidArgument("block_count is zero"));
        }

        let count = u32::try_from(block_count)
            .ok()
            .filter(|&c| c != NIL)
            .ok_or(PoolError::InvalidArgument("block_count too large"))?;

        let nodes_offset = align_up(size_of::<PoolHeader>(), align_of::<Node>())
            .ok_or(PoolError::InvalidArgument("pool does not fit the address space"))?;
        let payload_offset = size_of::<Node>()
            .checked_mul(block_count)
            .and_then(|n| n.checked_add(nodes_offset))
            .and_then(|end| align_up(end, BLOCK_ALIGN))
            .ok_or(PoolError::InvalidArgument("pool does not fit the address space"))?;
        let stride = align_up(block_size, BLOCK_ALIGN)
            .ok_or(PoolError::InvalidArgument("block_size too large"))?;
        let len = stride
            .checked_mul(block_count)
            .and_then(|n| n.checked_add(payload_offset))
            .ok_or(PoolError::InvalidArgument("pool does not fit the address space"))?;

        let mapping = SharedMapping::new(len).inspect_err(|e| {
            error!("can't map {len} bytes for the shared pool: {e}");
        })?;

        let pool = BlockPool {
            mapping,
            nodes_offset,
            payload_offset,
            stride,
        };

        // SAFETY: the mapping is fresh, page aligned and large enough for the
        // header and `count` nodes. Nobody else can see it yet.
        unsafe {
            pool.mapping.as_ptr().cast::<PoolHeader>().write(PoolHeader {
                lock: AtomicI32::new(UNLOCKED),
                block_size,
                block_count: count,
                free_head: AtomicU32::new(NIL),
                allocated_head: AtomicU32::new(NIL),
                free_len: AtomicU32::new(0),
                allocated_len: AtomicU32::new(0),
            });

            let nodes = pool.mapping.as_ptr().add(nodes_offset).cast::<Node>();
            for i in 0..count {
                // Thread the free list in index order, block 0 is handed out first.
                let next = if i + 1 < count { i + 1 } else { NIL };
                nodes.add(i as usize).write(Node {
                    next: AtomicU32::new(next),
                    owner: AtomicI32::new(0),
                    allocated: AtomicBool::new(false),
                });
            }
        }

        let header = pool.header();
        header.free_head.store(0, Ordering::Relaxed);
        header.free_len.store(count, Ordering::Relaxed);

        trace!("created shared pool of {count} x {block_size} byte blocks ({len} bytes mapped)");

        Ok(pool)
    }

    fn header(&self) -> &PoolHeader {
        // SAFETY: written in create() and never moved.
        unsafe { &*self.mapping.as_ptr().cast::<PoolHeader>() }
    }

    fn node(&self, index: u32) -> &Node {
        debug_assert!(index < self.header().block_count);
        // SAFETY: index is bounded by block_count, nodes were initialized in create().
        unsafe {
            &*self
                .mapping
                .as_ptr()
                .add(self.nodes_offset)
                .cast::<Node>()
                .add(index as usize)
        }
    }

    fn payload(&self, index: u32) -> NonNull<u8> {
        // SAFETY: in bounds of the mapping, which is never null.
        unsafe {
            NonNull::new_unchecked(
                self.mapping
                    .as_ptr()
                    .add(self.payload_offset + self.stride * index as usize),
            )
        }
    }

    fn block(&self, index: u32) -> Block<'_> {
        Block {
            index,
            ptr: self.payload(index),
            len: self.block_size(),
            _pool: PhantomData,
        }
    }

    fn lock(&self) -> PoolGuard<'_> {
        let word = &self.header().lock;
        let me = current_pid();
        while word
            .compare_exchange_weak(UNLOCKED, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        PoolGuard { word }
    }

    pub fn block_size(&self) -> usize {
        self.header().block_size
    }

    pub fn block_count(&self) -> usize {
        self.header().block_count as usize
    }

    pub fn free_count(&self) -> usize {
        self.header().free_len.load(Ordering::Acquire) as usize
    }

    pub fn allocated_count(&self) -> usize {
        self.header().allocated_len.load(Ordering::Acquire) as usize
    }

    /// Moves the first free block onto the allocated list. An empty free list
    /// is reported, never waited on.
    pub fn acquire(&self) -> Result<Block<'_>, PoolError> {
        let header = self.header();
        let _guard = self.lock();

        let index = header.free_head.load(Ordering::Relaxed);
        if index == NIL {
            return Err(PoolError::Exhausted {
                block_count: header.block_count,
            });
        }

        let node = self.node(index);
        header
            .free_head
            .store(node.next.load(Ordering::Relaxed), Ordering::Relaxed);
        node.next
            .store(header.allocated_head.load(Ordering::Relaxed), Ordering::Relaxed);
        header.allocated_head.store(index, Ordering::Relaxed);
        node.owner.store(current_pid(), Ordering::Relaxed);
        node.allocated.store(true, Ordering::Relaxed);
        header.free_len.fetch_sub(1, Ordering::Relaxed);
        header.allocated_len.fetch_add(1, Ordering::Relaxed);

        Ok(self.block(index))
    }

    pub fn release(&self, block: Block<'_>) {
        let _guard = self.lock();
        if !self.unlink_allocated(block.index) {
            error!("block {} released but not on the allocated list", block.index);
            return;
        }
        self.push_free(block.index);
    }

    /// Carves `value` into a block that stays allocated for the life of the
    /// pool. The value is never dropped.
    pub fn alloc_shared<T: Sync>(&self, value: T) -> Result<&T, PoolError> {
        if size_of::<T>() > self.block_size() || align_of::<T>() > BLOCK_ALIGN {
            return Err(PoolError::BlockTooSmall {
                size: size_of::<T>(),
                align: align_of::<T>(),
                block_size: self.block_size(),
            });
        }

        let block = self.acquire()?;
        let ptr = block.as_ptr().cast::<T>();

        // SAFETY: the block is ours, large and aligned enough for T, and is
        // never released so the reference lives as long as the pool.
        unsafe {
            ptr.write(value);
            Ok(&*ptr)
        }
    }

    /// Returns every block owned by `pid` to the free list and breaks the pool
    /// lock if `pid` died holding it. Only call this for a process known dead.
    pub fn reclaim_owned_by(&self, pid: i32) -> usize {
        let header = self.header();
        if header
            .lock
            .compare_exchange(pid, UNLOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            warn!("process {pid} died holding the pool lock, breaking it");
        }

        let _guard = self.lock();
        let mut orphans = vec![];
        let mut cursor = header.allocated_head.load(Ordering::Relaxed);
        while cursor != NIL {
            let node = self.node(cursor);
            if node.owner.load(Ordering::Relaxed) == pid {
                orphans.push(cursor);
            }
            cursor = node.next.load(Ordering::Relaxed);
        }

        for &index in &orphans {
            if self.unlink_allocated(index) {
                self.push_free(index);
            }
        }

        if !orphans.is_empty() {
            trace!("reclaimed {} blocks left by {pid}", orphans.len());
        }

        orphans.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let header = self.header();
        let _guard = self.lock();
        let walk = |mut cursor: u32| {
            let mut out = vec![];
            while cursor != NIL {
                out.push(cursor);
                cursor = self.node(cursor).next.load(Ordering::Relaxed);
            }
            out
        };
        PoolSnapshot {
            free: walk(header.free_head.load(Ordering::Relaxed)),
            allocated: walk(header.allocated_head.load(Ordering::Relaxed)),
        }
    }

    // Both helpers below expect the lock to be held.

    fn unlink_allocated(&self, index: u32) -> bool {
        let header = self.header();
        let target = self.node(index);
        if !target.allocated.load(Ordering::Relaxed) {
            return false;
        }

        let mut prev: Option<&Node> = None;
        let mut cursor = header.allocated_head.load(Ordering::Relaxed);
        while cursor != NIL {
            let node = self.node(cursor);
            if cursor == index {
                let next = node.next.load(Ordering::Relaxed);
                match prev {
                    Some(p) => p.next.store(next, Ordering::Relaxed),
                    None => header.allocated_head.store(next, Ordering::Relaxed),
                }
                header.allocated_len.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
            prev = Some(node);
            cursor = node.next.load(Ordering::Relaxed);
        }

        false
    }

    fn push_free(&self, index: u32) {
        let header = self.header();
        let node = self.node(index);
        node.allocated.store(false, Ordering::Relaxed);
        node.owner.store(0, Ordering::Relaxed);
        node.next
            .store(header.free_head.load(Ordering::Relaxed), Ordering::Relaxed);
        header.free_head.store(index, Ordering::Relaxed);
        header.free_len.fetch_add(1, Ordering::Relaxed);
    }
}
