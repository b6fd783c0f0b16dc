// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{collections::BTreeSet, mem::size_of};

use nix::{
    sys::wait::{waitpid, WaitStatus},
    unistd::{fork, ForkResult},
};
use serial_test::serial;

use crate::{
    context::{RunState, WorkerContext},
    pool::{BlockPool, PoolError, PoolSnapshot},
};

fn assert_membership(snapshot: &PoolSnapshot, block_count: u32) {
    let free: BTreeSet<u32> = snapshot.free.iter().copied().collect();
    let allocated: BTreeSet<u32> = snapshot.allocated.iter().copied().collect();

    assert_eq!(free.len(), snapshot.free.len(), "block listed twice as free");
    assert_eq!(allocated.len(), snapshot.allocated.len(), "block listed twice as allocated");
    assert!(free.is_disjoint(&allocated));

    let all: BTreeSet<u32> = free.union(&allocated).copied().collect();
    assert_eq!(all, (0..block_count).collect());
}

#[test]
fn zero_geometry_is_rejected() {
    assert!(matches!(
        BlockPool::create(0, 4),
        Err(PoolError::InvalidArgument(_))
    ));
    assert!(matches!(
        BlockPool::create(64, 0),
        Err(PoolError::InvalidArgument(_))
    ));
}

#[test]
fn four_blocks_then_exhausted() {
    let pool = BlockPool::create(64, 4).unwrap();
    assert_eq!(pool.free_count(), 4);

    let blocks: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
    assert_eq!(pool.free_count(), 0);
    assert_eq!(pool.allocated_count(), 4);
    assert_membership(&pool.snapshot(), 4);

    assert!(matches!(
        pool.acquire(),
        Err(PoolError::Exhausted { block_count: 4 })
    ));

    let mut blocks = blocks.into_iter();
    let first = blocks.next().unwrap();
    let index = first.index();
    pool.release(first);
    assert_eq!(pool.free_count(), 1);
    assert_membership(&pool.snapshot(), 4);

    let again = pool.acquire().unwrap();
    assert_eq!(again.index(), index);

    pool.release(again);
    blocks.for_each(|b| pool.release(b));
    assert_eq!(pool.free_count(), 4);
    assert_membership(&pool.snapshot(), 4);
}

#[test]
fn blocks_do_not_overlap() {
    let pool = BlockPool::create(100, 3).unwrap();
    let mut blocks: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();

    for (i, block) in blocks.iter_mut().enumerate() {
        assert_eq!(block.len(), 100);
        assert_eq!(block.as_ptr() as usize % crate::pool::BLOCK_ALIGN, 0);
        block.as_mut_slice().fill(i as u8);
    }

    for (i, block) in blocks.iter_mut().enumerate() {
        assert!(block.as_mut_slice().iter().all(|&b| b == i as u8));
    }
}

#[test]
fn shared_values_need_room() {
    let pool = BlockPool::create(8, 2).unwrap();
    assert!(matches!(
        pool.alloc_shared(WorkerContext::default()),
        Err(PoolError::BlockTooSmall { .. })
    ));

    let pool = BlockPool::create(size_of::<RunState>(), 1).unwrap();
    let state = pool.alloc_shared(RunState::default()).unwrap();
    assert!(!state.stop_requested());
    assert_eq!(pool.free_count(), 0);
}

#[test]
#[serial]
fn children_see_the_same_lists() {
    let pool = BlockPool::create(64, 4).unwrap();

    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            // Leave with the block still allocated, like a crashed worker.
            let block = pool.acquire();
            std::mem::forget(block);
            unsafe { libc::_exit(0) }
        }
        ForkResult::Parent { child } => {
            assert!(matches!(waitpid(child, None), Ok(WaitStatus::Exited(_, 0))));
            assert_eq!(pool.allocated_count(), 1);
            assert_membership(&pool.snapshot(), 4);

            assert_eq!(pool.reclaim_owned_by(child.as_raw()), 1);
            assert_eq!(pool.allocated_count(), 0);
            assert_eq!(pool.reclaim_owned_by(child.as_raw()), 0);
            assert_membership(&pool.snapshot(), 4);
        }
    }
}
