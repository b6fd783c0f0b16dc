// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use rand::Rng;
use thiserror::Error;

use crate::{context::WorkerContext, platform::FuzzRng};

#[derive(Debug, Error)]
pub enum MutateError {
    #[error("argument {index} out of range for a call with {count} arguments")]
    OutOfRange { index: usize, count: usize },
}

/// Rewrites live argument values in place. Original values are off limits.
pub type MutateFn = fn(&WorkerContext, &mut FuzzRng) -> Result<(), MutateError>;

const INTERESTING: &[u64] = &[
    0,
    1,
    0x7f,
    0x80,
    0xff,
    0x7fff,
    0xffff,
    0x7fff_ffff,
    0x8000_0000,
    0xffff_ffff,
    i64::MAX as u64,
    u64::MAX,
];

/// Leaves most calls alone and otherwise mangles one argument: a bit flip, a
/// small step either way, or a boundary value.
pub fn mutate_arguments(ctx: &WorkerContext, rng: &mut FuzzRng) -> Result<(), MutateError> {
    let count = ctx.arg_count();
    if count == 0 || !rng.gen_ratio(1, 4) {
        return Ok(());
    }

    let index = rng.gen_range(0..count);
    let value = ctx.arg(index);
    let mutated = match rng.gen_range(0..4) {
        0 => value ^ (1 << rng.gen_range(0..64)),
        1 => value.wrapping_add(rng.gen_range(1..=16)),
        2 => value.wrapping_sub(rng.gen_range(1..=16)),
        _ => INTERESTING[rng.gen_range(0..INTERESTING.len())],
    };

    set_checked(ctx, index, mutated)
}

fn set_checked(ctx: &WorkerContext, index: usize, value: u64) -> Result<(), MutateError> {
    let count = ctx.arg_count();
    if index >= count {
        return Err(MutateError::OutOfRange { index, count });
    }
    ctx.set_arg(index, value);
    Ok(())
}

/// Mutator that never touches anything.
pub fn keep_arguments(_: &WorkerContext, _: &mut FuzzRng) -> Result<(), MutateError> {
    Ok(())
}
