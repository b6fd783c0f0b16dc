// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{num::NonZeroUsize, thread::available_parallelism};

use log::{debug, warn};
use rand::{
    rngs::{OsRng, StdRng},
    RngCore, SeedableRng,
};

pub fn core_count() -> usize {
    match available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            warn!("can't detect the core count, running a single worker: {e}");
            NonZeroUsize::MIN.get()
        }
    }
}

pub fn hardware_rng_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("rdrand")
    }

    #[cfg(target_arch = "aarch64")]
    {
        std::arch::is_aarch64_feature_detected!("rand")
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// The random source a worker draws from.
///
/// A software generator forked from the parent starts with the parent's state,
/// so every worker has to [`FuzzRng::reseed`] itself or they all test the same
/// calls. The hardware-backed source has no state to duplicate.
pub enum FuzzRng {
    Hardware(OsRng),
    Software(StdRng),
}

impl FuzzRng {
    /// Deterministic generator, used when the run was given a seed.
    pub fn seeded(seed: u64) -> Self {
        FuzzRng::Software(StdRng::seed_from_u64(seed))
    }

    pub fn for_platform() -> Self {
        if hardware_rng_available() {
            FuzzRng::Hardware(OsRng)
        } else {
            FuzzRng::Software(StdRng::from_entropy())
        }
    }

    /// Called by each worker right after it was forked. `seed` is the run seed
    /// when there is one, mixed with the slot so workers still diverge.
    pub fn reseed(&mut self, seed: Option<u64>, slot: usize) {
        match (self, seed) {
            (FuzzRng::Hardware(_), None) => (),
            (rng, Some(seed)) => {
                let mixed = seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                debug!("seeding worker {slot} with {mixed:#x}");
                *rng = FuzzRng::seeded(mixed);
            }
            (rng, None) => *rng = FuzzRng::Software(StdRng::from_entropy()),
        }
    }
}

impl RngCore for FuzzRng {
    fn next_u32(&mut self) -> u32 {
        match self {
            FuzzRng::Hardware(r) => r.next_u32(),
            FuzzRng::Software(r) => r.next_u32(),
        }
    }

    fn next_u64(&mut self) -> u64 {
        match self {
            FuzzRng::Hardware(r) => r.next_u64(),
            FuzzRng::Software(r) => r.next_u64(),
        }
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        match self {
            FuzzRng::Hardware(r) => r.fill_bytes(dest),
            FuzzRng::Software(r) => r.fill_bytes(dest),
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        match self {
            FuzzRng::Hardware(r) => r.try_fill_bytes(dest),
            FuzzRng::Software(r) => r.try_fill_bytes(dest),
        }
    }
}
