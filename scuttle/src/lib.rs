// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

pub mod arg_context;
pub mod channel;
pub mod config;
pub mod context;
pub mod generate;
pub mod lifecycle;
pub mod mutate;
pub mod platform;
pub mod pool;
pub mod probe;
pub mod resource;
pub mod run;
pub mod shm;
pub mod signals;
pub mod sink;
pub mod table;
pub mod worker;

#[cfg(test)]
mod tests;
