// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use super::config;
use crate::config::ConfigError;

#[test]
fn defaults_are_valid() {
    assert_eq!(config("defaults", 1).validate(), Ok(()));
}

#[test]
fn zero_workers_is_rejected() {
    let cfg = config("no-workers", 0);
    assert_eq!(cfg.validate(), Err(ConfigError::NoWorkers));
}

#[test]
fn zero_timeout_is_rejected() {
    let mut cfg = config("no-timeout", 1);
    cfg.alarm_secs = 0;
    assert_eq!(cfg.validate(), Err(ConfigError::NoTimeout));
}
