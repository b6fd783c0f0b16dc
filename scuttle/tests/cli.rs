// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::{path::PathBuf, time::Duration};

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;

fn scuttle() -> Command {
    let mut cmd = Command::cargo_bin("scuttle").unwrap();
    cmd.timeout(Duration::from_secs(60));
    cmd
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("scuttle-cli-{name}-{}", std::process::id()))
}

#[test]
fn list_prints_the_selected_syscalls() {
    scuttle()
        .args(["--list", "-e", "getpid,read"])
        .assert()
        .success()
        .stdout(predicate::str::contains("getpid").and(predicate::str::contains("read")))
        .stdout(predicate::str::contains("openat").not());
}

#[test]
fn list_shows_argument_types() {
    scuttle()
        .args(["--list", "-e", "lseek"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(fd, offset, whence)"));
}

#[test]
fn unknown_syscall_is_rejected() {
    scuttle()
        .args(["--list", "-e", "nonsense"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown syscall \"nonsense\""));
}

#[test]
fn zero_workers_is_rejected() {
    scuttle()
        .args(["--workers", "0", "--max-tests", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one worker"));
}

#[test]
fn zero_timeout_is_rejected() {
    scuttle()
        .args(["--timeout", "0", "--max-tests", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout must be at least one second"));
}

#[test]
#[serial]
fn bounded_run_exits_cleanly() {
    let dir = scratch("bounded");
    scuttle()
        .args(["--workers", "2", "--max-tests", "200", "--seed", "1"])
        .args(["-e", "getpid,sched_yield,getcwd,close,lseek"])
        .arg("--scratch-dir")
        .arg(&dir)
        .assert()
        .success();

    assert!(!dir.exists(), "scratch directory left behind");
}

#[test]
#[serial]
fn smart_run_exits_cleanly() {
    scuttle()
        .args(["--mode", "smart", "--workers", "2", "--max-tests", "100"])
        .args(["-e", "getpid,sched_yield"])
        .arg("--scratch-dir")
        .arg(scratch("smart"))
        .assert()
        .success();
}

#[test]
#[serial]
fn test_records_are_logged() {
    scuttle()
        .env("RUST_LOG", "scuttle::test=debug")
        .args(["--workers", "1", "--max-tests", "5", "-e", "getpid"])
        .arg("--scratch-dir")
        .arg(scratch("records"))
        .assert()
        .success()
        .stderr(predicate::str::contains("getpid()"));
}

#[test]
#[serial]
fn duration_ends_the_run() {
    scuttle()
        .args(["--workers", "1", "--duration", "1", "-e", "sched_yield"])
        .arg("--scratch-dir")
        .arg(scratch("duration"))
        .assert()
        .success();
}

#[test]
#[serial]
fn records_go_to_the_record_file() {
    let record = scratch("record.log");
    let _ = std::fs::remove_file(&record);

    scuttle()
        .args(["--workers", "1", "--max-tests", "5", "-e", "getpid"])
        .arg("--scratch-dir")
        .arg(scratch("record"))
        .arg("--record")
        .arg(&record)
        .assert()
        .success();

    let records = std::fs::read_to_string(&record).unwrap();
    assert!(records.contains("] getpid()"), "{records}");
    assert!(records.contains("] = "), "{records}");
    std::fs::remove_file(&record).unwrap();
}
