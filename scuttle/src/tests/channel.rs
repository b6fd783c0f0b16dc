// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::time::Duration;

use nix::{
    sys::wait::{waitpid, WaitStatus},
    unistd::{getpid, Pid},
};
use scuttle_common::{Job, JobKind};
use serial_test::serial;

use crate::channel::{spawn_with_channel, ChannelError, Port};

#[test]
fn jobs_arrive_in_order() {
    let (manager, worker) = Port::pair().unwrap();

    manager.send(&Job::new(JobKind::Genesis, 3)).unwrap();
    manager.send(&Job::new(JobKind::NewGeneration, 0)).unwrap();

    assert_eq!(worker.receive().unwrap(), Some(Job::new(JobKind::Genesis, 3)));
    assert_eq!(
        worker.receive().unwrap(),
        Some(Job::new(JobKind::NewGeneration, 0))
    );

    drop(manager);
    assert_eq!(worker.receive().unwrap(), None);
}

#[test]
fn full_inbox_drops_instead_of_blocking() {
    let (manager, _worker) = Port::pair().unwrap();
    let job = Job::new(JobKind::Genesis, 0);

    let mut queued = 0;
    while manager.try_send(&job).unwrap() {
        queued += 1;
        assert!(queued < 1_000_000, "inbox never filled up");
    }
    assert!(queued > 0);
}

#[test]
fn handshake_times_out() {
    let (manager, _worker) = Port::pair().unwrap();
    assert!(matches!(
        manager.wait_ack(getpid(), Duration::from_millis(20)),
        Err(ChannelError::Timeout(_))
    ));
}

#[test]
fn handshake_checks_the_peer() {
    let (manager, worker) = Port::pair().unwrap();
    worker.acknowledge(Pid::from_raw(42)).unwrap();
    assert!(matches!(
        manager.wait_ack(Pid::from_raw(43), Duration::from_secs(1)),
        Err(ChannelError::WrongPeer {
            expected: 43,
            got: 42
        })
    ));
}

#[test]
#[serial]
fn spawned_child_acknowledges() {
    let (pid, port) = spawn_with_channel(|port| {
        if port.acknowledge(getpid()).is_err() {
            return 2;
        }
        match port.receive() {
            Ok(Some(job)) if job.syscall_index == 7 => 0,
            _ => 3,
        }
    })
    .unwrap();

    port.wait_ack(pid, Duration::from_secs(5)).unwrap();
    port.send(&Job::new(JobKind::Genesis, 7)).unwrap();

    assert!(matches!(waitpid(pid, None), Ok(WaitStatus::Exited(_, 0))));
}
