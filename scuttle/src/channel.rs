// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Supervisor to worker channel.
//!
//! A `SOCK_SEQPACKET` pair is created per worker right before the fork, so
//! frames keep their boundaries and a dead peer reads as end of stream.
//! Every frame is [`JOB_FRAME_SIZE`] bytes: jobs going down, one
//! acknowledgement coming back up once the worker is ready.

use std::{
    os::fd::{AsRawFd, OwnedFd, RawFd},
    time::Duration,
};

use log::trace;
use nix::{
    errno::Errno,
    sys::{
        socket::{recv, send, setsockopt, socketpair, sockopt, AddressFamily, MsgFlags, SockFlag, SockType},
        time::{TimeVal, TimeValLike},
    },
    unistd::{fork, ForkResult, Pid},
};
use scuttle_common::{Job, JOB_FRAME_SIZE};
use thiserror::Error;

const ACK_MAGIC: u32 = 0x5343_5554;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel socket: {0}")]
    Socket(#[from] Errno),
    #[error("peer closed the channel")]
    Closed,
    #[error("malformed frame of {len} bytes")]
    Frame { len: usize },
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("acknowledgement from pid {got}, expected {expected}")]
    WrongPeer { expected: i32, got: i32 },
    #[error("fork: {0}")]
    Fork(Errno),
    #[error("interrupted while waiting for a job")]
    Interrupted,
}

pub struct Port {
    fd: OwnedFd,
}

impl AsRawFd for Port {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Port {
    fn new(fd: OwnedFd) -> Self {
        Port { fd }
    }

    /// Connected pair of ports, without any process involved.
    pub fn pair() -> Result<(Port, Port), ChannelError> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )?;
        Ok((Port::new(a), Port::new(b)))
    }

    fn send_frame(&self, frame: &[u8; JOB_FRAME_SIZE], flags: MsgFlags) -> Result<(), ChannelError> {
        let sent = send(self.fd.as_raw_fd(), frame, flags | MsgFlags::MSG_NOSIGNAL)?;
        if sent != JOB_FRAME_SIZE {
            return Err(ChannelError::Frame { len: sent });
        }
        Ok(())
    }

    fn receive_frame(&self) -> Result<Option<[u8; JOB_FRAME_SIZE]>, ChannelError> {
        let mut frame = [0u8; JOB_FRAME_SIZE];
        match recv(self.fd.as_raw_fd(), &mut frame, MsgFlags::empty()) {
            Ok(0) => Ok(None),
            Ok(JOB_FRAME_SIZE) => Ok(Some(frame)),
            Ok(len) => Err(ChannelError::Frame { len }),
            Err(Errno::EINTR) => Err(ChannelError::Interrupted),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocks until there is room for the job.
    pub fn send(&self, job: &Job) -> Result<(), ChannelError> {
        self.send_frame(&job.to_bytes(), MsgFlags::empty())
    }

    /// Queues the job only if that does not block. `Ok(false)` means the
    /// inbox is full and the job was dropped.
    pub fn try_send(&self, job: &Job) -> Result<bool, ChannelError> {
        match self.send_frame(&job.to_bytes(), MsgFlags::MSG_DONTWAIT) {
            Ok(()) => Ok(true),
            Err(ChannelError::Socket(Errno::EAGAIN)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Next job, `None` once the other side is gone. A signal arriving while
    /// waiting ends the wait with [`ChannelError::Interrupted`], so the caller
    /// gets to look at its stop flag.
    pub fn receive(&self) -> Result<Option<Job>, ChannelError> {
        Ok(self.receive_frame()?.map(|frame| Job::from_bytes(&frame)))
    }

    pub fn acknowledge(&self, pid: Pid) -> Result<(), ChannelError> {
        let mut frame = [0u8; JOB_FRAME_SIZE];
        frame[..4].copy_from_slice(&ACK_MAGIC.to_le_bytes());
        frame[4..].copy_from_slice(&pid.as_raw().to_le_bytes());
        self.send_frame(&frame, MsgFlags::empty())
    }

    /// Waits up to `timeout` for `expected` to acknowledge.
    pub fn wait_ack(&self, expected: Pid, timeout: Duration) -> Result<(), ChannelError> {
        let limit = TimeVal::milliseconds(timeout.as_millis().max(1) as i64);
        setsockopt(&self.fd, sockopt::ReceiveTimeout, &limit)?;
        let received = loop {
            match self.receive_frame() {
                Err(ChannelError::Interrupted) => continue,
                other => break other,
            }
        };
        setsockopt(&self.fd, sockopt::ReceiveTimeout, &TimeVal::zero())?;

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(ChannelError::Closed),
            Err(ChannelError::Socket(Errno::EAGAIN)) => return Err(ChannelError::Timeout(timeout)),
            Err(e) => return Err(e),
        };

        let [m0, m1, m2, m3, p0, p1, p2, p3] = frame;
        if u32::from_le_bytes([m0, m1, m2, m3]) != ACK_MAGIC {
            return Err(ChannelError::Frame { len: JOB_FRAME_SIZE });
        }

        let got = i32::from_le_bytes([p0, p1, p2, p3]);
        if got != expected.as_raw() {
            return Err(ChannelError::WrongPeer {
                expected: expected.as_raw(),
                got,
            });
        }

        trace!("worker {expected} acknowledged");
        Ok(())
    }
}

/// Forks a process running `entry` with one end of a fresh channel and
/// returns its pid and the other end. The child `_exit`s with whatever
/// `entry` returns and never unwinds back into the caller.
pub fn spawn_with_channel<F>(entry: F) -> Result<(Pid, Port), ChannelError>
where
    F: FnOnce(Port) -> i32,
{
    let (local, remote) = Port::pair()?;

    match unsafe { fork() }.map_err(ChannelError::Fork)? {
        ForkResult::Parent { child } => {
            drop(remote);
            Ok((child, local))
        }
        ForkResult::Child => {
            drop(local);
            let code = entry(remote);
            unsafe { libc::_exit(code) }
        }
    }
}
