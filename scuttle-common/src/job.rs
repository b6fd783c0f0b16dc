// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

pub const JOB_FRAME_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Run one syscall test exactly as directed.
    Genesis,
    NewGeneration,
}

impl JobKind {
    pub const fn raw(self) -> u32 {
        match self {
            JobKind::Genesis => 1,
            JobKind::NewGeneration => 2,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<JobKind> {
        match raw {
            1 => Some(JobKind::Genesis),
            2 => Some(JobKind::NewGeneration),
            _ => None,
        }
    }
}

/// A unit of work delivered to a worker's inbox. The kind stays raw until the
/// worker looks at it, an unknown kind is the worker's problem to report.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub kind: u32,
    pub syscall_index: u32,
}

impl Job {
    pub const fn new(kind: JobKind, syscall_index: u32) -> Self {
        Job {
            kind: kind.raw(),
            syscall_index,
        }
    }

    pub const fn kind(&self) -> Option<JobKind> {
        JobKind::from_raw(self.kind)
    }

    pub fn to_bytes(&self) -> [u8; JOB_FRAME_SIZE] {
        let mut frame = [0u8; JOB_FRAME_SIZE];
        frame[..4].copy_from_slice(&self.kind.to_le_bytes());
        frame[4..].copy_from_slice(&self.syscall_index.to_le_bytes());
        frame
    }

    pub fn from_bytes(frame: &[u8; JOB_FRAME_SIZE]) -> Self {
        let [k0, k1, k2, k3, i0, i1, i2, i3] = *frame;
        Job {
            kind: u32::from_le_bytes([k0, k1, k2, k3]),
            syscall_index: u32::from_le_bytes([i0, i1, i2, i3]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_little_endian() {
        let job = Job::new(JobKind::Genesis, 0x0102_0304);
        assert_eq!(job.to_bytes(), [1, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(Job::from_bytes(&job.to_bytes()), job);
    }

    #[test]
    fn unknown_kind_survives_the_wire() {
        let job = Job::from_bytes(&[9, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(job.kind, 9);
        assert_eq!(job.kind(), None);
    }
}
