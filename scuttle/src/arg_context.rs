// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use scuttle_common::{ArgType, ARG_BUF_LEN};

/// What has to happen to an argument's original value once its test is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Descriptor,
    Socket,
    FilePath,
    DirPath,
    SharedBuffer,
    /// Left inert. Generated pids were once temporary processes to kill.
    Process,
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug)]
pub struct ArgTypeContext {
    pub kind: ArgType,
    pub cleanup: Cleanup,
    pub bounds: Option<Bounds>,
}

const fn ctx(kind: ArgType, cleanup: Cleanup, bounds: Option<Bounds>) -> ArgTypeContext {
    ArgTypeContext {
        kind,
        cleanup,
        bounds,
    }
}

const fn within(min: u64, max: u64) -> Option<Bounds> {
    Some(Bounds { min, max })
}

static CONTEXTS: &[ArgTypeContext] = &[
    ctx(ArgType::FileDesc, Cleanup::Descriptor, None),
    ctx(ArgType::FilePath, Cleanup::FilePath, None),
    ctx(ArgType::DirPath, Cleanup::DirPath, None),
    ctx(ArgType::Socket, Cleanup::Socket, None),
    ctx(ArgType::VoidBuf, Cleanup::SharedBuffer, None),
    ctx(ArgType::Pid, Cleanup::Process, None),
    ctx(ArgType::Length, Cleanup::Nothing, within(0, ARG_BUF_LEN as u64)),
    ctx(ArgType::Mode, Cleanup::Nothing, within(0, 0o7777)),
    ctx(ArgType::OpenFlags, Cleanup::Nothing, None),
    ctx(ArgType::AtFlags, Cleanup::Nothing, None),
    ctx(ArgType::Offset, Cleanup::Nothing, within(0, 1 << 20)),
    ctx(ArgType::Whence, Cleanup::Nothing, within(0, 4)),
    ctx(ArgType::Int, Cleanup::Nothing, within(0, 16)),
    ctx(ArgType::Signal, Cleanup::Nothing, within(0, 64)),
    ctx(ArgType::Address, Cleanup::Nothing, None),
    ctx(ArgType::MountType, Cleanup::Nothing, None),
    ctx(ArgType::MountPath, Cleanup::DirPath, None),
    ctx(ArgType::MountFlags, Cleanup::Nothing, None),
];

pub fn type_context(kind: ArgType) -> Option<&'static ArgTypeContext> {
    CONTEXTS.iter().find(|c| c.kind == kind)
}

/// Resolves a raw descriptor tag, `None` for tags this build does not know.
pub fn type_context_for_tag(tag: u32) -> Option<&'static ArgTypeContext> {
    ArgType::from_tag(tag).and_then(type_context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_arg_type_has_a_context() {
        for &kind in ArgType::ALL {
            let context = type_context(kind).unwrap();
            assert_eq!(context.kind, kind);
        }
    }

    #[test]
    fn resource_types_clean_up() {
        assert_eq!(type_context(ArgType::FileDesc).unwrap().cleanup, Cleanup::Descriptor);
        assert_eq!(type_context(ArgType::VoidBuf).unwrap().cleanup, Cleanup::SharedBuffer);
        assert_eq!(type_context(ArgType::Pid).unwrap().cleanup, Cleanup::Process);
        assert_eq!(type_context(ArgType::Length).unwrap().cleanup, Cleanup::Nothing);
    }

    #[test]
    fn unknown_tag_has_no_context() {
        assert!(type_context_for_tag(0).is_none());
        assert!(type_context_for_tag(ArgType::Socket.tag()).is_some());
    }
}
