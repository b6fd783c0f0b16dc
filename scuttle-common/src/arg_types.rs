// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

/// The closed set of argument kinds a descriptor can declare.
///
/// Descriptors carry the raw tag so that tables can be written as plain data;
/// [`ArgType::from_tag`] is the only way back to the enum.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    FileDesc = 1,
    FilePath = 2,
    DirPath = 3,
    Socket = 4,
    VoidBuf = 5,
    Pid = 6,
    Length = 7,
    Mode = 8,
    OpenFlags = 9,
    AtFlags = 10,
    Offset = 11,
    Whence = 12,
    Int = 13,
    Signal = 14,
    Address = 15,
    MountType = 16,
    MountPath = 17,
    MountFlags = 18,
}

impl ArgType {
    pub const ALL: &'static [ArgType] = &[
        ArgType::FileDesc,
        ArgType::FilePath,
        ArgType::DirPath,
        ArgType::Socket,
        ArgType::VoidBuf,
        ArgType::Pid,
        ArgType::Length,
        ArgType::Mode,
        ArgType::OpenFlags,
        ArgType::AtFlags,
        ArgType::Offset,
        ArgType::Whence,
        ArgType::Int,
        ArgType::Signal,
        ArgType::Address,
        ArgType::MountType,
        ArgType::MountPath,
        ArgType::MountFlags,
    ];

    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<ArgType> {
        ArgType::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ArgType::FileDesc => "fd",
            ArgType::FilePath => "path",
            ArgType::DirPath => "dirpath",
            ArgType::Socket => "socket",
            ArgType::VoidBuf => "buf",
            ArgType::Pid => "pid",
            ArgType::Length => "length",
            ArgType::Mode => "mode",
            ArgType::OpenFlags => "open_flags",
            ArgType::AtFlags => "at_flags",
            ArgType::Offset => "offset",
            ArgType::Whence => "whence",
            ArgType::Int => "int",
            ArgType::Signal => "signal",
            ArgType::Address => "address",
            ArgType::MountType => "mount_type",
            ArgType::MountPath => "mount_path",
            ArgType::MountFlags => "mount_flags",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ArgType;

    #[test]
    fn tags_are_unique_and_resolve() {
        for (i, a) in ArgType::ALL.iter().enumerate() {
            assert_eq!(ArgType::from_tag(a.tag()), Some(*a));
            for b in &ArgType::ALL[i + 1..] {
                assert_ne!(a.tag(), b.tag());
            }
        }
    }

    #[test]
    fn unknown_tag() {
        assert_eq!(ArgType::from_tag(0), None);
        assert_eq!(ArgType::from_tag(4242), None);
    }
}
