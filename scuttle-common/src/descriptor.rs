// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    On,
    /// Usually a syscall still in development, or one that would take the
    /// fuzzer down with it.
    Off,
}

/// One argument position: the raw [`crate::ArgType`] tag and the name of the
/// generator that produces its values.
#[derive(Debug, Clone, Copy)]
pub struct ArgDescriptor {
    pub type_tag: u32,
    pub generator: &'static str,
}

impl ArgDescriptor {
    pub const fn new(kind: crate::ArgType, generator: &'static str) -> Self {
        ArgDescriptor {
            type_tag: kind.tag(),
            generator,
        }
    }
}

/// Static, load-time definition of one syscall's invocation shape.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub number: i64,
    pub arg_count: u32,
    pub status: Status,
    pub requires_root: bool,
    pub needs_alarm: bool,
    pub args: &'static [ArgDescriptor],
}

impl Descriptor {
    pub const fn enabled(&self) -> bool {
        matches!(self.status, Status::On)
    }

    /// Same descriptor with the status switched off.
    pub const fn disabled(mut self) -> Self {
        self.status = Status::Off;
        self
    }
}

/// Shorthand used by the descriptor tables.
#[macro_export]
macro_rules! descriptor {
    ($name:literal, $nr:expr, [$($kind:ident => $gen:literal),* $(,)?]) => {
        $crate::descriptor!($name, $nr, [$($kind => $gen),*], root: false, alarm: false)
    };
    ($name:literal, $nr:expr, [$($kind:ident => $gen:literal),* $(,)?], root: $root:expr, alarm: $alarm:expr) => {
        $crate::Descriptor {
            name: $name,
            number: $nr as i64,
            arg_count: 0u32 $(+ { let _ = $gen; 1 })*,
            status: $crate::Status::On,
            requires_root: $root,
            needs_alarm: $alarm,
            args: &[$($crate::ArgDescriptor::new($crate::ArgType::$kind, $gen)),*],
        }
    };
}
