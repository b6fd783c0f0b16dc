// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! The runtime syscall table.
//!
//! Static [`Descriptor`]s are compacted into a [`ShadowTable`] holding only
//! the enabled calls, with every generator and argument type resolved up
//! front. Workers are forked after the build and only ever read it.

use log::{debug, error, trace};
use scuttle_common::{ArgType, Descriptor, ARG_LIMIT};
use thiserror::Error;

use crate::{
    arg_context::{type_context_for_tag, ArgTypeContext, Cleanup},
    generate::{releases, GenerateFn, GeneratorRegistry},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("no syscall is enabled")]
    EmptyTable,
    #[error("syscall index {index} out of range, the table has {len} entries")]
    NotFound { index: usize, len: usize },
    #[error("{syscall}: argument {position} has unknown type tag {tag}")]
    UnknownArgType {
        syscall: &'static str,
        position: usize,
        tag: u32,
    },
    #[error("{syscall}: argument {position} uses unknown generator {generator:?}")]
    UnknownGenerator {
        syscall: &'static str,
        position: usize,
        generator: &'static str,
    },
    #[error("{syscall}: argument {position} is released as {cleanup:?} but {generator:?} makes {creates:?}")]
    GeneratorMismatch {
        syscall: &'static str,
        position: usize,
        generator: &'static str,
        creates: Cleanup,
        cleanup: Cleanup,
    },
    #[error("{syscall}: declares {declared} arguments but lists {listed} (limit {ARG_LIMIT})")]
    ArgumentCount {
        syscall: &'static str,
        declared: usize,
        listed: usize,
    },
}

/// Performs one call: the platform number and the live argument values.
pub type InvokeFn = fn(i64, &[u64]) -> i64;

/// Issues the call through `syscall(2)`. Missing arguments are passed as zero.
pub fn raw_syscall(number: i64, args: &[u64]) -> i64 {
    let mut a = [0u64; ARG_LIMIT];
    let n = args.len().min(ARG_LIMIT);
    a[..n].copy_from_slice(&args[..n]);
    unsafe { libc::syscall(number as libc::c_long, a[0], a[1], a[2], a[3], a[4], a[5]) as i64 }
}

#[derive(Debug, Clone, Copy)]
pub struct ShadowArg {
    pub kind: ArgType,
    pub generator: &'static str,
    pub generate: GenerateFn,
    pub context: &'static ArgTypeContext,
}

#[derive(Debug, Clone)]
pub struct ShadowEntry {
    pub name: &'static str,
    pub number: i64,
    pub arg_count: usize,
    pub requires_root: bool,
    pub needs_alarm: bool,
    /// Position of the source descriptor, disabled ones included.
    pub descriptor_index: usize,
    pub invoke: InvokeFn,
    pub args: Vec<ShadowArg>,
}

impl ShadowEntry {
    pub fn contexts(&self) -> Vec<&'static ArgTypeContext> {
        self.args.iter().map(|a| a.context).collect()
    }
}

#[derive(Debug)]
pub struct ShadowTable {
    entries: Vec<ShadowEntry>,
}

impl ShadowTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&ShadowEntry, TableError> {
        self.entries.get(index).ok_or(TableError::NotFound {
            index,
            len: self.entries.len(),
        })
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShadowEntry> {
        self.entries.iter()
    }
}

pub struct TableBuilder<'r> {
    registry: &'r GeneratorRegistry,
    invoke: InvokeFn,
    privileged: bool,
}

impl<'r> TableBuilder<'r> {
    pub fn new(registry: &'r GeneratorRegistry) -> Self {
        TableBuilder {
            registry,
            invoke: raw_syscall,
            privileged: true,
        }
    }

    /// Replaces the function every entry is invoked with.
    pub fn invoker(mut self, invoke: InvokeFn) -> Self {
        self.invoke = invoke;
        self
    }

    /// When `false`, calls that only make sense as root are left out.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn build<'d, I>(&self, descriptors: I) -> Result<ShadowTable, TableError>
    where
        I: IntoIterator<Item = &'d Descriptor>,
    {
        let mut entries = vec![];
        let mut declared = 0;

        for (descriptor_index, descriptor) in descriptors.into_iter().enumerate() {
            declared += 1;

            if !descriptor.enabled() {
                trace!("skipping disabled syscall {}", descriptor.name);
                continue;
            }

            if descriptor.requires_root && !self.privileged {
                debug!("skipping {}, it needs root", descriptor.name);
                continue;
            }

            let entry = self.resolve(descriptor_index, descriptor).inspect_err(|e| {
                error!("can't build the syscall table: {e}");
            })?;
            entries.push(entry);
        }

        if entries.is_empty() {
            error!("none of the {declared} syscalls is enabled");
            return Err(TableError::EmptyTable);
        }

        debug!("syscall table has {} of {declared} syscalls", entries.len());

        Ok(ShadowTable { entries })
    }

    fn resolve(&self, descriptor_index: usize, descriptor: &Descriptor) -> Result<ShadowEntry, TableError> {
        let declared = descriptor.arg_count as usize;
        if declared > ARG_LIMIT || declared != descriptor.args.len() {
            return Err(TableError::ArgumentCount {
                syscall: descriptor.name,
                declared,
                listed: descriptor.args.len(),
            });
        }

        let args = descriptor
            .args
            .iter()
            .enumerate()
            .map(|(position, arg)| {
                let context = type_context_for_tag(arg.type_tag).ok_or(TableError::UnknownArgType {
                    syscall: descriptor.name,
                    position,
                    tag: arg.type_tag,
                })?;
                let generate = self
                    .registry
                    .get(arg.generator)
                    .ok_or(TableError::UnknownGenerator {
                        syscall: descriptor.name,
                        position,
                        generator: arg.generator,
                    })?;
                if let Some(creates) = self.registry.creates(arg.generator) {
                    if !releases(creates, context.cleanup) {
                        return Err(TableError::GeneratorMismatch {
                            syscall: descriptor.name,
                            position,
                            generator: arg.generator,
                            creates,
                            cleanup: context.cleanup,
                        });
                    }
                }
                Ok(ShadowArg {
                    kind: context.kind,
                    generator: arg.generator,
                    generate,
                    context,
                })
            })
            .collect::<Result<Vec<_>, TableError>>()?;

        Ok(ShadowEntry {
            name: descriptor.name,
            number: descriptor.number,
            arg_count: declared,
            requires_root: descriptor.requires_root,
            needs_alarm: descriptor.needs_alarm,
            descriptor_index,
            invoke: self.invoke,
            args,
        })
    }
}
