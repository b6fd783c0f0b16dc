// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

//! Where test records go.
//!
//! Arguments are recorded before the call is made, so the last record of a
//! worker that took the machine down names the call that did it.

use std::{
    borrow::Cow,
    fmt::Write as _,
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::Path,
};

use log::{debug, info};
use scuttle_common::ArgType;
use thiserror::Error;

use crate::arg_context::ArgTypeContext;

pub const LOG_TARGET: &str = "scuttle::test";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("writing test record: {0}")]
    Io(#[from] io::Error),
}

pub trait TestSink {
    fn log_arguments(
        &self,
        count: usize,
        name: &str,
        values: &[u64],
        contexts: &[&ArgTypeContext],
    ) -> Result<(), SinkError>;

    fn log_results(&self, had_error: bool, return_value: i64, error_text: &str) -> Result<(), SinkError>;
}

/// Sends records through the `log` facade under [`LOG_TARGET`].
pub struct LogSink;

impl TestSink for LogSink {
    fn log_arguments(
        &self,
        count: usize,
        name: &str,
        values: &[u64],
        contexts: &[&ArgTypeContext],
    ) -> Result<(), SinkError> {
        info!(target: LOG_TARGET, "{}", format_call(count, name, values, contexts));
        Ok(())
    }

    fn log_results(&self, had_error: bool, return_value: i64, error_text: &str) -> Result<(), SinkError> {
        if had_error {
            info!(target: LOG_TARGET, "= {}", format_result(had_error, return_value, error_text));
        } else {
            debug!(target: LOG_TARGET, "= {}", format_result(had_error, return_value, error_text));
        }
        Ok(())
    }
}

/// Appends records to a file every worker shares, each line tagged with the
/// writing process. A record is a single write on an `O_APPEND` descriptor,
/// so lines of different workers do not interleave.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileSink::new(file))
    }

    pub fn new(file: File) -> Self {
        FileSink { file }
    }

    fn write_record(&self, record: &str) -> Result<(), SinkError> {
        let line = format!("[{}] {record}\n", std::process::id());
        (&self.file).write_all(line.as_bytes())?;
        Ok(())
    }
}

impl TestSink for FileSink {
    fn log_arguments(
        &self,
        count: usize,
        name: &str,
        values: &[u64],
        contexts: &[&ArgTypeContext],
    ) -> Result<(), SinkError> {
        self.write_record(&format_call(count, name, values, contexts))
    }

    fn log_results(&self, had_error: bool, return_value: i64, error_text: &str) -> Result<(), SinkError> {
        self.write_record(&format!("= {}", format_result(had_error, return_value, error_text)))
    }
}

fn format_value(value: u64, context: Option<&ArgTypeContext>) -> String {
    match context.map(|c| c.kind) {
        Some(ArgType::FileDesc | ArgType::Socket | ArgType::Signal | ArgType::Whence) => {
            format!("{}", value as i64 as i32)
        }
        Some(ArgType::Pid | ArgType::Int) => format!("{}", value as i64),
        Some(ArgType::Length | ArgType::Offset) => format!("{value}"),
        Some(ArgType::Mode) => format!("{value:#o}"),
        Some(ArgType::OpenFlags | ArgType::AtFlags | ArgType::MountFlags) => format!("{value:#x}"),
        _ => format!("{value:#x}"),
    }
}

/// `name(type: value, ...)`, values rendered the way their type reads best.
/// Pointers are never dereferenced, mutation may have broken them.
pub fn format_call(count: usize, name: &str, values: &[u64], contexts: &[&ArgTypeContext]) -> String {
    let mut out = format!("{name}(");
    for (i, value) in values.iter().take(count).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let context = contexts.get(i).copied();
        let label = context.map(|c| c.kind.name()).unwrap_or("arg");
        let _ = write!(out, "{label}: {}", format_value(*value, context));
    }
    out.push(')');
    out
}

pub fn format_result(had_error: bool, return_value: i64, error_text: &str) -> Cow<'static, str> {
    match (had_error, error_text.is_empty()) {
        (false, _) if return_value == 0 => Cow::Borrowed("0"),
        (false, _) => Cow::Owned(format!("{return_value}")),
        (true, true) => Cow::Owned(format!("{return_value} (error)")),
        (true, false) => Cow::Owned(format!("{return_value} (error: {error_text})")),
    }
}
