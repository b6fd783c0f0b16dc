// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Gustavo Noronha Silva <gustavo@noronha.dev.br>

use std::fs::{self, File};

use scuttle_common::ArgType;

use super::scratch;
use crate::{
    arg_context::type_context,
    sink::{format_call, format_result, FileSink, SinkError, TestSink},
};

#[test]
fn calls_render_by_argument_type() {
    let contexts: Vec<_> = [ArgType::FileDesc, ArgType::OpenFlags, ArgType::Mode, ArgType::VoidBuf]
        .into_iter()
        .map(|k| type_context(k).unwrap())
        .collect();

    assert_eq!(
        format_call(4, "openat", &[3, 0x241, 0o644, 0x7f00_0000_1000], &contexts),
        "openat(fd: 3, open_flags: 0x241, mode: 0o644, buf: 0x7f0000001000)"
    );
}

#[test]
fn negative_descriptors_stay_readable() {
    let contexts = [type_context(ArgType::FileDesc).unwrap()];
    assert_eq!(format_call(1, "close", &[u64::MAX], &contexts), "close(fd: -1)");
}

#[test]
fn no_arguments() {
    assert_eq!(format_call(0, "getpid", &[], &[]), "getpid()");
}

#[test]
fn results() {
    assert_eq!(format_result(false, 0, "").as_ref(), "0");
    assert_eq!(format_result(false, 42, "").as_ref(), "42");
    assert_eq!(format_result(true, -1, "").as_ref(), "-1 (error)");
    assert_eq!(
        format_result(true, -1, "No such file or directory").as_ref(),
        "-1 (error: No such file or directory)"
    );
}

#[test]
fn file_sink_appends_tagged_records() {
    let path = scratch("records.log");
    let _ = fs::remove_file(&path);

    let sink = FileSink::create(&path).unwrap();
    let contexts = [type_context(ArgType::FileDesc).unwrap()];
    sink.log_arguments(1, "close", &[3], &contexts).unwrap();
    sink.log_results(true, -1, "Bad file descriptor").unwrap();
    drop(sink);

    // A second sink on the same file keeps what is there.
    FileSink::create(&path)
        .unwrap()
        .log_results(false, 0, "")
        .unwrap();

    let pid = std::process::id();
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        format!(
            "[{pid}] close(fd: 3)\n[{pid}] = -1 (error: Bad file descriptor)\n[{pid}] = 0\n"
        )
    );
    fs::remove_file(&path).unwrap();
}

#[test]
fn file_sink_reports_write_failures() {
    let path = scratch("readonly.log");
    fs::write(&path, "").unwrap();

    let sink = FileSink::new(File::open(&path).unwrap());
    assert!(matches!(
        sink.log_results(false, 0, ""),
        Err(SinkError::Io(_))
    ));
    fs::remove_file(&path).unwrap();
}
