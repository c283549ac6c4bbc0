#![cfg(unix)]

use std::path::Path;

use codesign_pipeline::{PipelineError, ProcessInvoker, SystemInvoker};

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[test]
fn captures_both_streams_and_exit_status() {
    let result = SystemInvoker
        .invoke(
            Path::new("sh"),
            &sh("echo line one; echo oops >&2; echo line two; exit 3"),
        )
        .unwrap();

    assert_eq!(result.exit_status, 3);
    assert!(!result.success());
    assert_eq!(result.stdout, "line one\nline two\n");
    assert_eq!(result.stderr, "oops\n");
}

#[test]
fn successful_exit_is_zero() {
    let result = SystemInvoker
        .invoke(Path::new("sh"), &sh("printf done"))
        .unwrap();
    assert!(result.success());
    assert_eq!(result.stdout, "done");
    assert!(result.stderr.is_empty());
}

#[test]
fn large_output_on_both_streams_is_kept_whole() {
    // Enough to fill a pipe buffer on each stream.
    let result = SystemInvoker
        .invoke(
            Path::new("sh"),
            &sh("i=0; while [ $i -lt 20000 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done"),
        )
        .unwrap();

    assert!(result.success());
    let out: Vec<&str> = result.stdout.lines().collect();
    let err: Vec<&str> = result.stderr.lines().collect();
    assert_eq!(out.len(), 20000);
    assert_eq!(err.len(), 20000);
    assert_eq!(out[0], "out0");
    assert_eq!(out[19999], "out19999");
    assert_eq!(err[12345], "err12345");
}

#[test]
fn missing_executable_is_a_launch_error() {
    let err = SystemInvoker
        .invoke(Path::new("/nonexistent/rcodesign"), &[])
        .unwrap_err();
    assert!(matches!(err, PipelineError::Spawn { .. }));
    assert!(err.to_string().contains("/nonexistent/rcodesign"));
}

#[test]
fn arguments_are_passed_verbatim() {
    let result = SystemInvoker
        .invoke(
            Path::new("sh"),
            &[
                "-c".to_string(),
                "printf '%s|' \"$@\"".to_string(),
                "sh".to_string(),
                "with space".to_string(),
                "--flag=x".to_string(),
            ],
        )
        .unwrap();
    assert_eq!(result.stdout, "with space|--flag=x|");
}
