use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Flags whose following argument is a secret and must not be logged.
const SECRET_FLAGS: &[&str] = &["--p12-password", "--remote-shared-secret"];

/// Captured result of one external process invocation.
///
/// A non-zero exit is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl InvocationResult {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Launches exactly one external process per call and captures its output.
pub trait ProcessInvoker: Send + Sync {
    fn invoke(&self, program: &Path, args: &[String]) -> PipelineResult<InvocationResult>;
}

/// Invoker backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInvoker;

impl ProcessInvoker for SystemInvoker {
    fn invoke(&self, program: &Path, args: &[String]) -> PipelineResult<InvocationResult> {
        debug!(
            program = %program.display(),
            args = %redact_args(args).join(" "),
            "Launching process"
        );

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        let stderr_pipe = child.stderr.take();
        let stderr_reader = thread::spawn(move || drain(stderr_pipe));
        let stdout = drain(child.stdout.take());
        if stdout.is_err() {
            // Nobody reads stdout any more; stop the child rather than wait on it.
            let _ = child.kill();
        }
        let stderr = stderr_reader
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked")));
        let status = child.wait().map(|status| status.code().unwrap_or(-1));

        collect(program, stdout, stderr, status)
    }
}

/// Combine the captured streams and exit status of a child that has already
/// been reaped. Signal termination reports `-1`.
fn collect(
    program: &Path,
    stdout: io::Result<String>,
    stderr: io::Result<String>,
    status: io::Result<i32>,
) -> PipelineResult<InvocationResult> {
    let capture_error = |source: io::Error| PipelineError::Capture {
        program: program.display().to_string(),
        source,
    };
    let stdout = stdout.map_err(capture_error)?;
    let stderr = stderr.map_err(capture_error)?;
    let exit_status = status.map_err(capture_error)?;
    debug!(program = %program.display(), exit_status, "Process exited");

    Ok(InvocationResult {
        exit_status,
        stdout,
        stderr,
    })
}

fn drain<R: Read>(pipe: Option<R>) -> io::Result<String> {
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };
    let mut bytes = Vec::new();
    pipe.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Copy of `args` with the values of secret-bearing flags replaced by `***`.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("***".to_string());
            hide_next = false;
        } else {
            hide_next = SECRET_FLAGS.contains(&arg.as_str());
            redacted.push(arg.clone());
        }
    }
    redacted
}

/// Render a command line for display, with secrets redacted.
pub fn display_command(program: &Path, args: &[String]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(redact_args(args));
    parts.join(" ")
}

/// Default executable name looked up on `PATH`.
pub fn default_program() -> PathBuf {
    PathBuf::from("rcodesign")
}
