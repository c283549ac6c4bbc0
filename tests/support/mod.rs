#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use codesign_pipeline::{InvocationResult, PipelineResult, ProcessInvoker};
use tempfile::TempDir;

type Responder = Box<dyn Fn(&[String]) -> InvocationResult + Send + Sync>;

/// In-memory invoker that records every argument list it receives.
pub struct ScriptedInvoker {
    calls: Mutex<Vec<Vec<String>>>,
    responder: Responder,
}

impl ScriptedInvoker {
    pub fn new(responder: impl Fn(&[String]) -> InvocationResult + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|args| InvocationResult::new(0, format!("ok {}", args[0]), ""))
    }

    /// Fails with exit code 1 for any invocation whose final argument is `artifact`.
    pub fn failing_for(artifact: &'static str) -> Self {
        Self::new(move |args| {
            if args.last().map(String::as_str) == Some(artifact) {
                InvocationResult::new(1, "submission id 42", format!("{artifact} rejected"))
            } else {
                InvocationResult::new(0, "accepted", "")
            }
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|args| args.first().map(String::as_str) == Some(subcommand))
            .collect()
    }
}

impl ProcessInvoker for ScriptedInvoker {
    fn invoke(&self, _program: &Path, args: &[String]) -> PipelineResult<InvocationResult> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok((self.responder)(args))
    }
}

/// Temporary directory holding a dummy App Store Connect key file.
pub fn api_key_fixture() -> (TempDir, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let key = temp.path().join("api-key.json");
    std::fs::write(&key, "{}").unwrap();
    (temp, key)
}

pub fn artifacts(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
