use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::process::{InvocationResult, ProcessInvoker};
use crate::report::{ItemReport, ReportSink};
use crate::runner::{resolve_concurrency, run_bounded};

mod notarize;
mod sign;
mod staple;

pub use notarize::{NotarizeParams, NotarizeStage};
pub use sign::{SignParams, SignStage};
pub use staple::{StapleParams, StapleStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Sign,
    Notarize,
    Staple,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Sign => "sign",
            StageKind::Notarize => "notarize",
            StageKind::Staple => "staple",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ExactlyOne,
    OneOrMore,
}

pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn cardinality(&self) -> Cardinality;

    /// Checks that must pass before any process is launched.
    fn preflight(&self) -> PipelineResult<()> {
        Ok(())
    }

    /// Full argument list for processing `artifact`.
    fn arguments(&self, artifact: &str) -> Vec<String>;

    /// Artifact identifier this stage produces for `input`.
    fn output_artifact(&self, input: &str) -> String {
        input.to_string()
    }

    fn classify(&self, result: &InvocationResult) -> bool {
        result.success()
    }
}

/// Result of running one stage over one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub artifact: String,
    pub success: bool,
    /// Absent when the process could not be launched.
    pub result: Option<InvocationResult>,
    pub detail: Option<String>,
}

/// Runs stages against the external tool.
pub struct StageExecutor<'a> {
    program: &'a Path,
    invoker: &'a dyn ProcessInvoker,
    sink: &'a dyn ReportSink,
}

impl<'a> StageExecutor<'a> {
    pub fn new(
        program: &'a Path,
        invoker: &'a dyn ProcessInvoker,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            program,
            invoker,
            sink,
        }
    }

    pub fn program(&self) -> &Path {
        self.program
    }

    /// Run `stage` over `artifacts` and return one outcome per artifact in
    /// input order.
    ///
    /// Single-artifact stages fail on a non-zero exit with the captured
    /// streams. Multi-artifact stages attempt every artifact, report each
    /// one, then fail with an error naming all failed artifacts.
    #[instrument(skip_all, fields(stage = %stage.kind(), artifacts = artifacts.len()))]
    pub fn execute(
        &self,
        stage: &dyn Stage,
        artifacts: &[String],
        concurrency: usize,
    ) -> PipelineResult<Vec<StageOutcome>> {
        check_artifact_count(stage, artifacts.len())?;
        stage.preflight()?;

        match stage.cardinality() {
            Cardinality::ExactlyOne => self
                .execute_single(stage, &artifacts[0])
                .map(|outcome| vec![outcome]),
            Cardinality::OneOrMore => self.execute_batch(stage, artifacts, concurrency),
        }
    }

    fn execute_single(&self, stage: &dyn Stage, artifact: &str) -> PipelineResult<StageOutcome> {
        let kind = stage.kind();
        let result = match self.invoker.invoke(self.program, &stage.arguments(artifact)) {
            Ok(result) => result,
            Err(err) => {
                let outcome = StageOutcome {
                    artifact: artifact.to_string(),
                    success: false,
                    result: None,
                    detail: Some(err.to_string()),
                };
                self.sink.report(&ItemReport::from_outcome(kind, &outcome));
                return Err(err);
            }
        };
        let success = stage.classify(&result);
        let outcome = StageOutcome {
            artifact: artifact.to_string(),
            success,
            result: Some(result.clone()),
            detail: None,
        };
        self.sink.report(&ItemReport::from_outcome(kind, &outcome));

        if success {
            return Ok(outcome);
        }
        Err(PipelineError::SubprocessFailed {
            stage: kind,
            artifact: artifact.to_string(),
            exit_status: result.exit_status,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    fn execute_batch(
        &self,
        stage: &dyn Stage,
        artifacts: &[String],
        concurrency: usize,
    ) -> PipelineResult<Vec<StageOutcome>> {
        let kind = stage.kind();
        let workers = resolve_concurrency(concurrency, artifacts.len());
        info!(workers, "Dispatching {} artifact(s)", artifacts.len());

        let outcomes = run_bounded(artifacts, workers, |artifact: &String, _index| {
            Ok::<_, PipelineError>(self.attempt(stage, artifact))
        })?;

        for outcome in &outcomes {
            self.sink.report(&ItemReport::from_outcome(kind, outcome));
        }

        let failed: Vec<String> = outcomes
            .iter()
            .filter(|outcome| !outcome.success)
            .map(|outcome| outcome.artifact.clone())
            .collect();
        if failed.is_empty() {
            Ok(outcomes)
        } else {
            warn!(failed = failed.len(), "Stage finished with failures");
            Err(PipelineError::StageFailed { stage: kind, failed })
        }
    }

    /// Invoke one artifact, carrying any failure as data.
    fn attempt(&self, stage: &dyn Stage, artifact: &str) -> StageOutcome {
        match self.invoker.invoke(self.program, &stage.arguments(artifact)) {
            Ok(result) => StageOutcome {
                artifact: artifact.to_string(),
                success: stage.classify(&result),
                result: Some(result),
                detail: None,
            },
            Err(err) => StageOutcome {
                artifact: artifact.to_string(),
                success: false,
                result: None,
                detail: Some(err.to_string()),
            },
        }
    }
}

/// Reject artifact counts the stage's cardinality does not allow.
pub fn check_artifact_count(stage: &dyn Stage, count: usize) -> PipelineResult<()> {
    let kind = stage.kind();
    match (stage.cardinality(), count) {
        (_, 0) => Err(PipelineError::NoArtifacts { stage: kind }),
        (Cardinality::ExactlyOne, count) if count > 1 => {
            Err(PipelineError::TooManyArtifacts { stage: kind, count })
        }
        _ => Ok(()),
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: impl AsRef<str>) {
    args.push(flag.to_string());
    args.push(value.as_ref().to_string());
}

fn push_path_flags<P: AsRef<Path>>(args: &mut Vec<String>, flag: &str, paths: &[P]) {
    for path in paths {
        push_flag(args, flag, path.as_ref().to_string_lossy());
    }
}
