use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::error::{PipelineError, PipelineResult};
use crate::observability::MetricsCollector;
use crate::process::{ProcessInvoker, display_command};
use crate::report::ReportSink;
use crate::stages::{
    NotarizeParams, NotarizeStage, SignParams, SignStage, Stage, StageExecutor, StageKind,
    StapleParams, StapleStage, check_artifact_count,
};

/// Which stages run and with what parameters.
///
/// When both notarization and stapling are requested, stapling happens as
/// part of the notary submission and the separate staple stage is skipped.
#[derive(Debug, Clone, Default)]
pub struct PipelinePlan {
    pub sign: Option<SignParams>,
    pub notarize: Option<NotarizeParams>,
    pub staple: Option<StapleParams>,
    /// Worker cap for notarize and staple; 0 means one worker per artifact.
    pub notarize_concurrency: usize,
}

impl PipelinePlan {
    pub fn requested_stages(&self) -> Vec<StageKind> {
        let mut stages = Vec::new();
        if self.sign.is_some() {
            stages.push(StageKind::Sign);
        }
        if self.notarize.is_some() {
            stages.push(StageKind::Notarize);
        }
        if self.staple.is_some() {
            stages.push(StageKind::Staple);
        }
        stages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Init,
    Signed,
    Notarized,
    Stapled,
    Failed,
    Done,
}

/// State threaded through the stage transitions of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub phase: PipelinePhase,
    pub artifacts: Vec<String>,
    /// Set once notarization has also stapled the artifacts.
    pub stapled: bool,
}

impl PipelineState {
    pub fn new(artifacts: Vec<String>) -> Self {
        Self {
            phase: PipelinePhase::Init,
            artifacts,
            stapled: false,
        }
    }
}

/// Final artifacts of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineOutput {
    pub artifacts: Vec<String>,
    pub stapled: bool,
}

impl PipelineOutput {
    pub fn primary(&self) -> Option<&str> {
        self.artifacts.first().map(String::as_str)
    }

    pub fn joined(&self) -> String {
        self.artifacts.join("\n")
    }
}

pub struct PipelineExecutor {
    plan: PipelinePlan,
    program: PathBuf,
    invoker: Arc<dyn ProcessInvoker>,
    sink: Arc<dyn ReportSink>,
    metrics: MetricsCollector,
}

impl PipelineExecutor {
    pub fn new(
        plan: PipelinePlan,
        program: impl Into<PathBuf>,
        invoker: Arc<dyn ProcessInvoker>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            plan,
            program: program.into(),
            invoker,
            sink,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Run every requested stage over `inputs`.
    ///
    /// The first failing stage ends the run; its error is the terminal
    /// failure and no artifacts are reported as output.
    pub fn execute(&self, inputs: Vec<String>) -> PipelineResult<PipelineOutput> {
        self.run(inputs).1
    }

    /// Like [`execute`](Self::execute), also returning the final state.
    ///
    /// On failure the state is in the `Failed` phase and holds the artifacts
    /// produced by the last transition that succeeded.
    #[instrument(skip_all, fields(inputs = inputs.len()))]
    pub fn run(&self, inputs: Vec<String>) -> (PipelineState, PipelineResult<PipelineOutput>) {
        self.metrics.reset();
        let started = Instant::now();
        let mut state = PipelineState::new(inputs);

        let result = self
            .preflight(&state.artifacts)
            .and_then(|()| self.advance(&mut state));
        self.metrics.record_total_duration(started.elapsed());

        match result {
            Ok(()) => {
                state.phase = PipelinePhase::Done;
                let output = PipelineOutput {
                    artifacts: state.artifacts.clone(),
                    stapled: state.stapled,
                };
                info!(
                    artifacts = output.artifacts.len(),
                    primary = output.primary().unwrap_or_default(),
                    "Pipeline completed"
                );
                (state, Ok(output))
            }
            Err(err) => {
                state.phase = PipelinePhase::Failed;
                error!(phase = ?state.phase, "Pipeline failed: {err}");
                (state, Err(err))
            }
        }
    }

    /// Precondition checks for every requested stage, before anything runs.
    ///
    /// Signing maps artifacts one to one, so every stage sees `inputs.len()`
    /// artifacts.
    pub fn preflight(&self, inputs: &[String]) -> PipelineResult<()> {
        for stage in self.stages() {
            check_artifact_count(stage.as_ref(), inputs.len())?;
            stage.preflight()?;
        }
        Ok(())
    }

    fn stages(&self) -> Vec<Box<dyn Stage>> {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();
        if let Some(params) = &self.plan.sign {
            stages.push(Box::new(SignStage::new(params.clone())));
        }
        if let Some(params) = &self.plan.notarize {
            stages.push(Box::new(NotarizeStage::new(params.clone())));
        }
        if let Some(params) = &self.plan.staple {
            stages.push(Box::new(StapleStage::new(params.clone())));
        }
        stages
    }

    fn advance(&self, state: &mut PipelineState) -> PipelineResult<()> {
        let transitions: [fn(&Self, PipelineState) -> PipelineResult<PipelineState>; 3] =
            [Self::sign, Self::notarize, Self::staple];
        for transition in transitions {
            *state = transition(self, state.clone())?;
        }
        Ok(())
    }

    /// Init → Signed. Passes the artifact set through when signing is not requested.
    pub fn sign(&self, mut state: PipelineState) -> PipelineResult<PipelineState> {
        if let Some(params) = &self.plan.sign {
            let stage = SignStage::new(params.clone());
            self.run_stage(&stage, &state.artifacts)?;
            state.artifacts = state
                .artifacts
                .iter()
                .map(|artifact| stage.output_artifact(artifact))
                .collect();
        }
        state.phase = PipelinePhase::Signed;
        Ok(state)
    }

    /// Signed → Notarized.
    pub fn notarize(&self, mut state: PipelineState) -> PipelineResult<PipelineState> {
        if let Some(params) = &self.plan.notarize {
            let stage = NotarizeStage::new(params.clone());
            self.run_stage(&stage, &state.artifacts)?;
            if stage.staples() {
                state.stapled = true;
            }
        }
        state.phase = PipelinePhase::Notarized;
        Ok(state)
    }

    /// Notarized → Stapled, unless notarization already stapled.
    pub fn staple(&self, mut state: PipelineState) -> PipelineResult<PipelineState> {
        match &self.plan.staple {
            Some(_) if state.stapled => {
                info!("Artifacts were stapled during notarization; skipping staple stage");
            }
            Some(params) => {
                let stage = StapleStage::new(params.clone());
                self.run_stage(&stage, &state.artifacts)?;
                state.stapled = true;
                state.phase = PipelinePhase::Stapled;
            }
            None => {}
        }
        Ok(state)
    }

    fn run_stage(&self, stage: &dyn Stage, artifacts: &[String]) -> PipelineResult<()> {
        let kind = stage.kind();
        let _timer = self.metrics.start_stage(kind);
        let executor = StageExecutor::new(&self.program, self.invoker.as_ref(), self.sink.as_ref());

        info!(stage = %kind, artifacts = artifacts.len(), "Running stage");
        let result = executor.execute(stage, artifacts, self.plan.notarize_concurrency);
        match &result {
            Ok(outcomes) => self.metrics.record_outcomes(kind, outcomes),
            Err(PipelineError::StageFailed { failed, .. }) => self.metrics.record_items(
                kind,
                artifacts.len().saturating_sub(failed.len()) as u64,
                failed.len() as u64,
            ),
            Err(PipelineError::SubprocessFailed { .. }) => self.metrics.record_items(kind, 0, 1),
            Err(_) => {}
        }
        result.map(|_| ())
    }

    /// Command lines the run would execute for `inputs`, secrets redacted.
    /// Nothing is invoked. Artifact counts a stage cannot accept are
    /// rejected the same way a run rejects them.
    pub fn describe(&self, inputs: &[String]) -> PipelineResult<Vec<(StageKind, String)>> {
        for stage in self.stages() {
            check_artifact_count(stage.as_ref(), inputs.len())?;
        }
        let mut commands = Vec::new();
        let mut artifacts = inputs.to_vec();
        let mut stapled = false;

        if let Some(params) = &self.plan.sign {
            let stage = SignStage::new(params.clone());
            for artifact in &artifacts {
                commands.push((stage.kind(), self.render(&stage, artifact)));
            }
            artifacts = artifacts
                .iter()
                .map(|artifact| stage.output_artifact(artifact))
                .collect();
        }
        if let Some(params) = &self.plan.notarize {
            let stage = NotarizeStage::new(params.clone());
            for artifact in &artifacts {
                commands.push((stage.kind(), self.render(&stage, artifact)));
            }
            stapled = stage.staples();
        }
        if let Some(params) = &self.plan.staple
            && !stapled
        {
            let stage = StapleStage::new(params.clone());
            for artifact in &artifacts {
                commands.push((stage.kind(), self.render(&stage, artifact)));
            }
        }
        Ok(commands)
    }

    fn render(&self, stage: &dyn Stage, artifact: &str) -> String {
        display_command(&self.program, &stage.arguments(artifact))
    }
}
