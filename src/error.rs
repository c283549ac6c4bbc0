use std::io;

use thiserror::Error;

use crate::stages::StageKind;

/// Terminal failures of the signing pipeline.
///
/// Precondition violations are raised before any subprocess is launched.
/// Subprocess failures carry the exit status and both captured streams
/// unchanged so the caller can surface them as-is.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("worker limit must be a positive integer, got {limit}")]
    InvalidConcurrency { limit: usize },

    #[error("{stage} stage received no artifacts")]
    NoArtifacts { stage: StageKind },

    #[error("{stage} stage requires exactly one artifact, got {count}")]
    TooManyArtifacts { stage: StageKind, count: usize },

    #[error("{stage} stage requires {credential}")]
    MissingCredential {
        stage: StageKind,
        credential: String,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to collect output of {program}: {source}")]
    Capture {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "{stage} failed for {artifact} with exit code {exit_status}\nstdout:\n{stdout}\nstderr:\n{stderr}"
    )]
    SubprocessFailed {
        stage: StageKind,
        artifact: String,
        exit_status: i32,
        stdout: String,
        stderr: String,
    },

    #[error("{stage} failed for {} artifact(s): {}", .failed.len(), .failed.join(", "))]
    StageFailed { stage: StageKind, failed: Vec<String> },
}

impl PipelineError {
    /// True for errors raised before any process was invoked.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConcurrency { .. }
                | PipelineError::NoArtifacts { .. }
                | PipelineError::TooManyArtifacts { .. }
                | PipelineError::MissingCredential { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
