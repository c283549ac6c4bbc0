use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{error, info, info_span};

use crate::digest::ArtifactDigest;
use crate::pipeline::PipelinePhase;
use crate::stages::{StageKind, StageOutcome};

static GITHUB_ACTIONS: Lazy<bool> = Lazy::new(|| {
    std::env::var("GITHUB_ACTIONS")
        .map(|v| v == "true")
        .unwrap_or(false)
});

/// Diagnostic record for one artifact processed by one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub stage: StageKind,
    pub artifact: String,
    pub success: bool,
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn from_outcome(stage: StageKind, outcome: &StageOutcome) -> Self {
        let (exit_status, stdout, stderr) = match &outcome.result {
            Some(result) => (
                Some(result.exit_status),
                result.stdout.clone(),
                result.stderr.clone(),
            ),
            None => (None, String::new(), String::new()),
        };
        Self {
            stage,
            artifact: outcome.artifact.clone(),
            success: outcome.success,
            exit_status,
            stdout,
            stderr,
            detail: outcome.detail.clone(),
        }
    }

    pub fn header(&self) -> String {
        let marker = if self.success { "✓" } else { "✗" };
        format!("{marker} {}: {}", self.stage, self.artifact)
    }

    /// Report body without the header. Exit status and failure detail only
    /// appear for failed items; empty streams are omitted.
    pub fn body(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.success {
            if let Some(code) = self.exit_status {
                lines.push(format!("exit code: {code}"));
            }
            if let Some(detail) = &self.detail {
                lines.push(detail.clone());
            }
        }
        if !self.stdout.is_empty() {
            lines.push(format!("stdout:\n{}", without_final_newline(&self.stdout)));
        }
        if !self.stderr.is_empty() {
            lines.push(format!("stderr:\n{}", without_final_newline(&self.stderr)));
        }
        lines
    }
}

/// Streams are shown as captured; only the line terminator the log line
/// itself supplies is dropped.
fn without_final_newline(stream: &str) -> &str {
    stream
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(stream)
}

/// Receives one report per processed artifact.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &ItemReport);
}

/// Routes reports through `tracing`: successes at info, failures at error.
///
/// With grouping enabled each report is wrapped in GitHub Actions
/// `::group::` markers so the runner log renders it collapsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    groups: bool,
}

impl TracingSink {
    pub fn new(groups: bool) -> Self {
        Self { groups }
    }

    /// Enable grouping when running inside GitHub Actions.
    pub fn from_env() -> Self {
        Self::new(*GITHUB_ACTIONS)
    }
}

impl ReportSink for TracingSink {
    fn report(&self, report: &ItemReport) {
        let span = info_span!("artifact", stage = %report.stage, artifact = %report.artifact);
        let _guard = span.enter();

        if self.groups {
            println!("::group::{}", report.header());
        }
        if report.success {
            info!("{}", report.header());
            for line in report.body() {
                info!("{line}");
            }
        } else {
            error!("{}", report.header());
            for line in report.body() {
                error!("{line}");
            }
        }
        if self.groups {
            println!("::endgroup::");
        }
    }
}

/// Keeps every report in memory, optionally forwarding to another sink.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<ItemReport>>,
    forward: Option<Box<dyn ReportSink>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarding(inner: impl ReportSink + 'static) -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            forward: Some(Box::new(inner)),
        }
    }

    pub fn reports(&self) -> Vec<ItemReport> {
        self.reports.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reports_for(&self, stage: StageKind) -> Vec<ItemReport> {
        self.reports()
            .into_iter()
            .filter(|report| report.stage == stage)
            .collect()
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, report: &ItemReport) {
        if let Ok(mut guard) = self.reports.lock() {
            guard.push(report.clone());
        }
        if let Some(inner) = &self.forward {
            inner.report(report);
        }
    }
}

/// Machine-readable summary of one run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// `done` or `failed`.
    pub phase: PipelinePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub items: Vec<ItemReport>,
    pub artifacts: Vec<ArtifactDigest>,
}

impl RunReport {
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create report directory: {}", parent.display())
            })?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
        Ok(())
    }
}
