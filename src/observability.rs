use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::stages::{StageKind, StageOutcome};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<String, StageMetrics>,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StageMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
    pub items_succeeded: u64,
    pub items_failed: u64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage: StageKind) -> StageTimer {
        StageTimer {
            stage: stage.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_outcomes(&self, stage: StageKind, outcomes: &[StageOutcome]) {
        let succeeded = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed = outcomes.len() as u64 - succeeded;
        self.record_items(stage, succeeded, failed);
    }

    pub fn record_items(&self, stage: StageKind, succeeded: u64, failed: u64) {
        if let Ok(mut guard) = self.inner.lock() {
            let metrics = guard.stages.entry(stage.to_string()).or_default();
            metrics.items_succeeded += succeeded;
            metrics.items_failed += failed;
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

pub struct StageTimer {
    stage: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StageTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.stages.entry(self.stage.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            stage = self.stage.as_str(),
            duration_ms, "Stage duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        "Pipeline metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            succeeded = metrics.items_succeeded,
            failed = metrics.items_failed,
            "Stage metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP codesign_stage_calls_total Stage invocation count\n");
        output.push_str("# TYPE codesign_stage_calls_total counter\n");
        output.push_str("# HELP codesign_stage_items_total Artifacts processed per stage by result\n");
        output.push_str("# TYPE codesign_stage_items_total counter\n");
        output.push_str(
            "# HELP codesign_stage_duration_seconds_total Accumulated stage duration in seconds\n",
        );
        output.push_str("# TYPE codesign_stage_duration_seconds_total counter\n");
        output.push_str(
            "# HELP codesign_stage_duration_seconds_max Maximum stage duration in seconds\n",
        );
        output.push_str("# TYPE codesign_stage_duration_seconds_max gauge\n");
        for (stage, metrics) in &self.stages {
            let _ = writeln!(
                output,
                "codesign_stage_calls_total{{stage=\"{stage}\"}} {}",
                metrics.calls
            );
            let _ = writeln!(
                output,
                "codesign_stage_items_total{{stage=\"{stage}\",result=\"success\"}} {}",
                metrics.items_succeeded
            );
            let _ = writeln!(
                output,
                "codesign_stage_items_total{{stage=\"{stage}\",result=\"failure\"}} {}",
                metrics.items_failed
            );
            let _ = writeln!(
                output,
                "codesign_stage_duration_seconds_total{{stage=\"{stage}\"}} {:.6}",
                metrics.total_duration_ms / 1_000.0
            );
            let _ = writeln!(
                output,
                "codesign_stage_duration_seconds_max{{stage=\"{stage}\"}} {:.6}",
                metrics.max_duration_ms / 1_000.0
            );
        }
        output.push_str("# HELP codesign_pipeline_duration_seconds Total pipeline duration\n");
        output.push_str("# TYPE codesign_pipeline_duration_seconds gauge\n");
        let _ = writeln!(
            output,
            "codesign_pipeline_duration_seconds {:.6}",
            self.total_duration_ms / 1_000.0
        );
        output
    }
}
