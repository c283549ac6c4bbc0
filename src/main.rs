use std::env;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use codesign_pipeline::digest::digest_artifacts;
use codesign_pipeline::job::JobConfig;
use codesign_pipeline::observability::{MetricsSnapshot, log_snapshot};
use codesign_pipeline::outputs::append_outputs;
use codesign_pipeline::pipeline::PipelineExecutor;
use codesign_pipeline::process::SystemInvoker;
use codesign_pipeline::report::{RecordingSink, RunReport, TracingSink};
use codesign_pipeline::validation::validate_job;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing(cli.log_format)?;

    match cli.command {
        Commands::Run(args) => run_job(args),
        Commands::Validate { job } => validate_job_cmd(job),
        Commands::Plan { job } => plan_job(job),
    }
}

fn configure_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|err| anyhow!(err.to_string()))
}

fn run_job(args: RunArgs) -> Result<()> {
    let RunArgs {
        job,
        report,
        print_metrics,
        metrics_json,
        metrics_prometheus,
        github_output,
    } = args;

    let (job, artifacts) = job.resolve()?;
    let plan = job.to_plan()?;
    info!(
        stages = ?plan.requested_stages(),
        artifacts = artifacts.len(),
        program = %job.program().display(),
        "Starting signing pipeline"
    );

    let recorder = Arc::new(RecordingSink::forwarding(TracingSink::from_env()));
    let executor = PipelineExecutor::new(
        plan,
        job.program(),
        Arc::new(SystemInvoker),
        recorder.clone(),
    );

    let started_at = Utc::now();
    let (state, result) = executor.run(artifacts);

    if let Some(path) = report {
        let run_report = RunReport {
            started_at,
            finished_at: Utc::now(),
            success: result.is_ok(),
            phase: state.phase,
            error: result.as_ref().err().map(ToString::to_string),
            items: recorder.reports(),
            artifacts: result
                .as_ref()
                .map(|output| digest_artifacts(&output.artifacts))
                .unwrap_or_default(),
        };
        match run_report.write(&path) {
            Ok(()) => info!(report = %path.display(), "Run report written"),
            // A failed run keeps its own error as the exit reason.
            Err(err) if result.is_err() => error!("Could not write run report: {err:#}"),
            Err(err) => return Err(err),
        }
    }

    let snapshot = executor.metrics().snapshot();
    if print_metrics {
        log_snapshot(&snapshot);
    }
    match export_metrics(&snapshot, metrics_json, metrics_prometheus) {
        Ok(()) => {}
        Err(err) if result.is_err() => error!("Could not export metrics: {err:#}"),
        Err(err) => return Err(err),
    }

    let output = result?;
    if let Some(primary) = output.primary() {
        println!("{primary}");
    }

    let github_output = github_output.or_else(|| env::var_os("GITHUB_OUTPUT").map(PathBuf::from));
    if let Some(path) = github_output {
        append_outputs(&path, &output)?;
        info!(file = %path.display(), "Step outputs written");
    }

    Ok(())
}

fn export_metrics(
    snapshot: &MetricsSnapshot,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    if let Some(path) = metrics_json {
        create_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = metrics_prometheus {
        create_parent(&path)?;
        std::fs::write(&path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn create_parent(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn validate_job_cmd(args: JobArgs) -> Result<()> {
    let (job, artifacts) = args.resolve()?;
    let report = validate_job(&job, &artifacts);

    for warning in &report.warnings {
        warn!("{warning}");
    }

    if report.is_ok() {
        info!(artifacts = artifacts.len(), "Job validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!("{error_msg}");
        }
        Err(anyhow!(
            "Job validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn plan_job(args: JobArgs) -> Result<()> {
    let (job, artifacts) = args.resolve()?;
    if artifacts.is_empty() {
        bail!("No input artifacts given");
    }
    let executor = PipelineExecutor::new(
        job.to_plan()?,
        job.program(),
        Arc::new(SystemInvoker),
        Arc::new(TracingSink::default()),
    );
    for (stage, command) in executor.describe(&artifacts)? {
        println!("[{stage}] {command}");
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "codesign-pipeline",
    version,
    about = "Sign, notarize and staple Apple artifacts with rcodesign"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the requested stages.
    Run(RunArgs),
    /// Check a job for configuration errors without invoking rcodesign.
    Validate {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Print the rcodesign command lines a run would execute.
    Plan {
        #[command(flatten)]
        job: JobArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    job: JobArgs,
    /// Write a JSON run report.
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long)]
    print_metrics: bool,
    #[arg(long = "metrics-json")]
    metrics_json: Option<PathBuf>,
    #[arg(long = "metrics-prometheus")]
    metrics_prometheus: Option<PathBuf>,
    /// Append step outputs here; defaults to $GITHUB_OUTPUT.
    #[arg(long = "github-output")]
    github_output: Option<PathBuf>,
}

/// Job settings; flags override the job file.
#[derive(Args, Default)]
struct JobArgs {
    /// YAML job file.
    #[arg(long)]
    job: Option<PathBuf>,
    /// Artifacts to process, in order. Appended to the job file's inputs.
    artifacts: Vec<String>,
    #[arg(long)]
    output_path: Option<String>,
    #[arg(long)]
    sign: bool,
    #[arg(long)]
    notarize: bool,
    #[arg(long)]
    staple: bool,
    /// Concurrent notarize/staple workers; 0 means one per artifact.
    #[arg(long)]
    notarize_concurrency: Option<usize>,
    /// Path to the rcodesign executable.
    #[arg(long)]
    rcodesign: Option<PathBuf>,
    #[arg(long = "config-file")]
    config_files: Vec<PathBuf>,
    #[arg(long)]
    profile: Option<String>,
    #[arg(long = "pem-file")]
    pem_files: Vec<PathBuf>,
    #[arg(long)]
    p12_file: Option<PathBuf>,
    /// Environment variable holding the P12 password.
    #[arg(long)]
    p12_password_env: Option<String>,
    #[arg(long = "der-file")]
    certificate_der_files: Vec<PathBuf>,
    #[arg(long = "remote-public-key")]
    remote_public_key: Vec<String>,
    #[arg(long)]
    remote_public_key_pem_file: Option<PathBuf>,
    /// Environment variable holding the remote signing shared secret.
    #[arg(long)]
    remote_shared_secret_env: Option<String>,
    /// Extra argument passed to `rcodesign sign`; repeatable.
    #[arg(long = "sign-arg", allow_hyphen_values = true)]
    sign_args: Vec<String>,
    #[arg(long)]
    api_key_file: Option<PathBuf>,
    #[arg(long)]
    api_issuer: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
}

impl JobArgs {
    fn resolve(self) -> Result<(JobConfig, Vec<String>)> {
        let mut job = match &self.job {
            Some(path) => JobConfig::load(path)?,
            None => JobConfig::default(),
        };

        job.inputs.extend(self.artifacts);
        job.sign |= self.sign;
        job.notarize |= self.notarize;
        job.staple |= self.staple;
        override_with(&mut job.output_path, self.output_path);
        override_with(&mut job.rcodesign, self.rcodesign);
        override_with(&mut job.profile, self.profile);
        override_with(&mut job.p12_file, self.p12_file);
        override_with(&mut job.p12_password_env, self.p12_password_env);
        override_with(
            &mut job.remote_sign_public_key_pem_file,
            self.remote_public_key_pem_file,
        );
        override_with(&mut job.api_key_file, self.api_key_file);
        override_with(&mut job.api_issuer, self.api_issuer);
        override_with(&mut job.api_key, self.api_key);
        if let Some(concurrency) = self.notarize_concurrency {
            job.notarize_concurrency = concurrency;
        }
        job.config_files.extend(self.config_files);
        job.pem_files.extend(self.pem_files);
        job.certificate_der_files.extend(self.certificate_der_files);
        job.remote_sign_public_key.extend(self.remote_public_key);
        job.sign_args.extend(self.sign_args);

        if let Some(var) = self.remote_shared_secret_env {
            let secret = env::var(&var)
                .with_context(|| format!("Remote shared secret variable {var} is not set"))?;
            job.remote_sign_shared_secret = Some(secret);
        }

        let artifacts = job.expand_inputs()?;
        Ok((job, artifacts))
    }
}

fn override_with<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}
