use serde::Serialize;

use crate::job::JobConfig;
use crate::runner::{effective_workers, resolve_concurrency};

/// Worker count above which a warning about resource usage is raised.
pub const WIDE_FANOUT_WARNING: usize = 16;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Check a job against the resolved artifact list without running anything.
pub fn validate_job(job: &JobConfig, artifacts: &[String]) -> ValidationReport {
    let mut report = ValidationReport::default();

    if job.version != 1 {
        report
            .errors
            .push(format!("Unsupported job version: {}", job.version));
    }

    if artifacts.is_empty() {
        report
            .errors
            .push("At least one input artifact is required".into());
    }

    if !job.sign && !job.notarize && !job.staple {
        report
            .warnings
            .push("No stages requested; artifacts will pass through unchanged".into());
    }

    if job.sign {
        report.merge(validate_signing(job, artifacts));
    } else {
        if job.output_path.is_some() {
            report
                .warnings
                .push("output_path is only used when signing; ignoring".into());
        }
        if !job.sign_args.is_empty() {
            report
                .warnings
                .push("sign_args are only used when signing; ignoring".into());
        }
    }

    if job.notarize {
        report.merge(validate_notarization(job));
    }

    if job.notarize || job.staple {
        let workers = effective_workers(
            resolve_concurrency(job.notarize_concurrency, artifacts.len()),
            artifacts.len(),
        );
        if workers > WIDE_FANOUT_WARNING {
            report.warnings.push(format!(
                "{workers} concurrent notarize/staple workers; consider setting notarize_concurrency"
            ));
        }
    }

    report
}

fn validate_signing(job: &JobConfig, artifacts: &[String]) -> ValidationReport {
    let mut report = ValidationReport::default();

    if artifacts.len() > 1 {
        report.errors.push(format!(
            "Signing requires exactly one input artifact, got {}",
            artifacts.len()
        ));
    }

    if job.p12_password.is_some() && job.p12_password_env.is_some() {
        report
            .warnings
            .push("Both p12_password and p12_password_env are set; p12_password wins".into());
    }
    if job.p12_file.is_none() && (job.p12_password.is_some() || job.p12_password_env.is_some()) {
        report
            .warnings
            .push("A P12 password was given without p12_file; ignoring".into());
    }

    let has_material = !job.pem_files.is_empty()
        || job.p12_file.is_some()
        || !job.remote_sign_public_key.is_empty()
        || job.remote_sign_public_key_pem_file.is_some()
        || job.profile.is_some()
        || !job.config_files.is_empty();
    if !has_material {
        report
            .warnings
            .push("No signing material configured; rcodesign will sign ad-hoc".into());
    }

    let remote_key = !job.remote_sign_public_key.is_empty()
        || job.remote_sign_public_key_pem_file.is_some();
    if remote_key && job.remote_sign_shared_secret.is_none() {
        report
            .warnings
            .push("Remote signing public key given without a shared secret".into());
    }

    report
}

fn validate_notarization(job: &JobConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    match &job.api_key_file {
        None => report
            .errors
            .push("Notarization requires api_key_file".into()),
        Some(path) if !path.exists() => report.errors.push(format!(
            "API key file does not exist: {}",
            path.display()
        )),
        Some(_) => {}
    }
    report
}
