use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use glob::glob;
use serde::Deserialize;

use crate::pipeline::PipelinePlan;
use crate::process::default_program;
use crate::stages::{NotarizeParams, SignParams, StapleParams};

/// A signing job as written in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub sign: bool,
    #[serde(default)]
    pub notarize: bool,
    #[serde(default)]
    pub staple: bool,
    #[serde(default)]
    pub notarize_concurrency: usize,
    #[serde(default)]
    pub rcodesign: Option<PathBuf>,
    #[serde(default)]
    pub config_files: Vec<PathBuf>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub pem_files: Vec<PathBuf>,
    #[serde(default)]
    pub p12_file: Option<PathBuf>,
    #[serde(default)]
    pub p12_password: Option<String>,
    /// Environment variable holding the P12 password.
    #[serde(default)]
    pub p12_password_env: Option<String>,
    #[serde(default)]
    pub certificate_der_files: Vec<PathBuf>,
    #[serde(default)]
    pub remote_sign_public_key: Vec<String>,
    #[serde(default)]
    pub remote_sign_public_key_pem_file: Option<PathBuf>,
    #[serde(default)]
    pub remote_sign_shared_secret: Option<String>,
    #[serde(default)]
    pub sign_args: Vec<String>,
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    #[serde(default)]
    pub api_issuer: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            inputs: Vec::new(),
            output_path: None,
            sign: false,
            notarize: false,
            staple: false,
            notarize_concurrency: 0,
            rcodesign: None,
            config_files: Vec::new(),
            profile: None,
            pem_files: Vec::new(),
            p12_file: None,
            p12_password: None,
            p12_password_env: None,
            certificate_der_files: Vec::new(),
            remote_sign_public_key: Vec::new(),
            remote_sign_public_key_pem_file: None,
            remote_sign_shared_secret: None,
            sign_args: Vec::new(),
            api_key_file: None,
            api_issuer: None,
            api_key: None,
        }
    }
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse job YAML: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Resolve `inputs` into artifact identifiers, preserving order.
    ///
    /// Plain paths pass through untouched since bundles are directories and
    /// outputs of earlier steps may not exist yet. Glob patterns must match
    /// at least one path.
    pub fn expand_inputs(&self) -> Result<Vec<String>> {
        let mut resolved = Vec::new();
        for input in &self.inputs {
            let input = input.trim();
            if input.is_empty() {
                continue;
            }
            if !is_pattern(input) {
                resolved.push(input.to_string());
                continue;
            }
            let mut matched: Vec<PathBuf> = glob(input)
                .with_context(|| format!("Invalid glob pattern: {input}"))?
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Failed to expand pattern: {input}"))?;
            if matched.is_empty() {
                bail!("No artifacts matched pattern: {input}");
            }
            matched.sort();
            resolved.extend(matched.into_iter().map(|p| p.to_string_lossy().into_owned()));
        }
        Ok(resolved)
    }

    pub fn program(&self) -> PathBuf {
        self.rcodesign.clone().unwrap_or_else(default_program)
    }

    fn resolved_p12_password(&self) -> Result<Option<String>> {
        if let Some(password) = &self.p12_password {
            return Ok(Some(password.clone()));
        }
        match &self.p12_password_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .with_context(|| format!("P12 password variable {var} is not set")),
            None => Ok(None),
        }
    }

    /// Translate the requested stages into a pipeline plan.
    pub fn to_plan(&self) -> Result<PipelinePlan> {
        let sign = if self.sign {
            Some(SignParams {
                config_files: self.config_files.clone(),
                profile: self.profile.clone(),
                pem_files: self.pem_files.clone(),
                p12_file: self.p12_file.clone(),
                p12_password: self.resolved_p12_password()?,
                certificate_der_files: self.certificate_der_files.clone(),
                remote_public_key: self.remote_sign_public_key.clone(),
                remote_public_key_pem_file: self.remote_sign_public_key_pem_file.clone(),
                remote_shared_secret: self.remote_sign_shared_secret.clone(),
                extra_args: self.sign_args.clone(),
                output_path: self.output_path.clone(),
            })
        } else {
            None
        };

        let notarize = self.notarize.then(|| NotarizeParams {
            config_files: self.config_files.clone(),
            api_key_file: self.api_key_file.clone(),
            api_issuer: self.api_issuer.clone(),
            api_key: self.api_key.clone(),
            staple: self.staple,
        });

        let staple = self.staple.then(|| StapleParams {
            config_files: self.config_files.clone(),
        });

        Ok(PipelinePlan {
            sign,
            notarize,
            staple,
            notarize_concurrency: self.notarize_concurrency,
        })
    }
}

fn is_pattern(input: &str) -> bool {
    input.contains(['*', '?', '['])
}
