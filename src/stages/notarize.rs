use std::path::PathBuf;

use super::{Cardinality, Stage, StageKind, push_flag, push_path_flags};
use crate::error::{PipelineError, PipelineResult};

/// App Store Connect credentials and options for `rcodesign notary-submit`.
#[derive(Debug, Clone, Default)]
pub struct NotarizeParams {
    pub config_files: Vec<PathBuf>,
    pub api_key_file: Option<PathBuf>,
    pub api_issuer: Option<String>,
    pub api_key: Option<String>,
    /// Staple as part of the submission instead of only waiting for the verdict.
    pub staple: bool,
}

#[derive(Debug, Clone)]
pub struct NotarizeStage {
    params: NotarizeParams,
}

impl NotarizeStage {
    pub fn new(params: NotarizeParams) -> Self {
        Self { params }
    }

    pub fn staples(&self) -> bool {
        self.params.staple
    }
}

impl Stage for NotarizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Notarize
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::OneOrMore
    }

    fn preflight(&self) -> PipelineResult<()> {
        match &self.params.api_key_file {
            None => Err(PipelineError::MissingCredential {
                stage: StageKind::Notarize,
                credential: "an App Store Connect API key file".to_string(),
            }),
            Some(path) if !path.exists() => Err(PipelineError::MissingCredential {
                stage: StageKind::Notarize,
                credential: format!("API key file {} (not found)", path.display()),
            }),
            Some(_) => Ok(()),
        }
    }

    fn arguments(&self, artifact: &str) -> Vec<String> {
        let params = &self.params;
        let mut args = vec!["notary-submit".to_string()];

        push_path_flags(&mut args, "--config-file", &params.config_files);
        if let Some(key_file) = &params.api_key_file {
            push_flag(&mut args, "--api-key-file", key_file.to_string_lossy());
        }
        if let Some(issuer) = &params.api_issuer {
            push_flag(&mut args, "--api-issuer", issuer);
        }
        if let Some(key) = &params.api_key {
            push_flag(&mut args, "--api-key", key);
        }
        args.push(if params.staple { "--staple" } else { "--wait" }.to_string());

        args.push(artifact.to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_or_staple_flag_precedes_artifact() {
        let mut params = NotarizeParams {
            config_files: vec!["ci.toml".into()],
            api_key_file: Some("key.json".into()),
            api_issuer: Some("issuer".into()),
            api_key: Some("ABC123".into()),
            staple: false,
        };
        let waiting = NotarizeStage::new(params.clone());
        assert_eq!(
            waiting.arguments("App.dmg"),
            vec![
                "notary-submit",
                "--config-file",
                "ci.toml",
                "--api-key-file",
                "key.json",
                "--api-issuer",
                "issuer",
                "--api-key",
                "ABC123",
                "--wait",
                "App.dmg",
            ]
        );

        params.staple = true;
        let stapling = NotarizeStage::new(params);
        let args = stapling.arguments("App.dmg");
        assert_eq!(args[args.len() - 2], "--staple");
        assert!(stapling.staples());
    }

    #[test]
    fn preflight_requires_key_file() {
        let stage = NotarizeStage::new(NotarizeParams::default());
        assert!(matches!(
            stage.preflight(),
            Err(PipelineError::MissingCredential { .. })
        ));

        let stage = NotarizeStage::new(NotarizeParams {
            api_key_file: Some("/nonexistent/key.json".into()),
            ..NotarizeParams::default()
        });
        assert!(stage.preflight().is_err());
    }
}
