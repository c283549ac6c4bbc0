use std::fmt;
use std::path::PathBuf;

use super::{Cardinality, Stage, StageKind, push_flag, push_path_flags};

/// Signing material and options for `rcodesign sign`.
#[derive(Clone, Default)]
pub struct SignParams {
    pub config_files: Vec<PathBuf>,
    pub profile: Option<String>,
    pub pem_files: Vec<PathBuf>,
    pub p12_file: Option<PathBuf>,
    pub p12_password: Option<String>,
    pub certificate_der_files: Vec<PathBuf>,
    /// Public key lines of a remote signer; joined without separators.
    pub remote_public_key: Vec<String>,
    pub remote_public_key_pem_file: Option<PathBuf>,
    pub remote_shared_secret: Option<String>,
    pub extra_args: Vec<String>,
    /// Write the signed artifact here instead of signing in place.
    pub output_path: Option<String>,
}

impl SignParams {
    pub fn joined_remote_public_key(&self) -> Option<String> {
        let joined: String = self
            .remote_public_key
            .iter()
            .map(|line| line.trim())
            .collect();
        (!joined.is_empty()).then_some(joined)
    }
}

impl fmt::Debug for SignParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |secret: &Option<String>| secret.as_ref().map(|_| "***");
        f.debug_struct("SignParams")
            .field("config_files", &self.config_files)
            .field("profile", &self.profile)
            .field("pem_files", &self.pem_files)
            .field("p12_file", &self.p12_file)
            .field("p12_password", &hidden(&self.p12_password))
            .field("certificate_der_files", &self.certificate_der_files)
            .field("remote_public_key", &self.joined_remote_public_key())
            .field(
                "remote_public_key_pem_file",
                &self.remote_public_key_pem_file,
            )
            .field("remote_shared_secret", &hidden(&self.remote_shared_secret))
            .field("extra_args", &self.extra_args)
            .field("output_path", &self.output_path)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SignStage {
    params: SignParams,
}

impl SignStage {
    pub fn new(params: SignParams) -> Self {
        Self { params }
    }
}

impl Stage for SignStage {
    fn kind(&self) -> StageKind {
        StageKind::Sign
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::ExactlyOne
    }

    fn arguments(&self, artifact: &str) -> Vec<String> {
        let params = &self.params;
        let mut args = vec!["sign".to_string()];

        push_path_flags(&mut args, "--config-file", &params.config_files);
        if let Some(profile) = &params.profile {
            push_flag(&mut args, "--profile", profile);
        }
        push_path_flags(&mut args, "--pem-file", &params.pem_files);
        if let Some(p12) = &params.p12_file {
            push_flag(&mut args, "--p12-file", p12.to_string_lossy());
            if let Some(password) = &params.p12_password {
                push_flag(&mut args, "--p12-password", password);
            }
        }
        push_path_flags(&mut args, "--der-source", &params.certificate_der_files);
        if let Some(key) = params.joined_remote_public_key() {
            push_flag(&mut args, "--remote-public-key", key);
        }
        if let Some(pem) = &params.remote_public_key_pem_file {
            push_flag(&mut args, "--remote-public-key-pem-file", pem.to_string_lossy());
        }
        if let Some(secret) = &params.remote_shared_secret {
            push_flag(&mut args, "--remote-shared-secret", secret);
        }
        args.extend(params.extra_args.iter().cloned());

        args.push(artifact.to_string());
        if let Some(output) = &params.output_path {
            args.push(output.clone());
        }
        args
    }

    fn output_artifact(&self, input: &str) -> String {
        self.params
            .output_path
            .clone()
            .unwrap_or_else(|| input.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_follow_documented_order() {
        let stage = SignStage::new(SignParams {
            config_files: vec!["a.toml".into()],
            profile: Some("release".into()),
            pem_files: vec!["cert.pem".into(), "key.pem".into()],
            p12_file: Some("id.p12".into()),
            p12_password: Some("pw".into()),
            certificate_der_files: vec!["ca.der".into()],
            remote_public_key: vec!["MIIB\n".into(), "  QUFB".into()],
            remote_public_key_pem_file: Some("remote.pem".into()),
            remote_shared_secret: Some("s3cret".into()),
            extra_args: vec!["--code-signature-flags".into(), "runtime".into()],
            output_path: Some("out/App.app".into()),
        });

        assert_eq!(
            stage.arguments("App.app"),
            vec![
                "sign",
                "--config-file",
                "a.toml",
                "--profile",
                "release",
                "--pem-file",
                "cert.pem",
                "--pem-file",
                "key.pem",
                "--p12-file",
                "id.p12",
                "--p12-password",
                "pw",
                "--der-source",
                "ca.der",
                "--remote-public-key",
                "MIIBQUFB",
                "--remote-public-key-pem-file",
                "remote.pem",
                "--remote-shared-secret",
                "s3cret",
                "--code-signature-flags",
                "runtime",
                "App.app",
                "out/App.app",
            ]
        );
        assert_eq!(stage.output_artifact("App.app"), "out/App.app");
    }

    #[test]
    fn password_without_p12_file_is_ignored() {
        let stage = SignStage::new(SignParams {
            p12_password: Some("pw".into()),
            ..SignParams::default()
        });
        assert_eq!(stage.arguments("App.app"), vec!["sign", "App.app"]);
        assert_eq!(stage.output_artifact("App.app"), "App.app");
    }

    #[test]
    fn debug_hides_secrets() {
        let params = SignParams {
            p12_password: Some("pw".into()),
            remote_shared_secret: Some("s3cret".into()),
            ..SignParams::default()
        };
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("\"pw\""));
    }
}
