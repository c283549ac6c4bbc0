use std::path::PathBuf;

use super::{Cardinality, Stage, StageKind, push_path_flags};

#[derive(Debug, Clone, Default)]
pub struct StapleParams {
    pub config_files: Vec<PathBuf>,
}

/// Attaches notarization tickets with `rcodesign staple`.
#[derive(Debug, Clone)]
pub struct StapleStage {
    params: StapleParams,
}

impl StapleStage {
    pub fn new(params: StapleParams) -> Self {
        Self { params }
    }
}

impl Stage for StapleStage {
    fn kind(&self) -> StageKind {
        StageKind::Staple
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::OneOrMore
    }

    fn arguments(&self, artifact: &str) -> Vec<String> {
        let mut args = vec!["staple".to_string()];
        push_path_flags(&mut args, "--config-file", &self.params.config_files);
        args.push(artifact.to_string());
        args
    }
}
