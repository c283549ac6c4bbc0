use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDigest {
    pub path: String,
    /// Absent for bundles (directories) and unreadable paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Compute the SHA256 digest of the file at `path` and return it as a hex string.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn digest_artifacts(artifacts: &[String]) -> Vec<ArtifactDigest> {
    artifacts
        .iter()
        .map(|artifact| {
            let path = Path::new(artifact);
            let sha256 = if path.is_file() {
                compute_sha256(path)
                    .map_err(|err| warn!(artifact = %artifact, "Skipping digest: {err:#}"))
                    .ok()
            } else {
                None
            };
            ArtifactDigest {
                path: artifact.clone(),
                sha256,
            }
        })
        .collect()
}
