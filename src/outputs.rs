use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::pipeline::PipelineOutput;

/// Render `output_path` and `output_paths` in the GitHub Actions
/// `$GITHUB_OUTPUT` format.
pub fn render_outputs(output: &PipelineOutput) -> String {
    let joined = output.joined();
    let mut delimiter = String::from("CODESIGN_OUTPUT_EOF");
    while joined.contains(&delimiter) {
        delimiter.push('_');
    }

    let mut rendered = format!("output_path={}\n", output.primary().unwrap_or_default());
    rendered.push_str(&format!("output_paths<<{delimiter}\n"));
    if !joined.is_empty() {
        rendered.push_str(&joined);
        rendered.push('\n');
    }
    rendered.push_str(&delimiter);
    rendered.push('\n');
    rendered
}

/// Append the outputs of a run to `path`.
pub fn append_outputs(path: &Path, output: &PipelineOutput) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open output file: {}", path.display()))?;
    file.write_all(render_outputs(output).as_bytes())
        .with_context(|| format!("Failed to write outputs: {}", path.display()))?;
    Ok(())
}
