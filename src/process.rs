//! Runs the external format converter.
//!
//! The converter's output streams are discarded; only its exit status is
//! reported. A missing executable and a non-zero status are both fatal for
//! the whole build.

use crate::error::{PipelineError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Install hint for tools the pipeline knows about.
fn install_hint(tool: &str) -> String {
    let name = Path::new(tool)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(tool);
    match name {
        "ogr2ogr" => "the GDAL library must be installed to convert the map file(s)".to_string(),
        "mapshaper" => "install it with `npm install -g mapshaper`".to_string(),
        _ => "it must be installed and on the PATH".to_string(),
    }
}

/// Resolve an executable on `PATH`, or check an explicit path.
pub fn resolve_tool(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|_| PipelineError::ToolMissing {
        tool: tool.to_string(),
        hint: install_hint(tool),
    })
}

/// A reprojection of one input file into a GeoJSON output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target_crs: String,
}

impl ConversionSpec {
    /// ogr2ogr argument list; note the destination precedes the source.
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            "-f".into(),
            "GeoJSON".into(),
            "-t_srs".into(),
            self.target_crs.clone().into(),
            self.output.clone().into_os_string(),
            self.input.clone().into_os_string(),
        ]
    }
}

/// Spawns external processes and maps their exit status.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    kill_on_drop: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child if the awaiting task is cancelled.
    pub fn with_kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }

    /// Run `tool` with `args` to completion.
    pub async fn run(&self, tool: &str, args: &[OsString]) -> Result<()> {
        let program = resolve_tool(tool)?;
        tracing::debug!("Running {} {:?}", program.display(), args);

        let status = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(self.kill_on_drop)
            .status()
            .await
            .map_err(|source| PipelineError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::ConversionFailed {
                tool: tool.to_string(),
                status: status.code(),
            })
        }
    }

    /// Run a conversion spec through the given converter executable.
    pub async fn convert(&self, tool: &str, spec: &ConversionSpec) -> Result<()> {
        // ogr2ogr's GeoJSON driver refuses to overwrite an existing file
        match tokio::fs::remove_file(&spec.output).await {
            Ok(()) => tracing::debug!("Removed stale {}", spec.output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::filesystem(&spec.output, e)),
        }
        self.run(tool, &spec.to_args()).await
    }
}
