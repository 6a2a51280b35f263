//! [`GeometryEngine`] backed by the `mapshaper` command line tool.

use super::{EngineOutput, GeometryEngine, Script};
use crate::error::{EngineError, PipelineError};
use crate::process::resolve_tool;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Runs each script as one `mapshaper` invocation.
#[derive(Debug, Clone)]
pub struct MapshaperEngine {
    program: String,
    kill_on_drop: bool,
}

impl MapshaperEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            kill_on_drop: false,
        }
    }

    /// Kill the mapshaper process if the awaiting task is cancelled.
    pub fn with_kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }
}

impl Default for MapshaperEngine {
    fn default() -> Self {
        Self::new("mapshaper")
    }
}

#[async_trait]
impl GeometryEngine for MapshaperEngine {
    fn name(&self) -> &str {
        "mapshaper"
    }

    async fn preflight(&self) -> Result<(), PipelineError> {
        let path = resolve_tool(&self.program)?;
        tracing::debug!("Using mapshaper at {}", path.display());
        Ok(())
    }

    async fn run(&self, script: &Script) -> Result<EngineOutput, EngineError> {
        let program = resolve_tool(&self.program).map_err(|e| EngineError::new(e.to_string()))?;

        let output = Command::new(&program)
            .args(script.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(self.kill_on_drop)
            .output()
            .await
            .map_err(|e| EngineError::new(format!("Failed to start {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::new(error_message(&stderr, output.status.code())));
        }

        Ok(EngineOutput {
            files: script.outputs(),
        })
    }
}

/// mapshaper prints its error as the last line(s) of stderr, prefixed with `Error:`.
fn error_message(stderr: &str, status: Option<i32>) -> String {
    let reported = stderr
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("Error:"))
        .or_else(|| stderr.lines().rev().map(str::trim).find(|line| !line.is_empty()));

    match (reported, status) {
        (Some(line), _) => line.trim_start_matches("Error:").trim().to_string(),
        (None, Some(code)) => format!("mapshaper exited with status {}", code),
        (None, None) => "mapshaper terminated by signal".to_string(),
    }
}
