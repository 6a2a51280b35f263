//! Geometry engine seam.
//!
//! The engine executes a small script of read / simplify / filter / write
//! operations. The pipeline never touches geometry itself; it builds scripts,
//! hands them to a [`GeometryEngine`] and waits for the outcome.

mod mapshaper;
#[cfg(test)]
pub(crate) mod testing;

pub use mapshaper::MapshaperEngine;

use crate::config::Percentage;
use crate::error::{EngineError, PipelineError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Geometry encodings the engine can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    TopoJson,
    GeoJson,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::TopoJson => "topojson",
            Format::GeoJson => "geojson",
        }
    }
}

/// A single engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read a geometry file
    Input(PathBuf),
    /// Weighted Visvalingam simplification keeping `percentage` of removable points
    Simplify { percentage: Percentage },
    /// Keep only features for which the expression is true
    Filter { expression: String },
    /// Write the current layer
    Output { path: PathBuf, format: Format },
}

/// An ordered sequence of engine operations, executed as one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    operations: Vec<Operation>,
}

impl Script {
    /// Start a script that reads `path`.
    pub fn read(path: impl Into<PathBuf>) -> Self {
        Self {
            operations: vec![Operation::Input(path.into())],
        }
    }

    pub fn simplify(mut self, percentage: Percentage) -> Self {
        self.operations.push(Operation::Simplify { percentage });
        self
    }

    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.operations.push(Operation::Filter {
            expression: expression.into(),
        });
        self
    }

    pub fn write(mut self, path: impl Into<PathBuf>, format: Format) -> Self {
        self.operations.push(Operation::Output {
            path: path.into(),
            format,
        });
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Input(path) => Some(path.as_path()),
            _ => None,
        })
    }

    /// Every file the script writes, in script order.
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Output { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// mapshaper command line arguments.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        for op in &self.operations {
            match op {
                Operation::Input(path) => {
                    args.push("-i".into());
                    args.push(path.clone().into_os_string());
                }
                Operation::Simplify { percentage } => {
                    args.push("-simplify".into());
                    args.push("weighted".into());
                    args.push(format!("percentage={}%", percentage).into());
                }
                Operation::Filter { expression } => {
                    args.push("-filter".into());
                    args.push(expression.into());
                }
                Operation::Output { path, format } => {
                    args.push("-o".into());
                    args.push(path.clone().into_os_string());
                    args.push(format!("format={}", format.as_str()).into());
                }
            }
        }
        args
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for op in &self.operations {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match op {
                Operation::Input(path) => write!(f, "-i {}", path.display())?,
                Operation::Simplify { percentage } => {
                    write!(f, "-simplify weighted percentage={}%", percentage)?
                }
                Operation::Filter { expression } => write!(f, "-filter '{}'", expression)?,
                Operation::Output { path, format } => {
                    write!(f, "-o {} format={}", path.display(), format.as_str())?
                }
            }
        }
        Ok(())
    }
}

/// Filter expression matching features whose `field` equals `value`.
///
/// The value is emitted as a JSON string literal, which is also a valid
/// JavaScript literal, so quotes and backslashes in names are escaped.
pub fn equals_expression(field: &str, value: &str) -> String {
    format!("{} === {}", field, serde_json::Value::from(value))
}

/// Files produced by one successful unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOutput {
    pub files: Vec<PathBuf>,
}

/// Executes geometry scripts.
#[async_trait]
pub trait GeometryEngine: Send + Sync {
    /// Engine name used in log messages.
    fn name(&self) -> &str;

    /// Check the engine is usable before any stage starts.
    async fn preflight(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Run a script to completion. Errors carry the engine's own message.
    async fn run(&self, script: &Script) -> Result<EngineOutput, EngineError>;
}

/// Wraps engine calls as uniform, optionally described, units of work.
#[derive(Clone)]
pub struct EngineInvoker {
    engine: Arc<dyn GeometryEngine>,
}

impl EngineInvoker {
    pub fn new(engine: Arc<dyn GeometryEngine>) -> Self {
        Self { engine }
    }

    /// Run one script. A description, when given, is logged before the call
    /// and again on success; failures are left to the caller to report.
    pub async fn invoke(
        &self,
        script: &Script,
        description: Option<&str>,
    ) -> Result<EngineOutput, PipelineError> {
        if let Some(description) = description {
            tracing::info!("{}...", description);
        }
        tracing::debug!("{} {}", self.engine.name(), script);

        let output = self.engine.run(script).await?;

        if let Some(description) = description {
            tracing::info!("{}: completed", description);
        }
        Ok(output)
    }
}
