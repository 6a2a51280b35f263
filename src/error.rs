//! Error types for the build pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when a required external tool cannot be found.
pub const EXIT_TOOL_MISSING: u8 = 127;

/// Exit status for every failure that carries no status of its own.
pub const EXIT_FAILURE: u8 = 1;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A required executable is not on the search path
    #[error("{tool} not found - {hint}")]
    ToolMissing { tool: String, hint: String },

    /// The format converter ran and exited unsuccessfully
    #[error("{tool} exited with {}", describe_status(.status))]
    ConversionFailed { tool: String, status: Option<i32> },

    /// The executable was found but could not be started
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The geometry engine reported an error; the message is passed through as-is
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Directory creation, read or write failure
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive fetch contract is not satisfied
    #[error("Source file {} does not exist - run the fetch step first", .0.display())]
    SourceMissing(PathBuf),

    /// Download or extraction of the source archive failed
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// A unit of work panicked or was cancelled before reporting a result
    #[error("Work unit '{unit}' did not complete: {message}")]
    TaskFailed { unit: String, message: String },
}

/// Error reported by a geometry engine invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl PipelineError {
    /// Create a Filesystem error for the given path
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// True for the two errors that end the run with the tool's own status.
    pub fn is_fatal_tool_error(&self) -> bool {
        matches!(
            self,
            PipelineError::ToolMissing { .. } | PipelineError::ConversionFailed { .. }
        )
    }

    /// Process exit status this error maps to at the binary boundary.
    ///
    /// Converter statuses outside `1..=255` collapse to the generic failure code.
    pub fn exit_code(&self) -> u8 {
        if !self.is_fatal_tool_error() {
            return EXIT_FAILURE;
        }
        match self {
            PipelineError::ToolMissing { .. } => EXIT_TOOL_MISSING,
            PipelineError::ConversionFailed {
                status: Some(code), ..
            } => u8::try_from(*code)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(EXIT_FAILURE),
            _ => EXIT_FAILURE,
        }
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
