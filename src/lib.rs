//! Division Maps
//!
//! Builds a family of electoral division map files from a single MapInfo
//! boundary dataset: a full-resolution TopoJSON map, simplified versions of it
//! at each configured percentage, one map per division at every level, and a
//! GeoJSON re-encoding of every TopoJSON file.
//!
//! # Architecture
//!
//! - **Config**: camelCase configuration document with defaults and validation
//! - **Paths**: deterministic file names for every produced map
//! - **Process / Engine**: the ogr2ogr converter and the mapshaper geometry engine
//! - **I/O**: archive download and extraction, and the storage seam
//! - **Pipeline**: strictly ordered fan-out stages with metrics
//!
//! # Usage
//!
//! ```no_run
//! use division_maps::{build_runtime, run_pipeline, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.json".as_ref())?;
//!     let report = build_runtime()?.block_on(run_pipeline(config, false))?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod engine;
pub mod error;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod process;

#[cfg(test)]
pub(crate) mod log_capture;

pub use config::{Config, Division, FailurePolicy, Percentage, ReencodeSource};
pub use engine::{GeometryEngine, MapshaperEngine};
pub use error::{EngineError, PipelineError};
pub use paths::PathResolver;
pub use pipeline::{Metrics, Pipeline, PipelineReport, WorkPlan};

use anyhow::Result;
use std::sync::Arc;

/// Run the full build with the given configuration.
///
/// With `fetch` set, the source archive is downloaded and extracted first.
/// Pipeline failures are returned as [`PipelineError`] inside the
/// `anyhow::Error`, so callers can recover the exit code.
pub async fn run_pipeline(config: Config, fetch: bool) -> Result<PipelineReport> {
    config.validate()?;
    let config = Arc::new(config);

    tracing::info!("Starting division map build for {}", config.base_file_name);
    tracing::info!("{}", WorkPlan::for_config(&config));

    let engine = MapshaperEngine::new(config.tools.mapshaper.as_str())
        .with_kill_on_drop(config.processing.on_failure == FailurePolicy::Abort);

    let report = Pipeline::new(config.clone(), Arc::new(engine))
        .with_fetch(fetch)
        .run()
        .await?;

    if let Some(ref path) = config.processing.metrics_output_path {
        if let Err(e) = report.metrics.save_to_file(path) {
            tracing::warn!("Failed to save metrics to {}: {}", path, e);
        }
    }

    Ok(report)
}

/// Build the single-threaded Tokio runtime the pipeline runs on.
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
