//! The end-to-end build: a strictly ordered sequence of fan-out stages.
//!
//! ```text
//! Fetching -> ConvertingBase -> ConvertingToTopology -> Simplifying
//!          -> FilteringDivisions -> Listing -> ReencodingToGeoJSON -> Done
//! ```
//!
//! Any failure moves the pipeline to `Aborted` and the error is returned;
//! later stages are never started. The error itself is left to the caller
//! to report, so it is logged only at debug level here.

use crate::config::{Config, FailurePolicy, ReencodeSource};
use crate::engine::{EngineInvoker, GeometryEngine};
use crate::error::{PipelineError, Result};
use crate::io::{self, LocalStorage, Storage};
use crate::paths::PathResolver;
use crate::pipeline::{discover_inputs, work, Manifest, Metrics, MetricsSnapshot, StageExecutor, StageSpec};
use crate::process::{resolve_tool, ProcessRunner};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    ConvertingBase,
    ConvertingToTopology,
    Simplifying,
    FilteringDivisions,
    Listing,
    ReencodingToGeoJson,
    Done,
    Aborted,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetching => "Fetching",
            Stage::ConvertingBase => "ConvertingBase",
            Stage::ConvertingToTopology => "ConvertingToTopology",
            Stage::Simplifying => "Simplifying",
            Stage::FilteringDivisions => "FilteringDivisions",
            Stage::Listing => "Listing",
            Stage::ReencodingToGeoJson => "ReencodingToGeoJSON",
            Stage::Done => "Done",
            Stage::Aborted => "Aborted",
        }
    }

    /// The state entered when this one succeeds. Terminal states stay put.
    pub fn next(self) -> Stage {
        match self {
            Stage::Fetching => Stage::ConvertingBase,
            Stage::ConvertingBase => Stage::ConvertingToTopology,
            Stage::ConvertingToTopology => Stage::Simplifying,
            Stage::Simplifying => Stage::FilteringDivisions,
            Stage::FilteringDivisions => Stage::Listing,
            Stage::Listing => Stage::ReencodingToGeoJson,
            Stage::ReencodingToGeoJson => Stage::Done,
            Stage::Done => Stage::Done,
            Stage::Aborted => Stage::Aborted,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Aborted)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tracks where a run is, and where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    current: Stage,
    failed_in: Option<Stage>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            current: Stage::Fetching,
            failed_in: None,
        }
    }
}

impl PipelineState {
    pub fn current(&self) -> Stage {
        self.current
    }

    /// Stage that was running when the pipeline aborted.
    pub fn failed_in(&self) -> Option<Stage> {
        self.failed_in
    }

    pub fn advance(&mut self) -> Stage {
        let next = self.current.next();
        if next != self.current {
            tracing::info!("{} -> {}", self.current, next);
        }
        self.current = next;
        next
    }

    pub fn abort(&mut self) {
        if !self.current.is_terminal() {
            self.failed_in = Some(self.current);
        }
        self.current = Stage::Aborted;
    }
}

/// Timing for one completed stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub units: usize,
    pub files: usize,
    pub elapsed: Duration,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
    /// Files written to the TopoJSON and GeoJSON directories
    pub topojson: Manifest,
    pub geojson: Manifest,
    pub metrics: MetricsSnapshot,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TopoJSON: {}, GeoJSON: {} | {}",
            self.topojson.len(),
            self.geojson.len(),
            self.metrics
        )?;
        for stage in &self.stages {
            write!(
                f,
                "\n  {}: {} units in {:.2}s",
                stage.stage,
                stage.units,
                stage.elapsed.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

/// Drives one complete build.
pub struct Pipeline {
    config: Arc<Config>,
    executor: StageExecutor,
    engine: Arc<dyn GeometryEngine>,
    storage: Arc<dyn Storage>,
    metrics: Arc<Metrics>,
    fetch: bool,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, engine: Arc<dyn GeometryEngine>) -> Self {
        let metrics = Metrics::new();
        let processing = &config.processing;
        let runner = ProcessRunner::new()
            .with_kill_on_drop(processing.on_failure == FailurePolicy::Abort);
        let executor = StageExecutor::new(
            EngineInvoker::new(engine.clone()),
            runner,
            config.tools.ogr2ogr.as_str(),
            metrics.clone(),
        )
        .with_failure_policy(processing.on_failure)
        .with_max_concurrency(processing.max_concurrency);

        Self {
            config,
            executor,
            engine,
            storage: Arc::new(LocalStorage),
            metrics,
            fetch: false,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Download and extract the source archive before converting.
    pub fn with_fetch(mut self, fetch: bool) -> Self {
        self.fetch = fetch;
        self
    }

    /// Run every stage in order.
    pub async fn run(&self) -> Result<PipelineReport> {
        let mut state = PipelineState::default();
        let mut stages = Vec::new();

        match self.run_stages(&mut state, &mut stages).await {
            Ok((topojson, geojson)) => {
                let report = PipelineReport {
                    stages,
                    topojson,
                    geojson,
                    metrics: self.metrics.snapshot(),
                };
                tracing::info!("Pipeline complete: {}", report);
                Ok(report)
            }
            Err(e) => {
                state.abort();
                tracing::warn!(
                    "Pipeline aborted in {}",
                    state.failed_in().unwrap_or(Stage::Fetching)
                );
                tracing::debug!("Abort cause: {}", e);
                Err(e)
            }
        }
    }

    /// Both tools must be present before anything is written.
    async fn preflight(&self) -> Result<()> {
        let converter = resolve_tool(&self.config.tools.ogr2ogr)?;
        tracing::debug!("Using {}", converter.display());
        self.engine.preflight().await
    }

    async fn run_stages(
        &self,
        state: &mut PipelineState,
        reports: &mut Vec<StageReport>,
    ) -> Result<(Manifest, Manifest)> {
        let config = self.config.as_ref();
        let paths = PathResolver::new(config);

        self.preflight().await?;
        if self.fetch {
            io::fetch_archive(config).await?;
        }
        let source = paths.mapinfo_source();
        if !self.storage.exists(&source).await? {
            return Err(PipelineError::SourceMissing(source));
        }

        let stage = state.advance();
        self.storage.create_dir_all(&config.download_dir).await?;
        self.run_stage(stage, work::reprojection(config), None, reports)
            .await?;

        let stage = state.advance();
        self.storage.create_dir_all(paths.topojson_dir()).await?;
        let mut topology = self
            .run_stage(stage, work::topology(config), None, reports)
            .await?;

        let stage = state.advance();
        topology.extend(
            self.run_stage(
                stage,
                work::simplify(config),
                Some("Creating simplified (smaller) versions of the full TopoJSON file:"),
                reports,
            )
            .await?,
        );

        let stage = state.advance();
        tracing::info!("Creating single-division map files at each simplification level:");
        for percentage in &config.simplify_percentages {
            tracing::info!("Maps at {}% simplification level...", percentage);
        }
        topology.extend(
            self.run_stage(stage, work::filter_divisions(config), None, reports)
                .await?,
        );

        state.advance();
        let inputs = match config.processing.reencode_from {
            ReencodeSource::Listing => {
                tracing::info!("Getting list of TopoJSON files...");
                discover_inputs(self.storage.as_ref(), paths.topojson_dir()).await?
            }
            ReencodeSource::Manifest => topology.normalized(),
        };
        for name in inputs.file_names() {
            match paths.parse_file_name(&name) {
                Some(key) => tracing::debug!("{}: {}", name, key),
                None => tracing::warn!("{} was not produced by this build; re-encoding it anyway", name),
            }
        }

        let stage = state.advance();
        self.storage.create_dir_all(paths.geojson_dir()).await?;
        let geojson = self
            .run_stage(
                stage,
                work::reencode(config, &inputs),
                Some("Converting TopoJSON files to GeoJSON..."),
                reports,
            )
            .await?;

        state.advance();
        Ok((inputs, geojson))
    }

    async fn run_stage(
        &self,
        stage: Stage,
        specs: Vec<StageSpec>,
        description: Option<&str>,
        reports: &mut Vec<StageReport>,
    ) -> Result<Manifest> {
        let units = specs.len();
        let start = Instant::now();
        let outputs = self
            .executor
            .run_stage(stage.name(), specs, description)
            .await?;
        let manifest = Manifest::from_outputs(outputs);

        reports.push(StageReport {
            stage,
            units,
            files: manifest.len(),
            elapsed: start.elapsed(),
        });
        Ok(manifest)
    }
}
