//! Stage execution: fan a WorkSet out as concurrent tasks and fan the results
//! back in.
//!
//! Every spec in a stage runs as its own task. Outputs come back in
//! submission order regardless of completion order. The first failure is
//! reported as soon as it is observed; what happens to siblings still in
//! flight depends on the [`FailurePolicy`]:
//!
//! - `Drain`: siblings run to completion and their results are discarded.
//! - `Abort`: siblings are cancelled; external processes are killed on drop.

use crate::config::FailurePolicy;
use crate::engine::{EngineInvoker, EngineOutput, Script};
use crate::error::{PipelineError, Result};
use crate::pipeline::Metrics;
use crate::process::{ConversionSpec, ProcessRunner};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What a unit of work does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Work {
    /// Run the external format converter
    Convert(ConversionSpec),
    /// Run a geometry engine script
    Engine(Script),
}

/// One unit of work in a fan-out stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub work: Work,
    /// Logged before the unit starts and again when it completes
    pub description: Option<String>,
}

impl StageSpec {
    pub fn convert(spec: ConversionSpec) -> Self {
        Self {
            work: Work::Convert(spec),
            description: None,
        }
    }

    pub fn engine(script: Script) -> Self {
        Self {
            work: Work::Engine(script),
            description: None,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn script(&self) -> Option<&Script> {
        match &self.work {
            Work::Engine(script) => Some(script),
            Work::Convert(_) => None,
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.work {
            Work::Convert(spec) => write!(
                f,
                "convert {} -> {} ({})",
                spec.input.display(),
                spec.output.display(),
                spec.target_crs
            ),
            Work::Engine(script) => write!(f, "{}", script),
        }
    }
}

/// Everything a spawned unit needs, cloned per task.
#[derive(Clone)]
struct UnitContext {
    invoker: EngineInvoker,
    runner: ProcessRunner,
    converter: Arc<str>,
    limit: Option<Arc<Semaphore>>,
    metrics: Arc<Metrics>,
}

impl UnitContext {
    async fn execute(&self, spec: StageSpec) -> Result<EngineOutput> {
        let _permit = match &self.limit {
            Some(limit) => Some(limit.clone().acquire_owned().await.map_err(|e| {
                PipelineError::TaskFailed {
                    unit: spec.to_string(),
                    message: e.to_string(),
                }
            })?),
            None => None,
        };

        let start = Instant::now();
        match spec.work {
            Work::Convert(conversion) => {
                if let Some(description) = &spec.description {
                    tracing::info!("{}...", description);
                }
                let result = self.runner.convert(&self.converter, &conversion).await;
                self.metrics.add_process_time(start.elapsed());
                result?;
                if let Some(description) = &spec.description {
                    tracing::info!("{}: completed", description);
                }
                Ok(EngineOutput {
                    files: vec![conversion.output],
                })
            }
            Work::Engine(script) => {
                let result = self
                    .invoker
                    .invoke(&script, spec.description.as_deref())
                    .await;
                self.metrics.add_engine_time(start.elapsed());
                result
            }
        }
    }
}

/// Runs the WorkSet of one stage.
pub struct StageExecutor {
    unit: UnitContext,
    policy: FailurePolicy,
}

impl StageExecutor {
    /// `converter` is the executable used for [`Work::Convert`] units.
    pub fn new(
        invoker: EngineInvoker,
        runner: ProcessRunner,
        converter: impl Into<Arc<str>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            unit: UnitContext {
                invoker,
                runner,
                converter: converter.into(),
                limit: None,
                metrics,
            },
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound the number of units running at once; `None` runs every unit immediately.
    pub fn with_max_concurrency(mut self, max: Option<usize>) -> Self {
        self.unit.limit = max.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Run every spec concurrently and wait for the stage to settle.
    ///
    /// Returns per-spec outputs in submission order, or the first failure.
    pub async fn run_stage(
        &self,
        name: &str,
        specs: Vec<StageSpec>,
        description: Option<&str>,
    ) -> Result<Vec<EngineOutput>> {
        if let Some(description) = description {
            tracing::info!("{}", description);
        }

        let total = specs.len();
        tracing::debug!("{}: dispatching {} units", name, total);

        let mut tasks = JoinSet::new();
        for (index, spec) in specs.into_iter().enumerate() {
            let unit = self.unit.clone();
            self.unit.metrics.add_dispatched();
            tasks.spawn(async move { (index, unit.execute(spec).await) });
        }

        let mut outputs: Vec<Option<EngineOutput>> = vec![None; total];
        let mut first_error: Option<PipelineError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => (
                    usize::MAX,
                    Err(PipelineError::TaskFailed {
                        unit: name.to_string(),
                        message: e.to_string(),
                    }),
                ),
            };

            match result {
                Ok(output) if first_error.is_none() => {
                    self.unit.metrics.add_succeeded();
                    if let Some(slot) = outputs.get_mut(index) {
                        *slot = Some(output);
                    }
                }
                Ok(_) => self.unit.metrics.add_discarded(),
                Err(e) => {
                    self.unit.metrics.add_failed();
                    if first_error.is_some() {
                        tracing::debug!("{}: further failure after stage failed: {}", name, e);
                        continue;
                    }

                    tracing::warn!("{}: a unit failed, the stage will not complete", name);
                    tracing::debug!("{}: first failure: {}", name, e);
                    if !tasks.is_empty() {
                        match self.policy {
                            FailurePolicy::Drain => tracing::warn!(
                                "{}: waiting for {} in-flight units to finish; their results will be discarded",
                                name,
                                tasks.len()
                            ),
                            FailurePolicy::Abort => {
                                tracing::warn!("{}: cancelling {} in-flight units", name, tasks.len());
                                tasks.abort_all();
                            }
                        }
                    }
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs.into_iter().flatten().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Percentage;
    use crate::engine::testing::CopyEngine;
    use crate::engine::{equals_expression, Format};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn executor(engine: Arc<CopyEngine>) -> StageExecutor {
        StageExecutor::new(
            EngineInvoker::new(engine),
            ProcessRunner::new(),
            "ogr2ogr",
            Metrics::new(),
        )
    }

    fn seed(dir: &Path) -> PathBuf {
        let input = dir.join("base-p100-alldivisions.json");
        std::fs::write(&input, r#"{"type":"Topology"}"#).unwrap();
        input
    }

    fn copy_spec(input: &Path, output: PathBuf) -> StageSpec {
        StageSpec::engine(Script::read(input).write(output, Format::TopoJson))
    }

    #[tokio::test]
    async fn test_outputs_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let input = seed(dir.path());

        // The first spec finishes last
        let engine = Arc::new(CopyEngine::new().delaying("out-0", Duration::from_millis(50)));
        let specs: Vec<_> = (0..4)
            .map(|i| copy_spec(&input, dir.path().join(format!("out-{}.json", i))))
            .collect();

        let outputs = executor(engine.clone())
            .run_stage("Simplifying", specs, Some("Creating simplified versions"))
            .await
            .unwrap();

        let produced: Vec<_> = outputs.iter().map(|o| o.files[0].clone()).collect();
        let expected: Vec<_> = (0..4).map(|i| dir.path().join(format!("out-{}.json", i))).collect();
        assert_eq!(produced, expected);
        assert!(engine.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_empty_workset_succeeds() {
        let outputs = executor(Arc::new(CopyEngine::new()))
            .run_stage("Filtering", Vec::new(), None)
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_fails_stage_and_drains_siblings() {
        let dir = TempDir::new().unwrap();
        let input = seed(dir.path());

        let engine = Arc::new(
            CopyEngine::new()
                .failing_on("Nowhere")
                .delaying("slow", Duration::from_millis(50)),
        );
        let specs = vec![
            copy_spec(&input, dir.path().join("slow.json")),
            StageSpec::engine(
                Script::read(&input)
                    .filter(equals_expression("Elect_div", "Nowhere"))
                    .write(dir.path().join("nowhere.json"), Format::TopoJson),
            ),
        ];

        let executor = executor(engine.clone());
        let err = executor.run_stage("Filtering", specs, None).await.unwrap_err();

        assert!(matches!(err, PipelineError::Engine(_)));
        assert!(err.to_string().contains("Nowhere"));
        // The slow sibling was allowed to finish and its file exists
        assert_eq!(engine.completed(), 2);
        assert!(dir.path().join("slow.json").exists());

        let snapshot = executor.unit.metrics.snapshot();
        assert_eq!(snapshot.units_failed, 1);
        assert_eq!(snapshot.units_discarded, 1);
    }

    #[tokio::test]
    async fn test_abort_policy_cancels_siblings() {
        let dir = TempDir::new().unwrap();
        let input = seed(dir.path());

        let engine = Arc::new(
            CopyEngine::new()
                .failing_on("Nowhere")
                .delaying("slow", Duration::from_secs(30)),
        );
        let specs = vec![
            copy_spec(&input, dir.path().join("slow.json")),
            StageSpec::engine(
                Script::read(&input)
                    .filter(equals_expression("Elect_div", "Nowhere"))
                    .write(dir.path().join("nowhere.json"), Format::TopoJson),
            ),
        ];

        let started = Instant::now();
        let err = executor(engine.clone())
            .with_failure_policy(FailurePolicy::Abort)
            .run_stage("Filtering", specs, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Engine(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!dir.path().join("slow.json").exists());
    }

    #[tokio::test]
    async fn test_max_concurrency_bounds_in_flight_units() {
        let dir = TempDir::new().unwrap();
        let input = seed(dir.path());

        let engine = Arc::new(CopyEngine::new().delaying("out", Duration::from_millis(10)));
        let specs: Vec<_> = (0..6)
            .map(|i| copy_spec(&input, dir.path().join(format!("out-{}.json", i))))
            .collect();

        executor(engine.clone())
            .with_max_concurrency(Some(2))
            .run_stage("Simplifying", specs, None)
            .await
            .unwrap();

        assert_eq!(engine.calls(), 6);
        assert!(engine.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_convert_with_missing_tool_is_fatal() {
        let dir = TempDir::new().unwrap();
        let executor = StageExecutor::new(
            EngineInvoker::new(Arc::new(CopyEngine::new())),
            ProcessRunner::new(),
            "ogr2ogr-not-installed-51d2",
            Metrics::new(),
        );
        let spec = StageSpec::convert(ConversionSpec {
            input: dir.path().join("ELB.TAB"),
            output: dir.path().join("base-p100-alldivisions.json"),
            target_crs: "EPSG:4326".to_string(),
        })
        .described("Converting MapInfo files to GeoJSON");

        let err = executor.run_stage("ConvertingBase", vec![spec], None).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolMissing { .. }));
        assert!(err.is_fatal_tool_error());
    }

    #[test]
    fn test_spec_display() {
        let spec = StageSpec::engine(
            Script::read("topojson/a.json")
                .simplify(Percentage::new(5).unwrap())
                .write("topojson/b.json", Format::TopoJson),
        );
        assert!(spec.to_string().contains("percentage=5%"));
        assert!(spec.script().is_some());
    }
}
