//! In-process engine used by tests: copies each script's input to its outputs.

use super::{EngineOutput, GeometryEngine, Operation, Script};
use crate::error::EngineError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Copies the first input of every script to each of its outputs.
///
/// A script fails if its input does not exist or if any filter expression
/// mentions one of the configured `unknown` values, mirroring a filter on a
/// region the source data does not contain.
#[derive(Default)]
pub struct CopyEngine {
    unknown: Vec<String>,
    /// Delay applied to scripts whose rendering contains the key
    delays: Vec<(String, Duration)>,
    calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    scripts: Mutex<Vec<String>>,
}

impl CopyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, value: impl Into<String>) -> Self {
        self.unknown.push(value.into());
        self
    }

    pub fn delaying(mut self, key: impl Into<String>, delay: Duration) -> Self {
        self.delays.push((key.into(), delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Scripts that ran to the end, successfully or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    async fn execute(&self, script: &Script) -> Result<EngineOutput, EngineError> {
        let rendered = script.to_string();
        if let Some((_, delay)) = self.delays.iter().find(|(key, _)| rendered.contains(key)) {
            tokio::time::sleep(*delay).await;
        }

        for op in script.operations() {
            if let Operation::Filter { expression } = op {
                if let Some(name) = self.unknown.iter().find(|n| expression.contains(n.as_str())) {
                    return Err(EngineError::new(format!("[filter] No features match {}", name)));
                }
            }
        }

        let input = script
            .inputs()
            .next()
            .ok_or_else(|| EngineError::new("[o] Missing an input layer"))?;
        let data = tokio::fs::read(input)
            .await
            .map_err(|e| EngineError::new(format!("[i] File not found ({}): {}", input.display(), e)))?;

        let outputs = script.outputs();
        for output in &outputs {
            tokio::fs::write(output, &data)
                .await
                .map_err(|e| EngineError::new(format!("[o] Unable to write {}: {}", output.display(), e)))?;
        }
        Ok(EngineOutput { files: outputs })
    }
}

#[async_trait]
impl GeometryEngine for CopyEngine {
    fn name(&self) -> &str {
        "copy"
    }

    async fn run(&self, script: &Script) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scripts.lock().unwrap().push(script.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.execute(script).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}
