//! Staged build orchestration.

mod manifest;
mod metrics;
mod orchestrator;
mod stage;
pub mod work;


pub use manifest::{discover_inputs, Manifest};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{Pipeline, PipelineReport, PipelineState, Stage, StageReport};
pub use stage::{StageExecutor, StageSpec, Work};
pub use work::WorkPlan;
