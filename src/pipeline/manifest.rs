//! Typed hand-off between stages.
//!
//! Every stage reports the files it wrote as a [`Manifest`]. The final
//! re-encoding stage is driven either by a manifest accumulated from earlier
//! stages or by [`discover_inputs`], which re-derives the set from storage.

use crate::engine::EngineOutput;
use crate::error::Result;
use crate::io::Storage;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// An ordered set of produced or discovered files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    files: Vec<PathBuf>,
}

impl Manifest {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Flatten per-unit outputs, keeping submission order.
    pub fn from_outputs(outputs: impl IntoIterator<Item = EngineOutput>) -> Self {
        Self {
            files: outputs.into_iter().flat_map(|o| o.files).collect(),
        }
    }

    pub fn extend(&mut self, other: Manifest) {
        self.files.extend(other.files);
    }

    /// Sort by path and drop duplicates.
    pub fn normalized(mut self) -> Self {
        self.files.sort();
        self.files.dedup();
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File names only, in manifest order.
    pub fn file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

/// List the files currently in `dir` as the inputs of the next stage.
pub async fn discover_inputs(storage: &dyn Storage, dir: &Path) -> Result<Manifest> {
    let files = storage.list_files(dir).await?;
    tracing::debug!("Discovered {} files in {}", files.len(), dir.display());
    Ok(Manifest::new(files).normalized())
}
