//! Configuration for the division map build.
//!
//! The document keeps the camelCase shape of the existing `config.json`, so an
//! existing config file loads unchanged. Everything beyond the core keys is
//! optional and falls back to serde defaults.

use crate::crs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// File name token reserved for the undivided (all divisions) map files.
pub const ALL_DIVISIONS: &str = "alldivisions";

/// Main configuration for the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Prefix shared by every generated file, e.g. `federal-2019`
    pub base_file_name: String,

    /// Directory the archive is downloaded and extracted into
    pub download_dir: PathBuf,

    /// URL prefix the archive name is appended to
    #[serde(default)]
    pub base_url: String,

    /// Archive and extracted source file names
    pub download: DownloadConfig,

    /// Simplification levels, as percentages of removable points retained
    pub simplify_percentages: Vec<Percentage>,

    /// Divisions to cut out of the full map
    pub divisions: Vec<Division>,

    /// Coordinate reference system of every output file
    #[serde(default = "default_target_crs")]
    pub target_crs: String,

    /// Attribute holding the division name in the source data
    #[serde(default = "default_filter_field")]
    pub filter_field: String,

    /// Output directories
    #[serde(default)]
    pub output: OutputConfig,

    /// External tool names or paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Execution tuning
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Names of the downloaded archive and the MapInfo file inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConfig {
    /// Zip archive name, relative to `baseUrl`
    pub zip: String,

    /// MapInfo interchange file inside the archive, relative to `downloadDir`
    pub mapinfo_file: String,
}

/// A named division and the file name token used for its maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Division {
    /// Value of the filter field identifying this division
    pub name: String,

    /// File name token, e.g. `div-a` for `base-p10-div-a.json`
    pub filename: String,
}

impl Division {
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
        }
    }
}

/// Percentage of removable points kept when simplifying, in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Percentage(u8);

impl Percentage {
    /// Full resolution, no points removed.
    pub const FULL: Percentage = Percentage(100);

    pub fn new(value: u32) -> Option<Self> {
        match value {
            1..=100 => Some(Self(value as u8)),
            _ => None,
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_full(self) -> bool {
        self.0 == 100
    }
}

impl TryFrom<u32> for Percentage {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("percentage must be between 1 and 100, got {}", value))
    }
}

impl From<Percentage> for u32 {
    fn from(p: Percentage) -> u32 {
        p.0 as u32
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output directory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Directory for TopoJSON files (full, simplified and per-division)
    #[serde(default = "default_topojson_dir")]
    pub topojson_dir: PathBuf,

    /// Directory for the GeoJSON re-encodings
    #[serde(default = "default_geojson_dir")]
    pub geojson_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            topojson_dir: default_topojson_dir(),
            geojson_dir: default_geojson_dir(),
        }
    }
}

/// External executables. Bare names are looked up on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    #[serde(default = "default_ogr2ogr")]
    pub ogr2ogr: String,

    #[serde(default = "default_mapshaper")]
    pub mapshaper: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ogr2ogr: default_ogr2ogr(),
            mapshaper: default_mapshaper(),
        }
    }
}

/// What happens to in-flight sibling work once a unit in the same stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Let siblings finish and discard their results
    #[default]
    Drain,
    /// Cancel siblings immediately
    Abort,
}

/// Where the GeoJSON stage gets its inputs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReencodeSource {
    /// Re-scan the TopoJSON directory after filtering
    #[default]
    Listing,
    /// Use the files the earlier stages reported writing
    Manifest,
}

/// Processing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    /// Upper bound on concurrently running units within a stage (unbounded if unset)
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default)]
    pub on_failure: FailurePolicy,

    #[serde(default)]
    pub reencode_from: ReencodeSource,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // YAML is a superset of JSON
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Full URL of the source archive.
    pub fn archive_url(&self) -> String {
        format!("{}{}", self.base_url, self.download.zip)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_file_name.trim().is_empty() {
            anyhow::bail!("baseFileName must not be empty");
        }
        if !is_filesystem_safe(&self.base_file_name) {
            anyhow::bail!(
                "baseFileName '{}' may only contain letters, digits, '.', '_' and '-'",
                self.base_file_name
            );
        }
        if self.download.mapinfo_file.is_empty() {
            anyhow::bail!("download.mapinfoFile must not be empty");
        }
        if self.simplify_percentages.is_empty() {
            anyhow::bail!("simplifyPercentages must list at least one percentage");
        }

        let mut seen = HashSet::new();
        for pct in &self.simplify_percentages {
            if !seen.insert(*pct) {
                anyhow::bail!("Duplicate simplification percentage: {}", pct);
            }
        }

        let mut names = HashSet::new();
        let mut filenames = HashSet::new();
        for division in &self.divisions {
            if division.name.is_empty() {
                anyhow::bail!("Division names must not be empty");
            }
            if !names.insert(division.name.as_str()) {
                anyhow::bail!("Duplicate division name: {}", division.name);
            }
            if !filenames.insert(division.filename.as_str()) {
                anyhow::bail!("Duplicate division filename: {}", division.filename);
            }
            if !is_filesystem_safe(&division.filename) {
                anyhow::bail!(
                    "Division filename '{}' may only contain letters, digits, '.', '_' and '-'",
                    division.filename
                );
            }
            if division.filename == ALL_DIVISIONS {
                anyhow::bail!("Division filename '{}' is reserved", ALL_DIVISIONS);
            }
        }

        if crs::epsg_number(&self.target_crs).is_none() {
            anyhow::bail!("targetCrs must be an EPSG code such as {}, got '{}'", crs::codes::WGS84, self.target_crs);
        }
        if self.filter_field.is_empty() {
            anyhow::bail!("filterField must not be empty");
        }
        if self.output.topojson_dir == self.output.geojson_dir {
            anyhow::bail!("output.topojsonDir and output.geojsonDir must differ");
        }
        if self.processing.max_concurrency == Some(0) {
            anyhow::bail!("processing.maxConcurrency must be > 0");
        }
        Ok(())
    }
}

fn is_filesystem_safe(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// Default value functions for serde
fn default_target_crs() -> String { crs::codes::WGS84.to_string() }
fn default_filter_field() -> String { "Elect_div".to_string() }
fn default_topojson_dir() -> PathBuf { PathBuf::from("topojson") }
fn default_geojson_dir() -> PathBuf { PathBuf::from("geojson") }
fn default_ogr2ogr() -> String { "ogr2ogr".to_string() }
fn default_mapshaper() -> String { "mapshaper".to_string() }
