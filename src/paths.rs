//! Canonical file paths for every stage of the build.
//!
//! File names are self-describing: `{base}-p{pct}-{region}.json`, where the
//! full resolution is `p100` and the region is either `alldivisions` or a
//! division's filename token. Downstream stages (in particular the final
//! directory-driven re-encoding) rely on this so a file name alone identifies
//! a unit of work.

use crate::config::{Config, Division, Percentage, ALL_DIVISIONS};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which geographic subset a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region<'a> {
    All,
    Division(&'a Division),
}

impl Region<'_> {
    fn token(&self) -> &str {
        match self {
            Region::All => ALL_DIVISIONS,
            Region::Division(d) => &d.filename,
        }
    }
}

/// Resolution and region encoded in a generated file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileKey {
    pub percentage: Percentage,
    /// `None` for the all-divisions map, else the division's filename token
    pub division: Option<String>,
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.division {
            Some(d) => write!(f, "p{} {}", self.percentage, d),
            None => write!(f, "p{} {}", self.percentage, ALL_DIVISIONS),
        }
    }
}

/// Maps configuration values to stage paths. Pure; no filesystem access.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    config: &'a Config,
}

impl<'a> PathResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// `{base}-p{pct}-{region}.json`
    pub fn file_name(&self, percentage: Percentage, region: Region<'_>) -> String {
        format!(
            "{}-p{}-{}.json",
            self.config.base_file_name,
            percentage,
            region.token()
        )
    }

    /// The extracted MapInfo file the build starts from.
    pub fn mapinfo_source(&self) -> PathBuf {
        self.config.download_dir.join(&self.config.download.mapinfo_file)
    }

    /// Where the downloaded archive is stored.
    pub fn archive(&self) -> PathBuf {
        self.config.download_dir.join(&self.config.download.zip)
    }

    /// Stage 1 output: the reprojected full-resolution GeoJSON.
    pub fn reprojected(&self) -> PathBuf {
        self.config
            .download_dir
            .join(self.file_name(Percentage::FULL, Region::All))
    }

    /// Stage 2-4 output for a resolution and region.
    pub fn topology(&self, percentage: Percentage, region: Region<'_>) -> PathBuf {
        self.config
            .output
            .topojson_dir
            .join(self.file_name(percentage, region))
    }

    /// Stage 5 output: the GeoJSON counterpart of a TopoJSON file, same file name.
    ///
    /// Returns `None` if `topology_file` has no file name component.
    pub fn geojson_for(&self, topology_file: &Path) -> Option<PathBuf> {
        topology_file
            .file_name()
            .map(|name| self.config.output.geojson_dir.join(name))
    }

    pub fn topojson_dir(&self) -> &'a Path {
        &self.config.output.topojson_dir
    }

    pub fn geojson_dir(&self) -> &'a Path {
        &self.config.output.geojson_dir
    }

    /// Recover the resolution and region from a generated file name.
    ///
    /// Returns `None` for names this resolver would never produce.
    pub fn parse_file_name(&self, name: &str) -> Option<FileKey> {
        let stem = name.strip_suffix(".json")?;
        let rest = stem
            .strip_prefix(self.config.base_file_name.as_str())?
            .strip_prefix("-p")?;
        let (pct, region) = rest.split_once('-')?;
        if pct.is_empty() || !pct.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let percentage = Percentage::new(pct.parse().ok()?)?;
        if region.is_empty() {
            return None;
        }
        let division = (region != ALL_DIVISIONS).then(|| region.to_string());
        Some(FileKey {
            percentage,
            division,
        })
    }
}
