//! WorkSet construction for each stage.
//!
//! Pure functions from configuration (and, for the last stage, a manifest of
//! discovered files) to stage specs.

use crate::config::{Config, Percentage};
use crate::engine::{equals_expression, Format, Script};
use crate::paths::{PathResolver, Region};
use crate::pipeline::{Manifest, StageSpec};
use crate::process::ConversionSpec;

/// Stage 1: reproject the MapInfo source into full-resolution GeoJSON.
pub fn reprojection(config: &Config) -> Vec<StageSpec> {
    let paths = PathResolver::new(config);
    vec![StageSpec::convert(ConversionSpec {
        input: paths.mapinfo_source(),
        output: paths.reprojected(),
        target_crs: config.target_crs.clone(),
    })
    .described("Converting MapInfo files to GeoJSON")]
}

/// Stage 2: encode the full-resolution GeoJSON as TopoJSON.
pub fn topology(config: &Config) -> Vec<StageSpec> {
    let paths = PathResolver::new(config);
    vec![StageSpec::engine(
        Script::read(paths.reprojected())
            .write(paths.topology(Percentage::FULL, Region::All), Format::TopoJson),
    )
    .described("Converting GeoJSON file to TopoJSON")]
}

/// Percentages that need a simplification pass. The full topology already
/// serves as the 100% level, so 100 is skipped.
pub fn simplified_levels(config: &Config) -> impl Iterator<Item = Percentage> + '_ {
    config
        .simplify_percentages
        .iter()
        .copied()
        .filter(|p| !p.is_full())
}

/// Stage 3: one simplified TopoJSON per configured percentage.
pub fn simplify(config: &Config) -> Vec<StageSpec> {
    let paths = PathResolver::new(config);
    let full = paths.topology(Percentage::FULL, Region::All);
    simplified_levels(config)
        .map(|pct| {
            StageSpec::engine(
                Script::read(&full)
                    .simplify(pct)
                    .write(paths.topology(pct, Region::All), Format::TopoJson),
            )
            .described(format!("Simplify retaining {}% of removable points", pct))
        })
        .collect()
}

/// Stage 4: the cross product of percentages and divisions, percentage-major.
pub fn filter_divisions(config: &Config) -> Vec<StageSpec> {
    let paths = PathResolver::new(config);
    config
        .simplify_percentages
        .iter()
        .flat_map(|&pct| {
            let source = paths.topology(pct, Region::All);
            config.divisions.iter().map(move |division| {
                StageSpec::engine(
                    Script::read(&source)
                        .filter(equals_expression(&config.filter_field, &division.name))
                        .write(
                            paths.topology(pct, Region::Division(division)),
                            Format::TopoJson,
                        ),
                )
            })
        })
        .collect()
}

/// Stage 5: one GeoJSON re-encoding per discovered TopoJSON file.
pub fn reencode(config: &Config, inputs: &Manifest) -> Vec<StageSpec> {
    let paths = PathResolver::new(config);
    inputs
        .files()
        .iter()
        .filter_map(|input| {
            let output = paths.geojson_for(input)?;
            Some(StageSpec::engine(
                Script::read(input).write(output, Format::GeoJson),
            ))
        })
        .collect()
}

/// Unit counts per stage, for planning output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPlan {
    pub simplify: usize,
    pub filter: usize,
    /// TopoJSON files a clean run leaves behind, hence GeoJSON files it writes
    pub expected_topojson: usize,
}

impl WorkPlan {
    pub fn for_config(config: &Config) -> Self {
        let simplify = simplified_levels(config).count();
        let filter = config.simplify_percentages.len() * config.divisions.len();
        Self {
            simplify,
            filter,
            expected_topojson: 1 + simplify + filter,
        }
    }
}

impl std::fmt::Display for WorkPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Simplify: {} units, Filter: {} units, Re-encode: {} units (expected)",
            self.simplify, self.filter, self.expected_topojson
        )
    }
}
