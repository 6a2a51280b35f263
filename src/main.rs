//! Division Maps CLI
//!
//! Builds simplified TopoJSON and GeoJSON electoral division maps from a
//! MapInfo boundary dataset.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use division_maps::error::EXIT_FAILURE;
use division_maps::pipeline::{work, StageSpec};
use division_maps::{build_runtime, io, run_pipeline, Config, PipelineError, WorkPlan};

#[derive(Parser)]
#[command(name = "division-maps")]
#[command(about = "Build multi-resolution electoral division maps", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Bound the number of concurrently running tool invocations per stage
    #[arg(long, global = true)]
    max_concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every map file (default if no command specified)
    Run {
        /// Download and extract the source archive first
        #[arg(long)]
        fetch: bool,
    },

    /// Download and extract the source archive only
    Fetch,

    /// Print the files a build would produce without running anything
    Plan,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file (JSON or YAML by extension)
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        None => run_command(&cli.config, cli.max_concurrency, false),
        Some(Commands::Run { fetch }) => run_command(&cli.config, cli.max_concurrency, fetch),
        Some(Commands::Fetch) => fetch_command(&cli.config),
        Some(Commands::Plan) => plan_command(&cli.config),
        Some(Commands::Validate) => validate_command(&cli.config),
        Some(Commands::GenerateConfig { output }) => generate_config_command(&output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", error_line(&e));
            ExitCode::from(exit_code(&e))
        }
    }
}

/// The one line a failed command reports; the library never logs it as an error.
fn error_line(error: &anyhow::Error) -> String {
    format!("Error: {}", error)
}

/// Process exit code for a failed command.
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<PipelineError>()
        .map_or(EXIT_FAILURE, PipelineError::exit_code)
}

fn load_config(path: &Path, max_concurrency: Option<usize>) -> Result<Config> {
    let mut config = Config::from_file(path)?;

    // Apply overrides
    if max_concurrency.is_some() {
        config.processing.max_concurrency = max_concurrency;
    }

    config.validate()?;
    Ok(config)
}

fn run_command(config_path: &Path, max_concurrency: Option<usize>, fetch: bool) -> Result<()> {
    let config = load_config(config_path, max_concurrency)?;

    let runtime = build_runtime()?;
    let report = runtime.block_on(run_pipeline(config, fetch))?;

    println!("{}", report);
    Ok(())
}

fn fetch_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path, None)?;

    let runtime = build_runtime()?;
    let source = runtime.block_on(io::fetch_archive(&config))?;

    println!("Source ready at: {}", source.display());
    Ok(())
}

fn plan_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path, None)?;
    let plan = WorkPlan::for_config(&config);

    let print_outputs = |title: &str, specs: Vec<StageSpec>| {
        println!("\n=== {} ({} units) ===", title, specs.len());
        for spec in &specs {
            println!("  {}", spec);
        }
    };

    print_outputs("Converting base", work::reprojection(&config));
    print_outputs("Converting to topology", work::topology(&config));
    print_outputs("Simplifying", work::simplify(&config));
    print_outputs("Filtering divisions", work::filter_divisions(&config));

    println!("\n=== Re-encoding ===");
    println!(
        "  every file in {} at listing time ({} from a clean run)",
        config.output.topojson_dir.display(),
        plan.expected_topojson
    );
    println!("\n{}", plan);
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# Division Maps Configuration

# Prefix of every generated file: {baseFileName}-p{percentage}-{division}.json
baseFileName: "federal-2019"

# === SOURCE: where the boundary archive comes from ===
downloadDir: "download"
baseUrl: "https://www.aec.gov.au/Electorates/gis/files/"
download:
  zip: "national-midmif-09052016.zip"
  # MapInfo file inside the archive, relative to downloadDir
  mapinfoFile: "COM_ELB.TAB"

# Percentage of removable points to retain (1-100).
# 100 is always produced as the full-resolution map.
simplifyPercentages: [50, 10, 1]

# Divisions to cut out at every simplification level.
# name must match the filterField attribute; filename is the file token.
divisions:
  - name: "Adelaide"
    filename: "adelaide"
  - name: "Kingsford Smith"
    filename: "kingsford-smith"

# Output CRS (EPSG:4326 is WGS84 longitude/latitude)
targetCrs: "EPSG:4326"

# Attribute holding the division name
filterField: "Elect_div"

# === OUTPUT ===
output:
  topojsonDir: "topojson"
  geojsonDir: "geojson"

# === TOOLS: executable names or absolute paths ===
tools:
  ogr2ogr: "ogr2ogr"
  mapshaper: "mapshaper"

# === PROCESSING ===
processing:
  # Limit concurrent tool invocations per stage (unbounded if omitted)
  # maxConcurrency: 8

  # On a failed unit: "drain" lets running siblings finish, "abort" kills them
  onFailure: "drain"

  # Re-encode inputs: "listing" scans topojsonDir, "manifest" uses files this run wrote
  reencodeFrom: "listing"

  # Save metrics JSON after a successful run
  # metricsOutputPath: "metrics.json"
"#;

fn generate_config_command(output: &Path) -> Result<()> {
    let contents = match output.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::to_string_pretty(&Config::from_yaml(SAMPLE_CONFIG)?)?,
        _ => SAMPLE_CONFIG.to_string(),
    };

    std::fs::write(output, contents)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
