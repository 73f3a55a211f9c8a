//! xsec CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use xs_univ::samples::read_file_list;
use xs_univ::{CombineEngine, ExposureTable, JsonEventSource, PersistOptions, UnivConfig};

#[derive(Parser)]
#[command(name = "xsec")]
#[command(about = "xsec - systematic universes and covariance matrices")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill universe histograms from a file list and derive covariances
    Univmake {
        /// File list (`<path> <run> <type> [triggers] [pot]` per line)
        #[arg(short, long)]
        list: PathBuf,

        /// Configuration tables (JSON). Defaults to the built-in tables.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output artifact (pretty JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Directory that relative sample paths resolve against.
        /// Defaults to the directory containing the file list.
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Also write every universe histogram.
        #[arg(long)]
        write_universes: bool,

        /// Also write every detVar histogram.
        #[arg(long)]
        write_detvars: bool,
    },

    /// Write the built-in configuration tables
    DefaultConfig {
        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Univmake { list, config, output, base_dir, write_universes, write_detvars } => {
            let opts = PersistOptions { write_universes, write_detvars };
            cmd_univmake(&list, config.as_ref(), &output, base_dir.as_deref(), opts)
        }
        Commands::DefaultConfig { output } => cmd_default_config(output.as_ref()),
        Commands::Version => {
            println!("xsec {}", xs_core::VERSION);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<UnivConfig> {
    match path {
        Some(p) => {
            tracing::info!(path = %p.display(), "loading configuration");
            UnivConfig::from_path(p).with_context(|| format!("loading config {}", p.display()))
        }
        None => Ok(UnivConfig::default()),
    }
}

fn cmd_univmake(
    list: &Path,
    config: Option<&PathBuf>,
    output: &Path,
    base_dir: Option<&Path>,
    opts: PersistOptions,
) -> Result<()> {
    let config = load_config(config)?;
    let base_dir = base_dir.or_else(|| list.parent());
    let samples = read_file_list(list, base_dir)?;
    tracing::info!(samples = samples.len(), "file list loaded");

    let exposures = ExposureTable::from_samples(&samples);
    tracing::info!(total_pot = exposures.total_pot(), "on-beam exposure");

    let mut engine = CombineEngine::new(config)?.with_exposures(exposures);
    for sample in &samples {
        let mut source = JsonEventSource::open(&sample.path)?;
        let summary = engine
            .process_sample(sample, &mut source)
            .with_context(|| format!("processing {}", sample.path.display()))?;
        tracing::info!(
            path = %sample.path.display(),
            events = summary.events,
            scale_factor = summary.scale_factor,
            replaced_weights = summary.sanitize.replaced,
            "sample merged"
        );
    }

    let artifact = engine.finalize(opts)?;
    artifact.write_json(output)?;
    tracing::info!(path = %output.display(), groups = artifact.groups.len(), "artifact written");
    Ok(())
}

fn cmd_default_config(output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(&UnivConfig::default())?;
    if let Some(path) = output {
        std::fs::write(path, json)?;
    } else {
        println!("{json}");
    }
    Ok(())
}
