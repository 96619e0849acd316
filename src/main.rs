//! RxMatch - medication package identification from the command line
//!
//! Thin wrapper over the library: loads a serialized catalog, runs one
//! operation and prints the outcome as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rxmatch::config::{default_config_path, load_config};
use rxmatch::{
    load_catalog, save_catalog, CatalogStore, EngineConfig, IngestOptions, MatchOrchestrator,
    MatchQuery, OcrReading, QueryImage,
};

/// RxMatch - fuzzy medication package matching
#[derive(Parser, Debug)]
#[command(name = "rxmatch")]
#[command(about = "Resolve noisy OCR text and package photos to catalog entries")]
struct Args {
    /// Engine configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match a reading and/or a package image against the catalog
    Match {
        /// Serialized catalog file
        #[arg(long)]
        catalog: PathBuf,

        /// OCR text
        #[arg(long)]
        text: Option<String>,

        /// OCR confidence of the text (0.0 - 1.0)
        #[arg(long, default_value = "1.0")]
        ocr_confidence: f32,

        /// Package image
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// Add a reference image to a catalog entry
    Ingest {
        /// Serialized catalog file
        #[arg(long)]
        catalog: PathBuf,

        /// Entry id the image belongs to
        #[arg(long)]
        entry: String,

        /// Image file
        #[arg(long)]
        image: PathBuf,

        /// Keep the image even if it duplicates an existing one
        #[arg(long)]
        allow_duplicate: bool,

        /// Output file (defaults to overwriting the catalog)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Recompute stale features and compact the catalog
    Optimize {
        /// Serialized catalog file
        #[arg(long)]
        catalog: PathBuf,

        /// Output file (defaults to overwriting the catalog)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = resolve_config(args.config.as_deref())?;

    match args.command {
        Command::Match {
            catalog,
            text,
            ocr_confidence,
            image,
        } => run_match(config, &catalog, text, ocr_confidence, image.as_deref()),
        Command::Ingest {
            catalog,
            entry,
            image,
            allow_duplicate,
            out,
        } => run_ingest(&config, &catalog, &entry, &image, allow_duplicate, out.as_deref()),
        Command::Optimize { catalog, out } => run_optimize(&config, &catalog, out.as_deref()),
    }
}

/// Explicit path must load; the default location falls back to defaults
fn resolve_config(path: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = path {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            info!("Using config {:?}", path);
            load_config(&path)
        }
        _ => Ok(EngineConfig::default()),
    }
}

fn open_catalog(config: &EngineConfig, path: &Path) -> Result<CatalogStore> {
    let store = CatalogStore::new(config);
    let report = load_catalog(path, &store)?;
    for failure in &report.failures {
        warn!(
            "Skipped image #{} of '{}': {}",
            failure.index, failure.entry_id, failure.message
        );
    }
    Ok(store)
}

fn run_match(
    config: EngineConfig,
    catalog: &Path,
    text: Option<String>,
    ocr_confidence: f32,
    image_path: Option<&Path>,
) -> Result<()> {
    if text.is_none() && image_path.is_none() {
        bail!("Nothing to match: pass --text and/or --image");
    }

    let store = open_catalog(&config, catalog)?;
    let orchestrator = MatchOrchestrator::new(config);

    let mut query = MatchQuery::new();
    if let Some(text) = text {
        query = query.with_reading(OcrReading::new(text).with_confidence(ocr_confidence));
    }
    if let Some(path) = image_path {
        let pixels = image::open(path)
            .with_context(|| format!("Failed to open image: {:?}", path))?
            .to_rgb8();
        query = query.with_features(orchestrator.extract_features(&QueryImage::new(pixels)));
    }

    let result = orchestrator.match_query(&store.snapshot(), &query);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_ingest(
    config: &EngineConfig,
    catalog: &Path,
    entry: &str,
    image_path: &Path,
    allow_duplicate: bool,
    out: Option<&Path>,
) -> Result<()> {
    let store = open_catalog(config, catalog)?;
    let pixels = image::open(image_path)
        .with_context(|| format!("Failed to open image: {:?}", image_path))?
        .to_rgb8();

    let options = IngestOptions {
        allow_duplicate,
        ..IngestOptions::default()
    };
    let outcome = store
        .ingest_image(entry, pixels, &options)
        .with_context(|| format!("Failed to ingest {:?} into '{}'", image_path, entry))?;

    save_catalog(&store, out.unwrap_or(catalog))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn run_optimize(config: &EngineConfig, catalog: &Path, out: Option<&Path>) -> Result<()> {
    let store = open_catalog(config, catalog)?;
    let report = store.optimize();

    save_catalog(&store, out.unwrap_or(catalog))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
