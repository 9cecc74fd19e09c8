//! SOM Gallery
//!
//! Arranges images on a self-organizing map by feature similarity and
//! browses the result in a zoomable 2D or 3D viewer.
//!
//! CLI commands:
//! - train: Train a map from a feature file and write a layout
//! - view: Open the viewer on a layout, or train one in the background
//! - inspect: Summarise a layout file

mod config;
mod error;
mod gui;
mod item;
mod logging;
mod som;
mod view;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use config::ViewMode;

#[derive(Parser)]
#[command(name = "som_gallery")]
#[command(about = "Self-organizing map image gallery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to gallery.yaml config
    #[arg(short, long, default_value = "gallery.yaml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a map and write item positions
    Train {
        /// Feature file (JSON object keyed by item id)
        #[arg(short, long)]
        features: PathBuf,

        /// Layout file to write
        #[arg(short, long, default_value = "layout.json")]
        output: PathBuf,

        /// Grid mode; defaults to view.mode from the config
        #[arg(short, long, value_enum)]
        mode: Option<ViewMode>,

        /// Seed for reproducible maps
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Launch native gallery viewer
    View {
        /// Precomputed layout file
        #[arg(short, long, conflicts_with = "features")]
        layout: Option<PathBuf>,

        /// Feature file to train on in the background
        #[arg(short, long)]
        features: Option<PathBuf>,

        #[arg(short, long, value_enum)]
        mode: Option<ViewMode>,
    },

    /// Print grid occupancy and keyword counts of a layout
    Inspect {
        #[arg(short, long, default_value = "layout.json")]
        layout: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = config::Environment::load();
    logging::init_logging(&env.log_dir);
    tracing::info!("SOM Gallery starting up");

    let cli = Cli::parse();
    tracing::debug!("CLI args parsed: config={:?}", cli.config);

    let mut config = if cli.config.exists() {
        tracing::info!("Loading config from {:?}", cli.config);
        config::Config::load(&cli.config)?
    } else {
        tracing::warn!("Config file not found: {:?}, using defaults", cli.config);
        config::Config::default()
    };

    match cli.command {
        Commands::Train {
            features,
            output,
            mode,
            seed,
        } => {
            if seed.is_some() {
                config.som.seed = seed;
            }
            let mode = mode.unwrap_or(config.view.mode);
            train(&config, &features, &output, mode)?;
        }

        Commands::View {
            layout,
            features,
            mode,
        } => {
            let source = match (layout, features) {
                (_, Some(path)) => gui::ViewerSource::Train {
                    items: item::load_features(&path)?,
                    mode: mode.unwrap_or(config.view.mode),
                },
                (Some(path), None) => gui::ViewerSource::Layout(item::LayoutFile::load(&path)?),
                (None, None) => gui::ViewerSource::Layout(
                    item::LayoutFile::load("layout.json").context("no --layout or --features given")?,
                ),
            };
            tracing::info!("Launching native gallery viewer");
            gui::run_viewer(config, env, source)?;
        }

        Commands::Inspect { layout } => {
            inspect(&item::LayoutFile::load(&layout)?);
        }
    }

    Ok(())
}

/// Train on `features` and write the positioned items to `output`
fn train(config: &config::Config, features: &Path, output: &Path, mode: ViewMode) -> anyhow::Result<()> {
    let mut items = item::load_features(features)?;
    let Some(dim) = item::feature_dim(&items)? else {
        anyhow::bail!("{} contains no items", features.display());
    };
    let shape = som::grid_shape_for(items.len(), mode, &config.som)?;
    println!(
        "Training {}x{}x{} map on {} items (dim {})...",
        shape.width,
        shape.height,
        shape.depth,
        items.len(),
        dim
    );

    let started = Instant::now();
    let samples: Vec<Vec<f64>> = items.iter().map(|i| i.features.clone()).collect();
    let handle = som::spawn_training(samples, shape, dim, config.som.clone())?;

    let mut last_percent = None;
    let trained = handle.wait(|p| {
        let percent = (p.fraction() * 100.0) as u32;
        if last_percent != Some(percent / 10) {
            last_percent = Some(percent / 10);
            println!("  {:>3}% ({}/{})", percent, p.iteration, p.total);
        }
    })?;

    som::assign_positions(&trained.map, mode, &mut items)?;
    tracing::info!(
        "Trained {} units of dim {} in {:.2?}: {} iterations, quantization error {:.4}",
        trained.map.len(),
        dim,
        started.elapsed(),
        trained.report.iterations,
        trained.report.quantization_error
    );

    let layout = item::LayoutFile::new(shape, mode, trained.report.quantization_error, items);
    layout.save(output)?;
    println!(
        "Wrote {} items to {:?} (quantization error {:.4})",
        layout.items.len(),
        output,
        layout.quantization_error
    );
    Ok(())
}

fn inspect(layout: &item::LayoutFile) {
    let shape = layout.shape;
    println!("Layout generated {}", layout.generated);
    println!(
        "Grid {}x{}x{} ({} cells, {:?}), {} items, quantization error {:.4}",
        shape.width,
        shape.height,
        shape.depth,
        shape.len(),
        layout.mode,
        layout.items.len(),
        layout.quantization_error
    );

    let occupancy = layout.occupancy();
    let mut histogram: std::collections::BTreeMap<usize, usize> = std::collections::BTreeMap::new();
    for count in occupancy.values() {
        *histogram.entry(*count).or_insert(0) += 1;
    }
    println!();
    println!("Occupancy ({} of {} cells used):", occupancy.len(), shape.len());
    println!("  empty: {}", shape.len().saturating_sub(occupancy.len()));
    for (items, cells) in &histogram {
        println!("  {} item(s): {} cells", items, cells);
    }

    let keywords = item::keyword_counts(&layout.items);
    if !keywords.is_empty() {
        println!();
        println!("Keywords ({}):", keywords.len());
        for (kw, count) in keywords.iter().take(25) {
            println!("  {:<24} {}", kw, count);
        }
    }
}
