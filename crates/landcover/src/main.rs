use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use landcover::classify::{self, LayerOutcome};
use landcover::error::PipelineError;
use landcover::{catalog, merge, raster, vector};

/// `landcover` - BDOT10k land-cover classification and rasterization.
///
/// Scans a directory for BDOT10k layer files, assigns each feature a
/// land-cover class, merges all layers into one classified vector file and
/// burns the merged set into a single-band raster.
#[derive(Parser, Debug, Clone)]
#[command(name = "landcover", version)]
struct Args {
    /// Directory containing the BDOT10k layer files (*.geojson).
    #[arg(long, default_value = "bdot")]
    input_dir: PathBuf,

    /// Path of the merged classified vector output (GeoJSON).
    #[arg(long, default_value = "landcover.geojson")]
    output_vector: PathBuf,

    /// Path of the classified raster output (LCR1).
    #[arg(long, default_value = "landcover.lcr")]
    output_raster: PathBuf,

    /// Raster resolution in ground units per pixel.
    #[arg(long, default_value_t = 1.0)]
    resolution: f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    // Configuration errors are rejected before any file is opened.
    if !(args.resolution.is_finite() && args.resolution > 0.0) {
        return Err(PipelineError::InvalidResolution(args.resolution).into());
    }

    let files = catalog::discover(&args.input_dir, &classify::SOURCE_CODES)?;
    if files.is_empty() {
        info!(
            "no matching layer files in {}; nothing to do",
            args.input_dir.display()
        );
        return Ok(());
    }

    info!("Processing {} layer file(s)...", files.len());

    // Per-file read+classify is independent work; the indexed collect keeps
    // discovery order, which merge and paint precedence rely on.
    let outcomes: Vec<Option<LayerOutcome>> =
        files.par_iter().map(|path| process_layer(path)).collect();

    let mut dropped_total = 0usize;
    let mut sets = Vec::new();
    for outcome in outcomes.into_iter().flatten() {
        dropped_total += outcome.dropped;
        sets.push(outcome.set);
    }

    if sets.iter().all(|s| s.features.is_empty()) {
        return Err(PipelineError::NoData.into());
    }

    if dropped_total > 0 {
        info!("{} record(s) dropped across all files", dropped_total);
    }

    let merged = merge::merge(sets)?;
    info!("Merged {} classified feature(s)", merged.features.len());

    vector::write_merged(&args.output_vector, &merged)?;
    info!("Wrote merged vector layer: {}", args.output_vector.display());

    let grid = raster::rasterize(&merged, args.resolution)?;
    raster::write_lcr(&args.output_raster, &grid, merged.srs.as_deref())?;
    info!(
        "Wrote classified raster ({}x{} px): {}",
        grid.width,
        grid.height,
        args.output_raster.display()
    );

    info!(
        "SUCCESS: {} feature(s) classified, merged and rasterized",
        merged.features.len()
    );

    Ok(())
}

/// Read and classify one layer file. All failure modes here are recoverable:
/// they are logged and the file contributes nothing.
fn process_layer(path: &Path) -> Option<LayerOutcome> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_owned();

    let code = catalog::code_for(&name, &classify::SOURCE_CODES)?;

    let Some(rule) = classify::rule_for(code) else {
        warn!("skipping {}: no classification rule for code {}", name, code);
        return None;
    };

    info!("  -> processing: {}", name);

    let layer = match vector::read_layer(path) {
        Ok(layer) => layer,
        Err(err) => {
            warn!("error reading {}: {:#}", name, err);
            return None;
        }
    };

    classify::apply_rule(&rule, code, layer, &name)
}
