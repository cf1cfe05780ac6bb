// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CityDB Import CLI
//!
//! Reads a JSON array of parsed features, imports it into in-memory storage
//! and prints the import statistics and table sizes as JSON.
//!
//! Options not given on the command line fall back to the `CITYDB_*`
//! environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use citydb_import_core::Feature;
use citydb_import_processing::{
    AffineTransform, GmlIdMode, ImportConfig, ImportJob, ImportStats, MemoryStorage,
};

#[derive(Parser)]
#[command(name = "citydb-import")]
#[command(about = "Import city model features into a 3D city database", long_about = None)]
struct Args {
    /// JSON file with an array of features
    input: PathBuf,

    /// Rows buffered per table before a flush
    #[arg(long)]
    batch_size: Option<usize>,

    /// Replace gml:ids with generated ones using this prefix
    #[arg(long)]
    replace_ids: Option<String>,

    /// Affine transformation, 12 row-major values of a 3x4 matrix
    #[arg(long)]
    affine: Option<String>,

    /// Skip appearances
    #[arg(long)]
    no_appearance: bool,

    /// Base directory of relative library objects
    #[arg(long)]
    library_dir: Option<PathBuf>,

    /// Worker threads
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Serialize)]
struct Report {
    stats: ImportStats,
    tables: BTreeMap<String, usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,citydb_import_processing=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = apply_args(ImportConfig::from_env(), &args)?;

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let features: Vec<Feature> = serde_json::from_str(&text)
        .with_context(|| format!("parsing features from {}", args.input.display()))?;

    tracing::info!(
        input = %args.input.display(),
        features = features.len(),
        batch_size = config.batch_size,
        worker_threads = config.worker_threads,
        "Importing"
    );

    let storage = Arc::new(MemoryStorage::new());
    let job = ImportJob::new(storage.clone(), config);
    let stats = job.run(&features).context("import failed")?;

    let report = Report {
        stats,
        tables: storage.table_sizes(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn apply_args(mut config: ImportConfig, args: &Args) -> Result<ImportConfig> {
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size.max(1);
    }
    if let Some(prefix) = &args.replace_ids {
        config.gml_id_mode = GmlIdMode::Replace {
            prefix: prefix.clone(),
        };
    }
    if let Some(affine) = &args.affine {
        config.transform =
            Some(AffineTransform::parse(affine).context("invalid affine transformation")?);
    }
    if args.no_appearance {
        config.import_appearance = false;
    }
    if let Some(dir) = &args.library_dir {
        config.library_base_dir = Some(dir.clone());
    }
    if let Some(workers) = args.workers {
        config.worker_threads = workers.max(1);
    }
    Ok(config)
}
