// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parallel import job
//!
//! Top-level features are split into chunks and imported in parallel, each
//! chunk by its own [`Importer`]. Once every worker has flushed, the
//! deferred links are resolved.

use std::sync::Arc;
use std::time::Instant;

use citydb_import_core::Feature;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ImportConfig;
use crate::deferred::XlinkResolver;
use crate::error::{Error, Result};
use crate::importer::{ImportServices, Importer};
use crate::stats::ImportStats;
use crate::storage::Storage;

pub struct ImportJob {
    services: Arc<ImportServices>,
    cancel: CancellationToken,
}

impl ImportJob {
    pub fn new(storage: Arc<dyn Storage>, config: ImportConfig) -> Self {
        Self {
            services: Arc::new(ImportServices::new(storage, config)),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn services(&self) -> &Arc<ImportServices> {
        &self.services
    }

    /// Import `features` and resolve their deferred links.
    ///
    /// Cancellation is checked between top-level features; rows of features
    /// imported so far are flushed and [`Error::Cancelled`] is returned.
    pub fn run(&self, features: &[Feature]) -> Result<ImportStats> {
        let config = &self.services.config;
        let start = Instant::now();
        info!(
            features = features.len(),
            worker_threads = config.worker_threads,
            features_per_task = config.features_per_task,
            "Starting import"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        let results: Vec<Result<ImportStats>> = pool.install(|| {
            features
                .par_chunks(config.features_per_task.max(1))
                .map(|chunk| self.import_chunk(chunk))
                .collect()
        });

        let mut stats = ImportStats::default();
        for result in results {
            stats.merge(&result?);
        }

        let resolver = XlinkResolver::new(self.services.storage.as_ref(), &self.services.uid_cache)
            .with_library_dir(config.library_base_dir.clone());
        stats.resolver = resolver.run(&self.services.queue)?;

        info!(
            features = stats.features(),
            geometry_nodes = stats.geometry_nodes,
            skipped_geometries = stats.skipped_geometries,
            links_queued = stats.links_queued,
            links_resolved = stats.resolver.resolved,
            links_unresolved = stats.resolver.unresolved,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Import finished"
        );
        Ok(stats)
    }

    fn import_chunk(&self, chunk: &[Feature]) -> Result<ImportStats> {
        let mut importer = Importer::new(Arc::clone(&self.services));
        for feature in chunk {
            if self.cancel.is_cancelled() {
                warn!(gml_id = ?feature.id, "Import cancelled");
                importer.flush_all()?;
                return Err(Error::Cancelled);
            }
            importer.import_feature(feature)?;
        }
        importer.flush_all()?;
        Ok(importer.into_stats())
    }
}
