// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # CityDB Import Processing
//!
//! Writes parsed city model features into a relational schema.
//!
//! ## Overview
//!
//! - **Importer**: [`Importer`] walks features and writes their rows through
//!   a per-worker [`Orchestrator`] that flushes writer kinds in dependency
//!   order
//! - **Shared services**: [`UidCache`] for same-document references,
//!   [`DeferredQueue`] for references resolved after the primary pass and
//!   [`ResolutionLock`] for deduplicating shared implicit geometry
//! - **Resolution**: [`XlinkResolver`] drains the deferred queue once every
//!   worker has flushed
//! - **Jobs**: [`ImportJob`] runs workers in parallel with cooperative
//!   cancellation
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use citydb_import_core::{Feature, FeatureType};
//! use citydb_import_processing::{ImportConfig, ImportJob, MemoryStorage};
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let job = ImportJob::new(storage.clone(), ImportConfig::default());
//! let stats = job
//!     .run(&[Feature::new(FeatureType::Building).with_id("bldg_1")])
//!     .unwrap();
//! assert_eq!(stats.features(), 1);
//! assert_eq!(storage.city_objects().len(), 1);
//! ```

pub mod config;
pub mod deferred;
pub mod error;
pub mod ids;
pub mod importer;
pub mod job;
pub mod lock;
pub mod orchestrator;
pub mod rows;
pub mod stats;
pub mod storage;
pub mod uid_cache;
pub mod writers;

pub use citydb_import_geometry::AffineTransform;
pub use config::{GmlIdMode, ImportConfig};
pub use deferred::{
    DeferredQueue, GeometryRef, GeometrySlot, PendingLink, QueuedLink, ResolverStats,
    XlinkResolver,
};
pub use error::{Error, Result};
pub use ids::IdBlock;
pub use importer::{ImportServices, Importer, Sink};
pub use job::ImportJob;
pub use lock::ResolutionLock;
pub use orchestrator::{flush_order, flush_order_for, Orchestrator, WriterKind};
pub use rows::{
    AppearanceRow, CityObjectRow, FeatureRow, GenericAttributeRow, GeometryNode, GroupMemberRow,
    ImplicitGeometryRow, RowBatch, RowUpdate, SurfaceDataRow, TableBatch, TextureParamRow, Value,
};
pub use stats::ImportStats;
pub use storage::{LookupTable, MemoryStorage, Sequence, Storage};
pub use uid_cache::{GeometryLookup, ResolvedGeometry, UidCache, UidEntry, UidKind};
pub use writers::{table_spec, writer_for, FeatureWriter, TableSpec};
