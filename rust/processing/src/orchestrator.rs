// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Batch orchestration
//!
//! Every writer kind buffers its rows until it holds `batch_size` of them or
//! until it is flushed explicitly. Flushing a kind first flushes every kind
//! it depends on, in an order derived from a fixed dependency table, so a
//! foreign key never points at a row that is still buffered.

use std::sync::Arc;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::Result;
use crate::rows::RowBatch;
use crate::storage::Storage;

/// One buffered writer per table (or table family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WriterKind {
    CityObject,
    SurfaceGeometry,
    ImplicitGeometry,
    GenericAttribute,
    Appearance,
    SurfaceData,
    TextureParam,
    Building,
    Room,
    BuildingInstallation,
    BuildingFurniture,
    ThematicSurface,
    Opening,
    OpeningToThemSurface,
    CityFurniture,
    GenericCityObject,
    LandUse,
    CityObjectGroup,
    GroupMember,
    Bridge,
    Tunnel,
}

impl WriterKind {
    pub const ALL: [WriterKind; 21] = [
        Self::CityObject,
        Self::SurfaceGeometry,
        Self::ImplicitGeometry,
        Self::GenericAttribute,
        Self::Appearance,
        Self::SurfaceData,
        Self::TextureParam,
        Self::Building,
        Self::Room,
        Self::BuildingInstallation,
        Self::BuildingFurniture,
        Self::ThematicSurface,
        Self::Opening,
        Self::OpeningToThemSurface,
        Self::CityFurniture,
        Self::GenericCityObject,
        Self::LandUse,
        Self::CityObjectGroup,
        Self::GroupMember,
        Self::Bridge,
        Self::Tunnel,
    ];

    /// Direct prerequisites: kinds whose rows this kind references.
    pub fn dependencies(self) -> &'static [WriterKind] {
        use WriterKind::*;
        match self {
            CityObject => &[],
            SurfaceGeometry => &[CityObject],
            ImplicitGeometry => &[SurfaceGeometry],
            GenericAttribute => &[CityObject],
            Appearance => &[CityObject],
            SurfaceData => &[Appearance],
            TextureParam => &[SurfaceData, SurfaceGeometry],
            Building => &[CityObject, SurfaceGeometry],
            Room => &[CityObject, Building, SurfaceGeometry],
            BuildingInstallation => &[CityObject, Building, Room, SurfaceGeometry, ImplicitGeometry],
            BuildingFurniture => &[CityObject, Room, SurfaceGeometry, ImplicitGeometry],
            ThematicSurface => &[CityObject, Building, Room, BuildingInstallation, SurfaceGeometry],
            Opening => &[CityObject, SurfaceGeometry, ImplicitGeometry],
            OpeningToThemSurface => &[Opening, ThematicSurface],
            CityFurniture => &[CityObject, SurfaceGeometry, ImplicitGeometry],
            GenericCityObject => &[CityObject, SurfaceGeometry, ImplicitGeometry],
            LandUse => &[CityObject, SurfaceGeometry],
            CityObjectGroup => &[CityObject, SurfaceGeometry],
            GroupMember => &[CityObjectGroup, CityObject],
            Bridge => &[CityObject, SurfaceGeometry],
            Tunnel => &[CityObject, SurfaceGeometry],
        }
    }

    /// Every kind reachable through dependencies, excluding `self`.
    pub fn transitive_dependencies(self) -> Vec<WriterKind> {
        let mut out = Vec::new();
        let mut stack: Vec<WriterKind> = self.dependencies().to_vec();
        while let Some(kind) = stack.pop() {
            if !out.contains(&kind) {
                out.push(kind);
                stack.extend_from_slice(kind.dependencies());
            }
        }
        out
    }
}

/// Weight of every kind: the length of the longest chain of kinds that
/// depend on it. Dependencies always weigh more than their dependants.
fn weights() -> FxHashMap<WriterKind, usize> {
    let mut weights: FxHashMap<WriterKind, usize> = WriterKind::ALL.iter().map(|&k| (k, 0)).collect();
    // The table is a DAG, so weights settle within |kinds| rounds
    for _ in 0..WriterKind::ALL.len() {
        let mut changed = false;
        for kind in WriterKind::ALL {
            let w = weights[&kind];
            for dep in kind.dependencies() {
                let entry = weights.entry(*dep).or_insert(0);
                if *entry < w + 1 {
                    *entry = w + 1;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    weights
}

/// All kinds sorted by descending weight, ties in declaration order.
pub fn flush_order() -> &'static [WriterKind] {
    static ORDER: OnceLock<Vec<WriterKind>> = OnceLock::new();
    ORDER.get_or_init(|| {
        let weights = weights();
        let mut order = WriterKind::ALL.to_vec();
        order.sort_by(|a, b| weights[b].cmp(&weights[a]).then(a.cmp(b)));
        order
    })
}

/// Flush order for one kind: its transitive dependencies, then itself.
pub fn flush_order_for(kind: WriterKind) -> Vec<WriterKind> {
    let deps = kind.transitive_dependencies();
    flush_order()
        .iter()
        .copied()
        .filter(|k| *k == kind || deps.contains(k))
        .collect()
}

/// Per-worker row buffers.
pub struct Orchestrator {
    storage: Arc<dyn Storage>,
    batch_size: usize,
    buffers: FxHashMap<WriterKind, RowBatch>,
    flushed_batches: usize,
}

impl Orchestrator {
    pub fn new(storage: Arc<dyn Storage>, batch_size: usize) -> Self {
        Self {
            storage,
            batch_size: batch_size.max(1),
            buffers: FxHashMap::default(),
            flushed_batches: 0,
        }
    }

    /// Buffer rows of `kind`, flushing when the threshold is reached.
    pub fn push(&mut self, kind: WriterKind, rows: RowBatch) -> Result<()> {
        let full = match self.buffers.get_mut(&kind) {
            Some(buffer) => {
                buffer.append(rows)?;
                buffer.len() >= self.batch_size
            }
            None => {
                let full = rows.len() >= self.batch_size;
                self.buffers.insert(kind, rows);
                full
            }
        };
        if full {
            self.flush(kind)?;
        }
        Ok(())
    }

    /// Flush `kind` after everything it depends on.
    pub fn flush(&mut self, kind: WriterKind) -> Result<()> {
        for k in flush_order_for(kind) {
            self.flush_one(k)?;
        }
        Ok(())
    }

    /// Flush every buffered kind in global order.
    pub fn flush_all(&mut self) -> Result<()> {
        for &k in flush_order() {
            self.flush_one(k)?;
        }
        Ok(())
    }

    fn flush_one(&mut self, kind: WriterKind) -> Result<()> {
        let Some(buffer) = self.buffers.get_mut(&kind) else {
            return Ok(());
        };
        if buffer.is_empty() {
            return Ok(());
        }
        let empty = buffer.empty_like();
        let batch = std::mem::replace(buffer, empty);
        debug!(kind = ?kind, table = batch.table(), rows = batch.len(), "Flushing batch");
        self.storage.write(batch)?;
        self.flushed_batches += 1;
        Ok(())
    }

    /// Rows currently buffered for `kind`.
    pub fn pending(&self, kind: WriterKind) -> usize {
        self.buffers.get(&kind).map_or(0, RowBatch::len)
    }

    /// Buffered rows of `kind`, for reads of not yet flushed data.
    pub fn buffered(&self, kind: WriterKind) -> Option<&RowBatch> {
        self.buffers.get(&kind)
    }

    pub fn flushed_batches(&self) -> usize {
        self.flushed_batches
    }
}
