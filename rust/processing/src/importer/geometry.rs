// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometry tree insertion
//!
//! A planned tree is written by zipping its nodes with one block of
//! identifiers. Ids, aliases and ring ids are registered in the UID cache
//! under the document ids so that later references resolve without the
//! deferred queue.

use citydb_import_core::Geometry;
use citydb_import_geometry::{plan, AliasTarget, GeometryPlan, LinkTarget, PlannedLink};
use tracing::{debug, warn};

use super::Importer;
use crate::deferred::{GeometryRef, GeometrySlot, PendingLink};
use crate::error::Result;
use crate::ids::IdBlock;
use crate::orchestrator::WriterKind;
use crate::rows::{GeometryNode, RowBatch};
use crate::storage::Sequence;
use crate::uid_cache::{GeometryLookup, UidEntry, UidKind};

/// Where the rows of an insertion go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// The worker's surface-geometry buffer
    Buffered,
    /// Straight to storage, for shared prototypes other workers may read
    /// before this worker flushes
    Direct,
}

impl Importer {
    /// Insert a geometry tree owned by `cityobject_id`.
    ///
    /// Returns the root id, or `None` when nothing was written (unsupported
    /// root, no valid node, or a root that is only a reference).
    pub fn insert_geometry(&mut self, geometry: &Geometry, cityobject_id: Option<i64>) -> Result<Option<i64>> {
        let plan = plan(geometry, &self.services.plan_options());
        self.insert_plan(plan, cityobject_id, None, Sink::Buffered)
    }

    /// Write a planned tree.
    ///
    /// A reference at the root position is resolved into `slot`: locally when
    /// the UID cache already knows it, through the deferred queue otherwise.
    pub(crate) fn insert_plan(
        &mut self,
        plan: GeometryPlan,
        cityobject_id: Option<i64>,
        slot: Option<&GeometrySlot>,
        sink: Sink,
    ) -> Result<Option<i64>> {
        let GeometryPlan {
            nodes,
            links,
            aliases,
            materials,
            ring_ids,
            diagnostics,
        } = plan;

        for diagnostic in &diagnostics {
            warn!(gml_id = ?diagnostic.gml_id, error = %diagnostic.error, "Skipping geometry");
        }
        self.stats.skipped_geometries += diagnostics.len();

        if nodes.is_empty() {
            let mut root = None;
            for link in links {
                let resolved = self.root_link(link, slot)?;
                root = root.or(resolved);
            }
            for alias in aliases {
                if let AliasTarget::Href(target) = alias.target {
                    self.services
                        .uid_cache
                        .put(&alias.gml_id, UidEntry::alias(target, alias.reverse));
                }
            }
            for material in materials {
                if let AliasTarget::Href(target) = material.surface {
                    self.propagate(PendingLink::DeprecatedMaterial {
                        material: material.material,
                        surface: GeometryRef::GmlId(target),
                    });
                }
            }
            return Ok(root);
        }

        let block = IdBlock::allocate(
            self.services.storage.as_ref(),
            Sequence::SurfaceGeometry,
            nodes.len(),
        )?;
        let ids = block.as_slice();
        let root_id = ids[0];
        let services = std::sync::Arc::clone(&self.services);
        let cache = &services.uid_cache;

        let mut rows = Vec::with_capacity(nodes.len());
        for (node, &id) in nodes.into_iter().zip(ids) {
            let gml_id = node.gml_id.as_ref().map(|original| {
                let stored = services.output_gml_id(original);
                let mut entry = UidEntry::geometry(id, root_id, node.is_reverse);
                if stored != *original {
                    entry = entry.with_mapping(stored.clone());
                }
                cache.put(original, entry);
                stored
            });
            // Only the root of the insertion is owned by the city object
            let owner = if node.parent.is_none() { cityobject_id } else { None };
            if node.solid_deferred {
                debug!(solid_id = id, "Solid exterior has references, deferring solid payload");
                self.propagate(PendingLink::SolidGeometry { solid_id: id });
            }
            rows.push(GeometryNode {
                id,
                gml_id,
                parent_id: node.parent.map(|p| ids[p]),
                root_id,
                is_solid: node.flags.is_solid,
                is_composite: node.flags.is_composite,
                is_triangulated: node.flags.is_triangulated,
                is_xlink: false,
                is_reverse: node.is_reverse,
                payload: node.payload,
                cityobject_id: owner,
            });
        }

        for alias in aliases {
            let entry = match alias.target {
                AliasTarget::Node(index) => UidEntry::geometry(ids[index], root_id, alias.reverse),
                AliasTarget::Href(target) => UidEntry::alias(target, alias.reverse),
            };
            cache.put(&alias.gml_id, entry);
        }

        if services.config.import_appearance {
            for (ring, index) in ring_ids {
                cache.put(&ring, UidEntry::of(UidKind::Ring, ids[index]));
            }
        }

        for link in links {
            match link.parent {
                Some(parent) => self.propagate(PendingLink::SurfaceGeometry {
                    target: link.target,
                    target_kind: link.target_kind,
                    reverse: link.reverse,
                    slot: GeometrySlot::Tree {
                        parent_id: ids[parent],
                        root_id,
                    },
                }),
                None => {
                    self.root_link(link, slot)?;
                }
            }
        }

        for material in materials {
            let surface = match material.surface {
                AliasTarget::Node(index) => GeometryRef::Id(ids[index]),
                AliasTarget::Href(target) => GeometryRef::GmlId(target),
            };
            self.propagate(PendingLink::DeprecatedMaterial {
                material: material.material,
                surface,
            });
        }

        self.stats.geometry_nodes += rows.len();
        match sink {
            Sink::Buffered => self
                .orchestrator
                .push(WriterKind::SurfaceGeometry, RowBatch::Geometry(rows))?,
            Sink::Direct => self.services.storage.write(RowBatch::Geometry(rows))?,
        }
        Ok(Some(root_id))
    }

    fn root_link(&mut self, link: PlannedLink, slot: Option<&GeometrySlot>) -> Result<Option<i64>> {
        let Some(slot) = slot else {
            warn!(href = %link.target, "Geometry reference outside of a property, skipping");
            self.stats.skipped_geometries += 1;
            return Ok(None);
        };
        self.reference_geometry(&link.target, link.reverse, link.target_kind, slot.clone())
    }

    /// Point `slot` at the geometry `target`.
    ///
    /// Returns the id when the UID cache already holds the target with the
    /// requested orientation; otherwise a link is queued and `None` returned.
    pub(crate) fn reference_geometry(
        &mut self,
        target: &str,
        reverse: bool,
        target_kind: LinkTarget,
        slot: GeometrySlot,
    ) -> Result<Option<i64>> {
        if let GeometryLookup::Found(found) = self.services.uid_cache.resolve_geometry(target) {
            if found.reverse == reverse {
                self.stats.links_resolved_locally += 1;
                return Ok(Some(found.id));
            }
        }
        self.propagate(PendingLink::SurfaceGeometry {
            target: target.to_string(),
            target_kind,
            reverse,
            slot,
        });
        Ok(None)
    }
}
