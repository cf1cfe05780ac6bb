// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deferred link resolution
//!
//! Runs after every worker has flushed. Geometry links are resolved first so
//! that solids can be assembled from complete exterior shells at the end.
//! Every link is claimed in the UID cache before it is resolved, so a link
//! is resolved at most once even when several resolvers drain the queue.
//!
//! A target is looked up in the UID cache first and in storage second. A
//! link whose target cannot be found is logged and its slot stays NULL.

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::{debug, info, warn};

use citydb_import_geometry::{LinkTarget, Payload, PolygonPayload, SolidPayload};

use super::{DeferredQueue, GeometryRef, GeometrySlot, PendingLink, QueuedLink};
use crate::error::Result;
use crate::ids::IdBlock;
use crate::rows::{
    GeometryNode, GroupMemberRow, RowBatch, RowUpdate, TextureParamRow, Value, IMPLICIT_GEOMETRY,
    SURFACE_GEOMETRY,
};
use crate::storage::{LookupTable, Sequence, Storage};
use crate::uid_cache::{GeometryLookup, ResolvedGeometry, UidCache, UidKind};

/// Counters of one resolver run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub resolved: usize,
    pub unresolved: usize,
    /// Links already claimed by another resolver
    pub already_claimed: usize,
    /// Geometry rows created by copying referenced subtrees
    pub copied_nodes: usize,
}

pub struct XlinkResolver<'a> {
    storage: &'a dyn Storage,
    uid_cache: &'a UidCache,
    library_base_dir: Option<PathBuf>,
    /// Roots of trees with a member that could not be resolved
    incomplete_roots: FxHashSet<i64>,
    updates: Vec<RowUpdate>,
    texture_params: Vec<TextureParamRow>,
    group_members: Vec<GroupMemberRow>,
    stats: ResolverStats,
}

impl<'a> XlinkResolver<'a> {
    pub fn new(storage: &'a dyn Storage, uid_cache: &'a UidCache) -> Self {
        Self {
            storage,
            uid_cache,
            library_base_dir: None,
            incomplete_roots: FxHashSet::default(),
            updates: Vec::new(),
            texture_params: Vec::new(),
            group_members: Vec::new(),
            stats: ResolverStats::default(),
        }
    }

    pub fn with_library_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.library_base_dir = dir;
        self
    }

    /// Drain the queue and resolve everything in it.
    pub fn run(mut self, queue: &DeferredQueue) -> Result<ResolverStats> {
        let links = queue.drain();
        info!(count = links.len(), "Resolving deferred links");
        let seqs: Vec<u64> = links.iter().map(|q| q.seq).collect();

        let (geometry, rest): (Vec<QueuedLink>, Vec<QueuedLink>) = links
            .into_iter()
            .partition(|q| matches!(q.link, PendingLink::SurfaceGeometry { .. }));
        let (solids, rest): (Vec<QueuedLink>, Vec<QueuedLink>) = rest
            .into_iter()
            .partition(|q| matches!(q.link, PendingLink::SolidGeometry { .. }));

        self.resolve_geometry_links(geometry)?;
        self.flush()?;
        for phase in [rest, solids] {
            for queued in phase {
                self.resolve_queued(queued)?;
            }
            self.flush()?;
        }
        // Drained links cannot come back, their claims are no longer needed
        self.uid_cache.release_claims(seqs);

        info!(
            resolved = self.stats.resolved,
            unresolved = self.stats.unresolved,
            copied_nodes = self.stats.copied_nodes,
            "Deferred links resolved"
        );
        Ok(self.stats)
    }

    /// Resolve geometry links so that a subtree is complete before it is
    /// copied: a link waits while its target subtree still contains the
    /// parent of another pending in-tree link. Links that only wait on each
    /// other are resolved in queue order.
    fn resolve_geometry_links(&mut self, links: Vec<QueuedLink>) -> Result<()> {
        let mut waiting: FxHashMap<i64, usize> = FxHashMap::default();
        for queued in &links {
            if let Some(parent) = tree_parent(&queued.link) {
                *waiting.entry(parent).or_insert(0) += 1;
            }
        }

        let mut pending = links;
        while !pending.is_empty() {
            let total = pending.len();
            let mut postponed = Vec::new();
            for queued in pending {
                if self.waits_on_nested(&queued.link, &waiting)? {
                    postponed.push(queued);
                    continue;
                }
                release_parent(&mut waiting, &queued.link);
                self.resolve_queued(queued)?;
            }
            if postponed.len() == total {
                warn!(count = total, "Geometry references wait on each other, resolving in queue order");
                for queued in postponed {
                    release_parent(&mut waiting, &queued.link);
                    self.resolve_queued(queued)?;
                }
                break;
            }
            pending = postponed;
        }
        Ok(())
    }

    fn waits_on_nested(&self, link: &PendingLink, waiting: &FxHashMap<i64, usize>) -> Result<bool> {
        let PendingLink::SurfaceGeometry { target, .. } = link else {
            return Ok(false);
        };
        if waiting.is_empty() {
            return Ok(false);
        }
        let Some(found) = self.find_geometry(target)? else {
            return Ok(false);
        };
        let own_parent = tree_parent(link);
        Ok(self.storage.geometry_subtree(found.id)?.iter().any(|node| {
            let count = waiting.get(&node.id).copied().unwrap_or(0);
            let own = usize::from(own_parent == Some(node.id));
            count > own
        }))
    }

    fn flush(&mut self) -> Result<()> {
        if !self.updates.is_empty() {
            self.storage.update(std::mem::take(&mut self.updates))?;
        }
        if !self.texture_params.is_empty() {
            self.storage
                .write(RowBatch::TextureParam(std::mem::take(&mut self.texture_params)))?;
        }
        if !self.group_members.is_empty() {
            self.storage
                .write(RowBatch::GroupMember(std::mem::take(&mut self.group_members)))?;
        }
        Ok(())
    }

    fn resolve_queued(&mut self, queued: QueuedLink) -> Result<()> {
        if !self.uid_cache.claim(queued.seq) {
            self.stats.already_claimed += 1;
            return Ok(());
        }
        let kind = queued.link.kind();
        if self.resolve(queued.link)? {
            self.stats.resolved += 1;
        } else {
            debug!(kind, seq = queued.seq, "Link left unresolved");
            self.stats.unresolved += 1;
        }
        Ok(())
    }

    fn resolve(&mut self, link: PendingLink) -> Result<bool> {
        match link {
            PendingLink::SurfaceGeometry {
                target,
                target_kind,
                reverse,
                slot,
            } => self.resolve_geometry_link(&target, target_kind, reverse, slot),
            PendingLink::SolidGeometry { solid_id } => self.assemble_solid(solid_id),
            PendingLink::Basic {
                table,
                owner_id,
                column,
                target,
                target_kind,
            } => {
                let id = match target_kind {
                    UidKind::Geometry | UidKind::GeometryAlias => {
                        self.find_geometry(&target)?.map(|g| g.id)
                    }
                    _ => self.find_feature(&target)?,
                };
                let Some(id) = id else {
                    return Ok(unresolvable("basic", &target));
                };
                self.updates.push(RowUpdate::new(table, owner_id, column, id));
                Ok(true)
            }
            PendingLink::GroupMember {
                group_id,
                target,
                role,
            } => {
                let Some(member) = self.find_feature(&target)? else {
                    return Ok(unresolvable("group_member", &target));
                };
                self.group_members.push(GroupMemberRow {
                    cityobject_id: member,
                    cityobjectgroup_id: group_id,
                    role,
                });
                Ok(true)
            }
            PendingLink::LibraryObject { implicit_id, uri } => self.load_library_object(implicit_id, &uri),
            PendingLink::TextureParam {
                surface_data_id,
                target,
                ring,
                is_texture,
                texture_coordinates,
            } => {
                let surface = if ring {
                    self.uid_cache.id(UidKind::Ring, &target)
                } else {
                    self.find_geometry(&target)?.map(|g| g.id)
                };
                let Some(surface) = surface else {
                    return Ok(unresolvable("texture_param", &target));
                };
                self.texture_params.push(TextureParamRow {
                    surface_geometry_id: surface,
                    surface_data_id,
                    is_texture_parametrization: is_texture,
                    texture_coordinates,
                });
                Ok(true)
            }
            PendingLink::DeprecatedMaterial { material, surface } => {
                let surface_data = match self.uid_cache.id(UidKind::SurfaceData, &material) {
                    Some(id) => Some(id),
                    None => self.storage.lookup(&material, LookupTable::SurfaceData)?,
                };
                let Some(surface_data) = surface_data else {
                    return Ok(unresolvable("deprecated_material", &material));
                };
                let surface = match surface {
                    GeometryRef::Id(id) => Some(id),
                    GeometryRef::GmlId(gml_id) => self.find_geometry(&gml_id)?.map(|g| g.id),
                };
                let Some(surface) = surface else {
                    return Ok(unresolvable("deprecated_material", &material));
                };
                self.texture_params.push(TextureParamRow {
                    surface_geometry_id: surface,
                    surface_data_id: surface_data,
                    is_texture_parametrization: false,
                    texture_coordinates: None,
                });
                Ok(true)
            }
        }
    }

    /// Resolve a geometry gml:id through the cache, then storage.
    fn find_geometry(&self, gml_id: &str) -> Result<Option<ResolvedGeometry>> {
        match self.uid_cache.resolve_geometry(gml_id) {
            GeometryLookup::Found(found) => Ok(Some(found)),
            GeometryLookup::Cycle => {
                warn!(gml_id = %gml_id, "Circular orientation alias");
                Ok(None)
            }
            GeometryLookup::Unknown { gml_id, reverse } => {
                let Some(id) = self.storage.lookup(&gml_id, LookupTable::SurfaceGeometry)? else {
                    return Ok(None);
                };
                Ok(self.storage.geometry_node(id)?.map(|node| ResolvedGeometry {
                    id,
                    root_id: node.root_id,
                    reverse: reverse ^ node.is_reverse,
                }))
            }
        }
    }

    fn find_feature(&self, gml_id: &str) -> Result<Option<i64>> {
        match self.uid_cache.id(UidKind::Feature, gml_id) {
            Some(id) => Ok(Some(id)),
            None => self.storage.lookup(gml_id, LookupTable::CityObject),
        }
    }

    fn resolve_geometry_link(
        &mut self,
        target: &str,
        target_kind: LinkTarget,
        reverse: bool,
        slot: GeometrySlot,
    ) -> Result<bool> {
        let Some(found) = self.find_geometry(target)? else {
            if let GeometrySlot::Tree { root_id, .. } = slot {
                self.incomplete_roots.insert(root_id);
            }
            return Ok(unresolvable("surface_geometry", target));
        };
        let flip = found.reverse ^ reverse;

        match slot {
            GeometrySlot::Column {
                table,
                column,
                owner_id,
            } => {
                let id = if flip {
                    // A reversed reference gets its own reversed copy
                    self.copy_subtree(found.id, None, flip)?
                } else {
                    Some(found.id)
                };
                let Some(id) = id else {
                    return Ok(unresolvable("surface_geometry", target));
                };
                if target_kind == LinkTarget::Solid {
                    debug!(href = %target, owner_id, "Solid reference resolved");
                }
                self.updates.push(RowUpdate::new(table, owner_id, column, id));
                Ok(true)
            }
            GeometrySlot::Tree { parent_id, root_id } => {
                if self.is_ancestor_or_self(found.id, parent_id)? {
                    warn!(
                        href = %target,
                        parent_id,
                        "Circular geometry reference, skipping"
                    );
                    self.incomplete_roots.insert(root_id);
                    return Ok(false);
                }
                match self.copy_subtree(found.id, Some((parent_id, root_id)), flip)? {
                    Some(_) => Ok(true),
                    None => {
                        self.incomplete_roots.insert(root_id);
                        Ok(unresolvable("surface_geometry", target))
                    }
                }
            }
        }
    }

    fn is_ancestor_or_self(&self, candidate: i64, start: i64) -> Result<bool> {
        let mut seen = FxHashSet::default();
        let mut current = Some(start);
        while let Some(id) = current {
            if id == candidate {
                return Ok(true);
            }
            if !seen.insert(id) {
                return Ok(false);
            }
            current = self.storage.geometry_node(id)?.and_then(|n| n.parent_id);
        }
        Ok(false)
    }

    /// Copy a stored subtree with fresh ids. With `placement` the copy is
    /// attached below `(parent_id, root_id)`, otherwise it becomes a root.
    fn copy_subtree(&mut self, source_id: i64, placement: Option<(i64, i64)>, flip: bool) -> Result<Option<i64>> {
        let nodes = self.storage.geometry_subtree(source_id)?;
        if nodes.is_empty() {
            return Ok(None);
        }
        let ids = IdBlock::allocate(self.storage, Sequence::SurfaceGeometry, nodes.len())?;
        let ids = ids.as_slice();
        let new_root = placement.map_or(ids[0], |(_, root)| root);

        let mut mapping: FxHashMap<i64, i64> = FxHashMap::default();
        let mut rows = Vec::with_capacity(nodes.len());
        for (node, &id) in nodes.iter().zip(ids) {
            mapping.insert(node.id, id);
            let is_copy_root = node.id == source_id;
            let parent_id = if is_copy_root {
                placement.map(|(parent, _)| parent)
            } else {
                node.parent_id.and_then(|p| mapping.get(&p).copied())
            };
            rows.push(GeometryNode {
                id,
                gml_id: node.gml_id.clone(),
                parent_id,
                root_id: new_root,
                is_solid: node.is_solid,
                is_composite: node.is_composite,
                is_triangulated: node.is_triangulated,
                is_xlink: true,
                is_reverse: node.is_reverse ^ flip,
                payload: copied_payload(node.payload.as_ref(), flip, is_copy_root && placement.is_none()),
                cityobject_id: None,
            });
        }
        self.stats.copied_nodes += rows.len();
        self.storage.write(RowBatch::Geometry(rows))?;
        Ok(Some(ids[0]))
    }

    fn assemble_solid(&mut self, solid_id: i64) -> Result<bool> {
        let Some(solid) = self.storage.geometry_node(solid_id)? else {
            return Ok(unresolvable("solid_geometry", &solid_id.to_string()));
        };
        if self.incomplete_roots.contains(&solid.root_id) {
            warn!(solid_id, "Solid exterior has unresolved members, leaving solid geometry NULL");
            return Ok(false);
        }
        let polygons: Vec<PolygonPayload> = self
            .storage
            .geometry_subtree(solid_id)?
            .into_iter()
            .skip(1)
            .filter_map(|n| match n.payload {
                Some(Payload::Explicit(p)) => Some(p),
                _ => None,
            })
            .collect();
        if polygons.is_empty() {
            return Ok(unresolvable("solid_geometry", &solid_id.to_string()));
        }
        self.updates.push(RowUpdate::new(
            SURFACE_GEOMETRY,
            solid_id,
            "solid_geometry",
            Value::Text(SolidPayload::new(polygons).to_wkt()),
        ));
        Ok(true)
    }

    fn load_library_object(&mut self, implicit_id: i64, uri: &str) -> Result<bool> {
        if uri.contains("://") {
            warn!(uri = %uri, "Remote library objects are not fetched");
            return Ok(false);
        }
        let path = match &self.library_base_dir {
            Some(base) if Path::new(uri).is_relative() => base.join(uri),
            _ => PathBuf::from(uri),
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                self.updates.push(RowUpdate::new(
                    IMPLICIT_GEOMETRY,
                    implicit_id,
                    "library_object",
                    Value::Blob(bytes),
                ));
                Ok(true)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read library object");
                Ok(false)
            }
        }
    }
}

fn tree_parent(link: &PendingLink) -> Option<i64> {
    match link {
        PendingLink::SurfaceGeometry {
            slot: GeometrySlot::Tree { parent_id, .. },
            ..
        } => Some(*parent_id),
        _ => None,
    }
}

fn release_parent(waiting: &mut FxHashMap<i64, usize>, link: &PendingLink) {
    let Some(parent) = tree_parent(link) else {
        return;
    };
    if let Some(count) = waiting.get_mut(&parent) {
        *count -= 1;
        if *count == 0 {
            waiting.remove(&parent);
        }
    }
}

fn unresolvable(kind: &str, target: &str) -> bool {
    warn!(kind, href = %target, "Unresolvable reference, leaving NULL");
    false
}

fn copied_payload(payload: Option<&Payload>, flip: bool, keep_solid: bool) -> Option<Payload> {
    match payload? {
        Payload::Explicit(p) if flip => Some(Payload::Explicit(p.reversed())),
        Payload::Implicit(p) if flip => Some(Payload::Implicit(p.reversed())),
        Payload::Solid(s) if keep_solid => Some(Payload::Solid(if flip {
            SolidPayload::new(s.polygons.iter().map(PolygonPayload::reversed).collect())
        } else {
            s.clone()
        })),
        // Solid payloads only live at insertion roots
        Payload::Solid(_) => None,
        other => Some(other.clone()),
    }
}
