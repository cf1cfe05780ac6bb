// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implicit geometry
//!
//! A prototype shared by many features is written once. Library objects
//! are keyed by URI, relative geometries by the gml:id of their root. The
//! check-then-create of a keyed prototype runs under the resolution lock of
//! its key, and the created rows go straight to storage so that every
//! other worker observes them.

use std::sync::Arc;

use citydb_import_core::{strip_fragment, Geometry, ImplicitGeometry, Member};
use citydb_import_geometry::{plan, GeometryPlan, PlanOptions};
use tracing::{debug, warn};

use super::{Importer, Sink};
use crate::deferred::{GeometrySlot, PendingLink};
use crate::error::Result;
use crate::ids::IdBlock;
use crate::orchestrator::WriterKind;
use crate::rows::{ImplicitGeometryRow, RowBatch, RowUpdate, IMPLICIT_GEOMETRY};
use crate::storage::{LookupTable, Sequence};
use crate::uid_cache::{GeometryLookup, UidEntry, UidKind};

const RELATIVE_BREP_COLUMN: &str = "relative_brep_id";

enum Shared {
    Reused(i64),
    Created(i64),
    /// A record created by an earlier reference got its prototype tree
    Completed(i64),
    Skipped,
}

impl Importer {
    /// Find or create the implicit geometry record of a placement.
    pub(crate) fn import_implicit(&mut self, implicit: &ImplicitGeometry) -> Result<Option<i64>> {
        let mime_type = implicit.mime_type.clone();

        if let Some(uri) = implicit.library_object.as_deref() {
            return self.shared_implicit(uri, |this| this.create_library_object(uri, mime_type).map(Some));
        }

        match &implicit.relative_geometry {
            Some(Member::Inline(geometry)) if !geometry.is_copy => match geometry.id.as_deref() {
                Some(key) => self.shared_prototype(geometry, key, mime_type),
                // Without an id nothing else can refer to it
                None => self.create_prototype(geometry, None, mime_type, Sink::Buffered),
            },
            Some(Member::Inline(copy)) => match copy.id.as_deref() {
                Some(key) => self.shared_implicit(key, |this| this.create_reference(key, mime_type).map(Some)),
                None => {
                    warn!("Relative geometry copy without gml:id, skipping implicit representation");
                    Ok(None)
                }
            },
            Some(Member::Href(href)) => {
                let key = strip_fragment(href);
                self.shared_implicit(key, |this| this.create_reference(key, mime_type).map(Some))
            }
            None => {
                warn!("Implicit geometry without library object or relative geometry");
                Ok(None)
            }
        }
    }

    /// Check-then-create under the lock of `key`.
    fn shared_implicit(
        &mut self,
        key: &str,
        create: impl FnOnce(&mut Self) -> Result<Option<i64>>,
    ) -> Result<Option<i64>> {
        let services = Arc::clone(&self.services);
        let outcome = services.lock.with_lock(key, || {
            if let Some(id) = services.uid_cache.id(UidKind::Implicit, key) {
                return Ok(Shared::Reused(id));
            }
            if let Some(id) = services.storage.implicit_by_reference(key)? {
                services.uid_cache.put(key, UidEntry::of(UidKind::Implicit, id));
                return Ok(Shared::Reused(id));
            }
            match create(self)? {
                Some(id) => {
                    services.uid_cache.put(key, UidEntry::of(UidKind::Implicit, id));
                    Ok(Shared::Created(id))
                }
                None => Ok(Shared::Skipped),
            }
        })?;
        Ok(self.record_outcome(key, outcome))
    }

    /// Check-then-create for an inline prototype definition.
    ///
    /// A record may already exist because a reference to the prototype was
    /// imported first. Its tree is then inserted now and attached to that
    /// record.
    fn shared_prototype(&mut self, geometry: &Geometry, key: &str, mime_type: Option<String>) -> Result<Option<i64>> {
        let services = Arc::clone(&self.services);
        let outcome = services.lock.with_lock(key, || {
            let existing = match services.uid_cache.id(UidKind::Implicit, key) {
                Some(id) => Some(id),
                None => services.storage.implicit_by_reference(key)?,
            };
            let Some(id) = existing else {
                return match self.create_prototype(geometry, Some(key), mime_type, Sink::Direct)? {
                    Some(id) => {
                        services.uid_cache.put(key, UidEntry::of(UidKind::Implicit, id));
                        Ok(Shared::Created(id))
                    }
                    None => Ok(Shared::Skipped),
                };
            };
            services.uid_cache.put(key, UidEntry::of(UidKind::Implicit, id));
            if self.prototype_tree(key)?.is_some() {
                return Ok(Shared::Reused(id));
            }
            self.attach_prototype(id, geometry, key)?;
            Ok(Shared::Completed(id))
        })?;
        Ok(self.record_outcome(key, outcome))
    }

    fn record_outcome(&mut self, key: &str, outcome: Shared) -> Option<i64> {
        match outcome {
            Shared::Reused(id) => {
                debug!(key = %key, id, "Reusing implicit geometry");
                self.stats.implicit_reused += 1;
                Some(id)
            }
            Shared::Created(id) => {
                debug!(key = %key, id, "Created implicit geometry");
                Some(id)
            }
            Shared::Completed(id) => {
                debug!(key = %key, id, "Attached prototype tree to referenced implicit geometry");
                self.stats.implicit_reused += 1;
                Some(id)
            }
            Shared::Skipped => None,
        }
    }

    /// Root id of the stored prototype tree with gml:id `key`.
    fn prototype_tree(&self, key: &str) -> Result<Option<i64>> {
        match self.services.uid_cache.resolve_geometry(key) {
            GeometryLookup::Found(found) => Ok(Some(found.id)),
            _ => self.services.storage.lookup(key, LookupTable::SurfaceGeometry),
        }
    }

    fn allocate_implicit_id(&self) -> Result<i64> {
        IdBlock::allocate(self.services.storage.as_ref(), Sequence::ImplicitGeometry, 1)?.next()
    }

    fn create_library_object(&mut self, uri: &str, mime_type: Option<String>) -> Result<i64> {
        let id = self.allocate_implicit_id()?;
        self.services.storage.write(RowBatch::Implicit(vec![ImplicitGeometryRow {
            id,
            mime_type,
            reference_to_library: Some(uri.to_string()),
            ..Default::default()
        }]))?;
        self.stats.implicit_created += 1;
        self.propagate(PendingLink::LibraryObject {
            implicit_id: id,
            uri: uri.to_string(),
        });
        Ok(id)
    }

    /// Plan a prototype tree. Coordinates stay in the prototype's own frame;
    /// the transformation is folded into each placement instead.
    fn plan_prototype(&mut self, geometry: &Geometry, key: Option<&str>) -> Option<GeometryPlan> {
        let options = PlanOptions {
            transform: None,
            implicit: true,
            collect_ring_ids: self.services.config.import_appearance,
        };
        let plan = plan(geometry, &options);
        if plan.is_empty() && plan.links.is_empty() {
            for diagnostic in &plan.diagnostics {
                warn!(gml_id = ?diagnostic.gml_id, error = %diagnostic.error, "Skipping geometry");
            }
            self.stats.skipped_geometries += plan.diagnostics.len();
            warn!(key = ?key, "Relative geometry has nothing to store");
            return None;
        }
        Some(plan)
    }

    fn prototype_slot(owner_id: i64) -> GeometrySlot {
        GeometrySlot::Column {
            table: IMPLICIT_GEOMETRY,
            column: RELATIVE_BREP_COLUMN,
            owner_id,
        }
    }

    /// Write a relative geometry tree and the record pointing at it.
    fn create_prototype(
        &mut self,
        geometry: &Geometry,
        key: Option<&str>,
        mime_type: Option<String>,
        sink: Sink,
    ) -> Result<Option<i64>> {
        let Some(plan) = self.plan_prototype(geometry, key) else {
            return Ok(None);
        };
        let id = self.allocate_implicit_id()?;
        let brep = self.insert_plan(plan, None, Some(&Self::prototype_slot(id)), sink)?;
        let row = ImplicitGeometryRow {
            id,
            mime_type,
            relative_brep_id: brep,
            relative_gml_id: key.map(str::to_string),
            ..Default::default()
        };
        match sink {
            Sink::Direct => self.services.storage.write(RowBatch::Implicit(vec![row]))?,
            Sink::Buffered => self
                .orchestrator
                .push(WriterKind::ImplicitGeometry, RowBatch::Implicit(vec![row]))?,
        }
        self.stats.implicit_created += 1;
        Ok(Some(id))
    }

    /// Insert the tree of a prototype whose record already exists and point
    /// the record at it.
    fn attach_prototype(&mut self, id: i64, geometry: &Geometry, key: &str) -> Result<()> {
        let Some(plan) = self.plan_prototype(geometry, Some(key)) else {
            return Ok(());
        };
        let brep = self.insert_plan(plan, None, Some(&Self::prototype_slot(id)), Sink::Direct)?;
        if let Some(brep) = brep {
            self.services.storage.update(vec![RowUpdate::new(
                IMPLICIT_GEOMETRY,
                id,
                RELATIVE_BREP_COLUMN,
                brep,
            )])?;
        }
        Ok(())
    }

    /// A record for a relative geometry defined elsewhere.
    fn create_reference(&mut self, target: &str, mime_type: Option<String>) -> Result<i64> {
        let brep = match self.services.uid_cache.resolve_geometry(target) {
            GeometryLookup::Found(found) => Some(found.id),
            _ => None,
        };
        let id = self.allocate_implicit_id()?;
        self.services.storage.write(RowBatch::Implicit(vec![ImplicitGeometryRow {
            id,
            mime_type,
            relative_brep_id: brep,
            relative_gml_id: Some(target.to_string()),
            ..Default::default()
        }]))?;
        match brep {
            Some(_) => self.stats.links_resolved_locally += 1,
            None => self.propagate(PendingLink::Basic {
                table: IMPLICIT_GEOMETRY,
                owner_id: id,
                column: RELATIVE_BREP_COLUMN,
                target: target.to_string(),
                target_kind: UidKind::Geometry,
            }),
        }
        self.stats.implicit_created += 1;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::importer::ImportServices;
    use crate::storage::MemoryStorage;
    use citydb_import_geometry::Payload;

    fn services() -> (Arc<MemoryStorage>, Arc<ImportServices>) {
        let storage = Arc::new(MemoryStorage::new());
        let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
        (storage, services)
    }

    fn prototype(id: &str) -> Geometry {
        Geometry::multi_surface(vec![Member::inline(Geometry::polygon(vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ]))])
        .with_id(id)
    }

    #[test]
    fn test_library_object_shared_across_workers() {
        let (storage, services) = services();
        let ids: Vec<Option<i64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let services = Arc::clone(&services);
                    s.spawn(move || {
                        let mut importer = Importer::new(services);
                        importer
                            .import_implicit(&ImplicitGeometry::library("models/tree.3ds"))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids[0].is_some());
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(storage.implicit_rows().len(), 1);
        assert_eq!(services.queue.len(), 1);
    }

    #[test]
    fn test_relative_prototype_written_once() {
        let (storage, services) = services();
        let mut importer = Importer::new(services);
        let inline = ImplicitGeometry::relative(Member::inline(prototype("proto")));
        let first = importer.import_implicit(&inline).unwrap().unwrap();
        let second = importer
            .import_implicit(&ImplicitGeometry::relative(Member::href("#proto")))
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(importer.stats().implicit_created, 1);
        assert_eq!(importer.stats().implicit_reused, 1);

        // Prototype rows are already in storage, without an owner
        let rows = storage.geometry_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.cityobject_id.is_none()));
        assert!(matches!(rows[1].payload, Some(Payload::Implicit(_))));
        let implicit = storage.implicit_rows();
        assert_eq!(implicit[0].relative_brep_id, Some(rows[0].id));
    }

    #[test]
    fn test_prototype_defined_after_reference() {
        let (storage, services) = services();
        let mut importer = Importer::new(Arc::clone(&services));
        let first = importer
            .import_implicit(&ImplicitGeometry::relative(Member::href("#proto")))
            .unwrap()
            .unwrap();
        assert_eq!(storage.implicit_rows()[0].relative_brep_id, None);

        let second = importer
            .import_implicit(&ImplicitGeometry::relative(Member::inline(prototype("proto"))))
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(importer.stats().implicit_created, 1);

        let rows = storage.geometry_rows();
        assert_eq!(rows.len(), 2);
        let implicit = storage.implicit_rows();
        assert_eq!(implicit.len(), 1);
        assert_eq!(implicit[0].relative_brep_id, Some(rows[0].id));

        // The link queued by the reference now resolves to the same tree
        let stats = crate::deferred::XlinkResolver::new(storage.as_ref(), &services.uid_cache)
            .run(&services.queue)
            .unwrap();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unresolved, 0);
        assert_eq!(storage.implicit_rows()[0].relative_brep_id, Some(rows[0].id));
    }

    #[test]
    fn test_reference_to_unknown_prototype_is_deferred() {
        let (storage, services) = services();
        let mut importer = Importer::new(Arc::clone(&services));
        let id = importer
            .import_implicit(&ImplicitGeometry::relative(Member::href("#later")))
            .unwrap()
            .unwrap();
        let row = &storage.implicit_rows()[0];
        assert_eq!(row.id, id);
        assert_eq!(row.relative_brep_id, None);
        let queued = services.queue.drain();
        assert_eq!(queued.len(), 1);
        assert!(matches!(
            &queued[0].link,
            PendingLink::Basic { column: RELATIVE_BREP_COLUMN, owner_id, .. } if *owner_id == id
        ));
    }

    #[test]
    fn test_anonymous_prototype_is_buffered() {
        let (storage, services) = services();
        let mut importer = Importer::new(services);
        let mut geometry = prototype("x");
        geometry.id = None;
        let id = importer
            .import_implicit(&ImplicitGeometry::relative(Member::inline(geometry)))
            .unwrap();
        assert!(id.is_some());
        assert!(storage.implicit_rows().is_empty());
        importer.flush_all().unwrap();
        assert_eq!(storage.implicit_rows().len(), 1);
    }
}
