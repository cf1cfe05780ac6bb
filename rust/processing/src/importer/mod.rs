// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feature importer
//!
//! One [`Importer`] is one batching context: it owns the row buffers of a
//! worker and walks features strictly sequentially. Everything shared
//! between workers lives in [`ImportServices`].
//!
//! A feature is written as a `cityobject` row, generic attributes, geometry
//! trees, implicit placements, appearances and one row of its thematic
//! table, followed by its nested child features.

mod appearance;
mod geometry;
mod implicit;

use std::sync::Arc;

use citydb_import_core::{
    strip_fragment, AttributeValue, Envelope, Feature, FeatureType, Member,
};
use citydb_import_geometry::{plan, AffineTransform, GeometryPlan, LinkTarget, PlanOptions, Point3};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{GmlIdMode, ImportConfig};
use crate::deferred::{DeferredQueue, GeometrySlot, PendingLink};
use crate::error::{Error, Result};
use crate::ids::IdBlock;
use crate::lock::ResolutionLock;
use crate::orchestrator::{Orchestrator, WriterKind};
use crate::rows::{
    CityObjectRow, FeatureRow, GenericAttributeRow, GroupMemberRow, RowBatch, TableBatch, Value,
};
use crate::stats::ImportStats;
use crate::storage::{Sequence, Storage};
use crate::uid_cache::{UidCache, UidEntry, UidKind};
use crate::writers::{self, OPENING_TO_THEM_SURFACE};

pub use geometry::Sink;

/// State shared by every worker of one import.
pub struct ImportServices {
    pub storage: Arc<dyn Storage>,
    pub uid_cache: UidCache,
    pub queue: DeferredQueue,
    pub lock: ResolutionLock,
    pub config: ImportConfig,
}

impl ImportServices {
    pub fn new(storage: Arc<dyn Storage>, config: ImportConfig) -> Self {
        Self {
            storage,
            uid_cache: UidCache::new(),
            queue: DeferredQueue::new(),
            lock: ResolutionLock::new(config.lock_timeout),
            config,
        }
    }

    /// The gml:id written for a document id.
    pub fn output_gml_id(&self, original: &str) -> String {
        match &self.config.gml_id_mode {
            GmlIdMode::Keep => original.to_string(),
            GmlIdMode::Replace { prefix } => format!("{}{}", prefix, Uuid::new_v4()),
        }
    }

    /// A gml:id for a feature the document left without one.
    pub fn generated_gml_id(&self) -> String {
        match &self.config.gml_id_mode {
            GmlIdMode::Replace { prefix } => format!("{}{}", prefix, Uuid::new_v4()),
            GmlIdMode::Keep => format!("ID_{}", Uuid::new_v4()),
        }
    }

    fn plan_options(&self) -> PlanOptions<'_> {
        PlanOptions {
            transform: self.config.transform.as_ref(),
            implicit: false,
            collect_ring_ids: self.config.import_appearance,
        }
    }
}

/// The enclosing feature of a nested feature.
#[derive(Debug, Clone, Copy)]
struct ParentRef {
    id: i64,
    feature_type: FeatureType,
    /// Topmost feature of the parent's table family
    root_id: i64,
}

/// A batching context importing features one after another.
pub struct Importer {
    services: Arc<ImportServices>,
    orchestrator: Orchestrator,
    stats: ImportStats,
}

impl Importer {
    pub fn new(services: Arc<ImportServices>) -> Self {
        let orchestrator = Orchestrator::new(Arc::clone(&services.storage), services.config.batch_size);
        Self {
            services,
            orchestrator,
            stats: ImportStats::default(),
        }
    }

    pub fn services(&self) -> &Arc<ImportServices> {
        &self.services
    }

    pub fn stats(&self) -> &ImportStats {
        &self.stats
    }

    pub fn into_stats(self) -> ImportStats {
        self.stats
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Flush `kind` and everything it depends on.
    pub fn flush(&mut self, kind: WriterKind) -> Result<()> {
        self.orchestrator.flush(kind)
    }

    /// Flush every buffered row.
    pub fn flush_all(&mut self) -> Result<()> {
        self.orchestrator.flush_all()
    }

    /// Import a top-level feature and its nested features.
    ///
    /// Returns the `cityobject` id, or `None` when no identifier could be
    /// allocated for the feature and it was skipped.
    pub fn import_feature(&mut self, feature: &Feature) -> Result<Option<i64>> {
        let id = match IdBlock::allocate(self.services.storage.as_ref(), Sequence::CityObject, 1)
            .and_then(|mut block| block.next())
        {
            Ok(id) => id,
            Err(Error::Allocation(reason)) => {
                warn!(gml_id = ?feature.id, reason = %reason, "Skipping feature without identifier");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.import_with_id(feature, id, None)?;
        Ok(Some(id))
    }

    fn import_nested(&mut self, feature: &Feature, parent: ParentRef) -> Result<i64> {
        let id = IdBlock::allocate(self.services.storage.as_ref(), Sequence::CityObject, 1)?.next()?;
        self.import_with_id(feature, id, Some(parent))?;
        Ok(id)
    }

    fn import_with_id(&mut self, feature: &Feature, id: i64, parent: Option<ParentRef>) -> Result<()> {
        let services = Arc::clone(&self.services);
        let feature_type = feature.feature_type;
        let spec = writers::table_spec(feature_type);
        let writer = writers::writer_for(feature_type);

        let gml_id = match &feature.id {
            Some(original) => {
                let gml_id = services.output_gml_id(original);
                services
                    .uid_cache
                    .put(original, UidEntry::of(UidKind::Feature, id).with_mapping(spec.table));
                gml_id
            }
            None => services.generated_gml_id(),
        };
        debug!(gml_id = %gml_id, id, feature_type = %feature_type, "Importing feature");

        // Plans are computed up front so that a missing envelope can be
        // derived from the transformed coordinates.
        let options = services.plan_options();
        let plans: Vec<Option<GeometryPlan>> = feature
            .geometries
            .iter()
            .map(|property| match &property.member {
                Member::Inline(geometry) if !geometry.is_copy => Some(plan(geometry, &options)),
                _ => None,
            })
            .collect();
        let envelope = match (&feature.envelope, services.config.transform.as_ref()) {
            (Some(envelope), Some(transform)) => Some(transform_envelope(envelope, transform)),
            (Some(envelope), None) => Some(*envelope),
            (None, _) => plans
                .iter()
                .flatten()
                .fold(None, |acc, plan| Envelope::merge(acc, plan.envelope())),
        };

        self.orchestrator.push(
            WriterKind::CityObject,
            RowBatch::CityObject(vec![CityObjectRow {
                id,
                objectclass_id: feature_type.objectclass_id(),
                gml_id,
                name: feature.name.clone(),
                description: feature.description.clone(),
                envelope,
            }]),
        )?;

        self.import_generic_attributes(feature, id)?;

        let mut row = FeatureRow::new(id);
        row.set("objectclass_id", i64::from(feature_type.objectclass_id()));

        for (property, plan) in feature.geometries.iter().zip(plans) {
            let Some(column) = spec.geometry_column(&property.name) else {
                warn!(
                    property = %property.name,
                    feature_type = %feature_type,
                    "Geometry property not stored by this feature type"
                );
                self.stats.skipped_geometries += 1;
                continue;
            };
            let target_kind = if column.solid {
                LinkTarget::Solid
            } else {
                LinkTarget::Surface
            };
            let slot = GeometrySlot::Column {
                table: spec.table,
                column: column.column,
                owner_id: id,
            };
            let geometry_id = match (plan, &property.member) {
                (Some(plan), _) => self.insert_plan(plan, Some(id), Some(&slot), Sink::Buffered)?,
                (None, Member::Href(href)) => {
                    self.reference_geometry(strip_fragment(href), false, target_kind, slot)?
                }
                (None, Member::Inline(copy)) => match copy.id.as_deref() {
                    Some(target) => self.reference_geometry(target, false, target_kind, slot)?,
                    None => {
                        warn!(property = %property.name, "Geometry copy without gml:id, skipping");
                        self.stats.skipped_geometries += 1;
                        None
                    }
                },
            };
            if let Some(geometry_id) = geometry_id {
                row.set(column.column, geometry_id);
            }
        }

        for representation in &feature.implicit {
            let Some(columns) = spec.implicit_columns(&representation.name) else {
                warn!(
                    property = %representation.name,
                    feature_type = %feature_type,
                    "Implicit representation not stored by this feature type"
                );
                continue;
            };
            let implicit = &representation.geometry;
            let Some(rep_id) = self.import_implicit(implicit)? else {
                continue;
            };
            row.set(columns.rep_column, rep_id);

            let matrix = match implicit.matrix() {
                Ok(matrix) => matrix,
                Err(e) => {
                    warn!(error = %e, property = %representation.name, "Ignoring invalid transformation matrix");
                    None
                }
            };
            let (matrix, reference_point) = match services.config.transform.as_ref() {
                Some(transform) => transform.fold_into_placement(matrix.as_ref(), implicit.reference_point),
                None => (matrix, implicit.reference_point),
            };
            if let Some(point) = reference_point {
                row.set(columns.ref_point_column, Value::Point(point));
            }
            if let Some(matrix) = matrix {
                row.set(columns.matrix_column, Value::Text(format_matrix(&matrix)));
            }
        }

        let family_root = match parent {
            Some(p) if writers::table_spec(p.feature_type).table == spec.table => p.root_id,
            _ => id,
        };
        if let Some(parent) = parent {
            if let Some(column) = spec.parent_column(parent.feature_type) {
                row.set(column, parent.id);
            }
        }
        if let Some(column) = spec.root_column {
            row.set(column, family_root);
        }

        writer.map_attributes(feature, &mut row);

        for link in &feature.links {
            let target = link.target();
            if spec.member_role == Some(link.role.as_str()) {
                match services.uid_cache.id(UidKind::Feature, target) {
                    Some(member) => {
                        self.stats.links_resolved_locally += 1;
                        self.orchestrator.push(
                            WriterKind::GroupMember,
                            RowBatch::GroupMember(vec![GroupMemberRow {
                                cityobject_id: member,
                                cityobjectgroup_id: id,
                                role: None,
                            }]),
                        )?;
                    }
                    None => self.propagate(PendingLink::GroupMember {
                        group_id: id,
                        target: target.to_string(),
                        role: None,
                    }),
                }
            } else if let Some(column) = spec.link_column(&link.role) {
                match services.uid_cache.id(UidKind::Feature, target) {
                    Some(target_id) => {
                        self.stats.links_resolved_locally += 1;
                        row.set(column, target_id);
                    }
                    None => self.propagate(PendingLink::Basic {
                        table: spec.table,
                        owner_id: id,
                        column,
                        target: target.to_string(),
                        target_kind: UidKind::Feature,
                    }),
                }
            } else {
                warn!(role = %link.role, feature_type = %feature_type, "Unsupported feature reference");
            }
        }

        if services.config.import_appearance {
            self.import_appearances(&feature.appearances, id)?;
        }

        self.orchestrator.push(
            spec.kind,
            RowBatch::Feature(TableBatch {
                table: spec.table,
                rows: vec![row],
            }),
        )?;

        if let Some(parent) = parent {
            if feature_type.is_opening() && parent.feature_type.is_boundary_surface() {
                let mut link = FeatureRow::new(id);
                link.set("opening_id", id);
                link.set("thematic_surface_id", parent.id);
                self.orchestrator.push(
                    WriterKind::OpeningToThemSurface,
                    RowBatch::Feature(TableBatch {
                        table: OPENING_TO_THEM_SURFACE,
                        rows: vec![link],
                    }),
                )?;
            }
        }
        self.stats.count_feature(feature_type.as_str());

        let this = ParentRef {
            id,
            feature_type,
            root_id: family_root,
        };
        for child in &feature.children {
            self.import_nested(child, this)?;
        }
        Ok(())
    }

    fn import_generic_attributes(&mut self, feature: &Feature, cityobject_id: i64) -> Result<()> {
        if feature.generic_attributes.is_empty() {
            return Ok(());
        }
        let mut ids = IdBlock::allocate(
            self.services.storage.as_ref(),
            Sequence::GenericAttribute,
            feature.generic_attributes.len(),
        )?;
        let mut rows = Vec::with_capacity(feature.generic_attributes.len());
        for (name, value) in &feature.generic_attributes {
            let unit = match value {
                AttributeValue::Measure { uom, .. } => Some(uom.clone()),
                _ => None,
            };
            rows.push(GenericAttributeRow {
                id: ids.next()?,
                cityobject_id,
                name: name.clone(),
                value: Value::from(value),
                unit,
            });
        }
        self.orchestrator
            .push(WriterKind::GenericAttribute, RowBatch::GenericAttribute(rows))
    }

    fn propagate(&mut self, link: PendingLink) {
        self.stats.links_queued += 1;
        self.services.queue.propagate(link);
    }
}

/// Envelope of the transformed corners of `envelope`.
fn transform_envelope(envelope: &Envelope, transform: &AffineTransform) -> Envelope {
    let [lx, ly, lz] = envelope.lower;
    let [ux, uy, uz] = envelope.upper;
    let mut out: Option<Envelope> = None;
    for x in [lx, ux] {
        for y in [ly, uy] {
            for z in [lz, uz] {
                let p = transform.apply(&Point3::new(x, y, z));
                let p = [p.x, p.y, p.z];
                match out.as_mut() {
                    Some(e) => e.expand_point(p),
                    None => out = Some(Envelope::from_point(p)),
                }
            }
        }
    }
    out.unwrap_or(*envelope)
}

/// Row-major matrix as 16 space-separated numbers.
fn format_matrix(matrix: &[f64; 16]) -> String {
    matrix
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
