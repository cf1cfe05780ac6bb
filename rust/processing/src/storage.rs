// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage seam
//!
//! [`Storage`] is the only boundary between the importer and the database.
//! Every method is one round trip. [`MemoryStorage`] keeps all tables in
//! memory and is used by the CLI and the tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use citydb_import_geometry::{Payload, SolidPayload};

use crate::error::{Error, Result};
use crate::rows::{
    AppearanceRow, CityObjectRow, FeatureRow, GenericAttributeRow, GeometryNode,
    GroupMemberRow, ImplicitGeometryRow, RowBatch, RowUpdate, SurfaceDataRow, TextureParamRow,
    Value, APPEARANCE, CITYOBJECT, GENERIC_ATTRIBUTE, GROUP_MEMBER, IMPLICIT_GEOMETRY,
    SURFACE_DATA, SURFACE_GEOMETRY, TEXTURE_PARAM,
};

/// Identifier sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sequence {
    CityObject,
    SurfaceGeometry,
    ImplicitGeometry,
    Appearance,
    SurfaceData,
    GenericAttribute,
}

/// Tables that can be searched by gml:id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupTable {
    SurfaceGeometry,
    CityObject,
    SurfaceData,
}

/// Database access used by the importer and the link resolver.
pub trait Storage: Send + Sync {
    /// Fetch `count` fresh identifiers of `sequence` in one round trip.
    fn next_ids(&self, sequence: Sequence, count: usize) -> Result<Vec<i64>>;

    /// Insert a batch of rows.
    fn write(&self, batch: RowBatch) -> Result<()>;

    /// Patch columns of rows written earlier.
    fn update(&self, updates: Vec<RowUpdate>) -> Result<()>;

    /// Find the id of a row by its stored gml:id.
    fn lookup(&self, gml_id: &str, table: LookupTable) -> Result<Option<i64>>;

    fn geometry_node(&self, id: i64) -> Result<Option<GeometryNode>>;

    /// A geometry node followed by all of its descendants, parents before
    /// children.
    fn geometry_subtree(&self, id: i64) -> Result<Vec<GeometryNode>>;

    /// Find a shared implicit geometry by library URI or relative gml:id.
    fn implicit_by_reference(&self, key: &str) -> Result<Option<i64>>;
}

#[derive(Default)]
struct Tables {
    sequences: FxHashMap<Sequence, i64>,
    geometry: BTreeMap<i64, GeometryNode>,
    children: FxHashMap<i64, Vec<i64>>,
    city_objects: BTreeMap<i64, CityObjectRow>,
    implicit: BTreeMap<i64, ImplicitGeometryRow>,
    generic_attributes: Vec<GenericAttributeRow>,
    appearances: Vec<AppearanceRow>,
    surface_data: Vec<SurfaceDataRow>,
    texture_params: Vec<TextureParamRow>,
    group_members: Vec<GroupMemberRow>,
    features: FxHashMap<&'static str, BTreeMap<i64, FeatureRow>>,
    by_gml_id: FxHashMap<(LookupTable, String), i64>,
    implicit_by_key: FxHashMap<String, i64>,
}

/// In-memory storage adapter.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    round_trips: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls made so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::Relaxed)
    }

    pub fn geometry_rows(&self) -> Vec<GeometryNode> {
        self.tables.read().geometry.values().cloned().collect()
    }

    pub fn city_objects(&self) -> Vec<CityObjectRow> {
        self.tables.read().city_objects.values().cloned().collect()
    }

    pub fn implicit_rows(&self) -> Vec<ImplicitGeometryRow> {
        self.tables.read().implicit.values().cloned().collect()
    }

    pub fn generic_attributes(&self) -> Vec<GenericAttributeRow> {
        self.tables.read().generic_attributes.clone()
    }

    pub fn appearances(&self) -> Vec<AppearanceRow> {
        self.tables.read().appearances.clone()
    }

    pub fn surface_data(&self) -> Vec<SurfaceDataRow> {
        self.tables.read().surface_data.clone()
    }

    pub fn texture_params(&self) -> Vec<TextureParamRow> {
        self.tables.read().texture_params.clone()
    }

    pub fn group_members(&self) -> Vec<GroupMemberRow> {
        self.tables.read().group_members.clone()
    }

    pub fn feature_rows(&self, table: &str) -> Vec<FeatureRow> {
        self.tables
            .read()
            .features
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Row counts per table.
    pub fn table_sizes(&self) -> BTreeMap<String, usize> {
        let t = self.tables.read();
        let mut sizes = BTreeMap::new();
        sizes.insert(SURFACE_GEOMETRY.to_string(), t.geometry.len());
        sizes.insert(CITYOBJECT.to_string(), t.city_objects.len());
        sizes.insert(IMPLICIT_GEOMETRY.to_string(), t.implicit.len());
        sizes.insert(GENERIC_ATTRIBUTE.to_string(), t.generic_attributes.len());
        sizes.insert(APPEARANCE.to_string(), t.appearances.len());
        sizes.insert(SURFACE_DATA.to_string(), t.surface_data.len());
        sizes.insert(TEXTURE_PARAM.to_string(), t.texture_params.len());
        sizes.insert(GROUP_MEMBER.to_string(), t.group_members.len());
        for (table, rows) in &t.features {
            sizes.insert(table.to_string(), rows.len());
        }
        sizes
    }

    fn trip(&self) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
    }
}

impl Tables {
    /// Check the keys of a whole geometry batch. Parents may be rows of the
    /// same batch that come earlier.
    fn check_geometry(&self, rows: &[GeometryNode]) -> Result<()> {
        let mut batch: FxHashSet<i64> = FxHashSet::default();
        for node in rows {
            if self.geometry.contains_key(&node.id) || !batch.insert(node.id) {
                return Err(Error::storage(format!("duplicate surface_geometry id {}", node.id)));
            }
            if let Some(parent) = node.parent_id {
                if parent == node.id
                    || !(self.geometry.contains_key(&parent) || batch.contains(&parent))
                {
                    return Err(Error::storage(format!(
                        "surface_geometry {} references missing parent {}",
                        node.id, parent
                    )));
                }
            }
            if let Some(co) = node.cityobject_id {
                if !self.city_objects.contains_key(&co) {
                    return Err(Error::storage(format!(
                        "surface_geometry {} references missing cityobject {}",
                        node.id, co
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert_geometry(&mut self, rows: Vec<GeometryNode>) -> Result<()> {
        self.check_geometry(&rows)?;
        for node in rows {
            if let Some(parent) = node.parent_id {
                self.children.entry(parent).or_default().push(node.id);
            }
            if let Some(gml_id) = &node.gml_id {
                self.by_gml_id
                    .entry((LookupTable::SurfaceGeometry, gml_id.clone()))
                    .or_insert(node.id);
            }
            self.geometry.insert(node.id, node);
        }
        Ok(())
    }

    fn apply(&mut self, update: RowUpdate) -> Result<()> {
        let missing = || Error::storage(format!("{} {} does not exist", update.table, update.id));
        match update.table {
            SURFACE_GEOMETRY => {
                let node = self.geometry.get_mut(&update.id).ok_or_else(missing)?;
                match (update.column, update.value) {
                    ("solid_geometry", Value::Text(wkt)) => {
                        node.payload = Some(Payload::Solid(SolidPayload::from_wkt(&wkt)?));
                    }
                    ("solid_geometry", Value::Null) => node.payload = None,
                    (column, _) => {
                        return Err(Error::storage(format!(
                            "surface_geometry.{} cannot be updated",
                            column
                        )))
                    }
                }
            }
            IMPLICIT_GEOMETRY => {
                let row = self.implicit.get_mut(&update.id).ok_or_else(missing)?;
                match (update.column, update.value) {
                    ("library_object", Value::Blob(bytes)) => row.library_object = Some(bytes),
                    ("relative_brep_id", value) => row.relative_brep_id = value.as_id(),
                    (column, _) => {
                        return Err(Error::storage(format!(
                            "implicit_geometry.{} cannot be updated",
                            column
                        )))
                    }
                }
            }
            table => {
                let row = self
                    .features
                    .get_mut(table)
                    .and_then(|rows| rows.get_mut(&update.id))
                    .ok_or_else(missing)?;
                row.set(update.column, update.value);
            }
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn next_ids(&self, sequence: Sequence, count: usize) -> Result<Vec<i64>> {
        self.trip();
        let mut tables = self.tables.write();
        let last = tables.sequences.entry(sequence).or_insert(0);
        let first = *last + 1;
        *last += count as i64;
        debug!(sequence = ?sequence, count, "Allocated identifiers");
        Ok((first..=*last).collect())
    }

    fn write(&self, batch: RowBatch) -> Result<()> {
        self.trip();
        let mut t = self.tables.write();
        match batch {
            RowBatch::Geometry(rows) => t.insert_geometry(rows)?,
            RowBatch::CityObject(rows) => {
                for row in rows {
                    t.by_gml_id
                        .entry((LookupTable::CityObject, row.gml_id.clone()))
                        .or_insert(row.id);
                    t.city_objects.insert(row.id, row);
                }
            }
            RowBatch::Implicit(rows) => {
                for row in rows {
                    if let Some(key) = row.reference_key() {
                        t.implicit_by_key.entry(key.to_string()).or_insert(row.id);
                    }
                    t.implicit.insert(row.id, row);
                }
            }
            RowBatch::GenericAttribute(rows) => t.generic_attributes.extend(rows),
            RowBatch::Appearance(rows) => t.appearances.extend(rows),
            RowBatch::SurfaceData(rows) => {
                for row in rows {
                    if let Some(gml_id) = &row.gml_id {
                        t.by_gml_id
                            .entry((LookupTable::SurfaceData, gml_id.clone()))
                            .or_insert(row.id);
                    }
                    t.surface_data.push(row);
                }
            }
            RowBatch::TextureParam(rows) => t.texture_params.extend(rows),
            RowBatch::GroupMember(rows) => t.group_members.extend(rows),
            RowBatch::Feature(batch) => {
                if let Some(row) = batch.rows.iter().find(|r| !t.city_objects.contains_key(&r.id)) {
                    return Err(Error::storage(format!(
                        "{} {} has no cityobject row",
                        batch.table, row.id
                    )));
                }
                let table = t.features.entry(batch.table).or_default();
                for row in batch.rows {
                    table.insert(row.id, row);
                }
            }
        }
        Ok(())
    }

    fn update(&self, updates: Vec<RowUpdate>) -> Result<()> {
        self.trip();
        let mut t = self.tables.write();
        for update in updates {
            t.apply(update)?;
        }
        Ok(())
    }

    fn lookup(&self, gml_id: &str, table: LookupTable) -> Result<Option<i64>> {
        self.trip();
        Ok(self
            .tables
            .read()
            .by_gml_id
            .get(&(table, gml_id.to_string()))
            .copied())
    }

    fn geometry_node(&self, id: i64) -> Result<Option<GeometryNode>> {
        self.trip();
        Ok(self.tables.read().geometry.get(&id).cloned())
    }

    fn geometry_subtree(&self, id: i64) -> Result<Vec<GeometryNode>> {
        self.trip();
        let t = self.tables.read();
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = t.geometry.get(&next) {
                out.push(node.clone());
                if let Some(children) = t.children.get(&next) {
                    // Reverse so children come out in insertion order
                    stack.extend(children.iter().rev());
                }
            }
        }
        Ok(out)
    }

    fn implicit_by_reference(&self, key: &str) -> Result<Option<i64>> {
        self.trip();
        Ok(self.tables.read().implicit_by_key.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent: Option<i64>, root: i64) -> GeometryNode {
        GeometryNode {
            id,
            gml_id: Some(format!("g{}", id)),
            parent_id: parent,
            root_id: root,
            is_solid: false,
            is_composite: false,
            is_triangulated: false,
            is_xlink: false,
            is_reverse: false,
            payload: None,
            cityobject_id: None,
        }
    }

    #[test]
    fn test_sequences_are_independent() {
        let s = MemoryStorage::new();
        assert_eq!(s.next_ids(Sequence::SurfaceGeometry, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(s.next_ids(Sequence::SurfaceGeometry, 2).unwrap(), vec![4, 5]);
        assert_eq!(s.next_ids(Sequence::CityObject, 1).unwrap(), vec![1]);
        assert!(s.next_ids(Sequence::CityObject, 0).unwrap().is_empty());
        assert_eq!(s.round_trips(), 4);
    }

    #[test]
    fn test_subtree_order_and_lookup() {
        let s = MemoryStorage::new();
        s.write(RowBatch::Geometry(vec![
            node(1, None, 1),
            node(2, Some(1), 1),
            node(3, Some(2), 1),
            node(4, Some(1), 1),
        ]))
        .unwrap();
        let ids: Vec<i64> = s.geometry_subtree(1).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        let ids: Vec<i64> = s.geometry_subtree(2).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(s.lookup("g3", LookupTable::SurfaceGeometry).unwrap(), Some(3));
        assert_eq!(s.lookup("g3", LookupTable::CityObject).unwrap(), None);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let s = MemoryStorage::new();
        assert!(s.write(RowBatch::Geometry(vec![node(2, Some(1), 1)])).is_err());
        let mut orphan = node(1, None, 1);
        orphan.cityobject_id = Some(7);
        assert!(s.write(RowBatch::Geometry(vec![orphan])).is_err());
    }

    #[test]
    fn test_failed_batch_leaves_no_rows() {
        let s = MemoryStorage::new();
        let batch = vec![node(1, None, 1), node(2, Some(1), 1), node(3, Some(99), 1)];
        assert!(s.write(RowBatch::Geometry(batch)).is_err());
        assert!(s.geometry_rows().is_empty());
        assert_eq!(s.lookup("g1", LookupTable::SurfaceGeometry).unwrap(), None);

        let duplicate = vec![node(1, None, 1), node(1, None, 1)];
        assert!(s.write(RowBatch::Geometry(duplicate)).is_err());
        assert!(s.geometry_rows().is_empty());
    }

    #[test]
    fn test_update_feature_column() {
        let s = MemoryStorage::new();
        s.write(RowBatch::CityObject(vec![CityObjectRow {
            id: 10,
            objectclass_id: 26,
            gml_id: "b1".into(),
            name: None,
            description: None,
            envelope: None,
        }]))
        .unwrap();
        s.write(RowBatch::Feature(crate::rows::TableBatch {
            table: "building",
            rows: vec![FeatureRow::new(10)],
        }))
        .unwrap();
        s.update(vec![RowUpdate::new("building", 10, "lod2_solid_id", 42)])
            .unwrap();
        let row = &s.feature_rows("building")[0];
        assert_eq!(row.get("lod2_solid_id"), Some(&Value::Int(42)));
        assert!(s
            .update(vec![RowUpdate::new("building", 11, "lod2_solid_id", 1)])
            .is_err());
    }
}
