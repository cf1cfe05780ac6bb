// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed rows
//!
//! Every table the importer writes has a row struct that is filled field by
//! field and handed to storage as a whole. Thematic feature tables share the
//! column-map [`FeatureRow`].

use std::collections::BTreeMap;

use citydb_import_core::{AttributeValue, Envelope};
use citydb_import_geometry::{NodeFlags, Payload};

use crate::error::{Error, Result};

pub const SURFACE_GEOMETRY: &str = "surface_geometry";
pub const CITYOBJECT: &str = "cityobject";
pub const IMPLICIT_GEOMETRY: &str = "implicit_geometry";
pub const GENERIC_ATTRIBUTE: &str = "cityobject_genericattrib";
pub const APPEARANCE: &str = "appearance";
pub const SURFACE_DATA: &str = "surface_data";
pub const TEXTURE_PARAM: &str = "textureparam";
pub const GROUP_MEMBER: &str = "group_to_cityobject";

/// A column value of a thematic or link-patched row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Point([f64; 3]),
}

impl Value {
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        v.map_or(Self::Null, Self::Int)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&AttributeValue> for Value {
    fn from(v: &AttributeValue) -> Self {
        match v {
            AttributeValue::Bool(b) => Self::Bool(*b),
            AttributeValue::Int(i) => Self::Int(*i),
            AttributeValue::Double(d) => Self::Double(*d),
            AttributeValue::String(s) => Self::Text(s.clone()),
            AttributeValue::Measure { value, .. } => Self::Double(*value),
        }
    }
}

/// One row of the flattened geometry tree.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryNode {
    pub id: i64,
    pub gml_id: Option<String>,
    pub parent_id: Option<i64>,
    pub root_id: i64,
    pub is_solid: bool,
    pub is_composite: bool,
    pub is_triangulated: bool,
    pub is_xlink: bool,
    pub is_reverse: bool,
    pub payload: Option<Payload>,
    pub cityobject_id: Option<i64>,
}

impl GeometryNode {
    pub fn flags(&self) -> NodeFlags {
        NodeFlags {
            is_solid: self.is_solid,
            is_composite: self.is_composite,
            is_triangulated: self.is_triangulated,
        }
    }

    /// Encoded payload columns: `(geometry, solid_geometry, implicit_geometry)`.
    pub fn payload_columns(&self) -> (Option<String>, Option<String>, Option<String>) {
        match &self.payload {
            None => (None, None, None),
            Some(p @ Payload::Explicit(_)) => (Some(p.to_wkt()), None, None),
            Some(p @ Payload::Solid(_)) => (None, Some(p.to_wkt()), None),
            Some(p @ Payload::Implicit(_)) => (None, None, Some(p.to_wkt())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityObjectRow {
    pub id: i64,
    pub objectclass_id: i32,
    pub gml_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub envelope: Option<Envelope>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImplicitGeometryRow {
    pub id: i64,
    pub mime_type: Option<String>,
    pub reference_to_library: Option<String>,
    pub library_object: Option<Vec<u8>>,
    pub relative_brep_id: Option<i64>,
    /// gml:id of the relative geometry, the deduplication key of
    /// prototypes that are not library objects
    pub relative_gml_id: Option<String>,
}

impl ImplicitGeometryRow {
    /// Key under which this record is shared.
    pub fn reference_key(&self) -> Option<&str> {
        self.reference_to_library
            .as_deref()
            .or(self.relative_gml_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericAttributeRow {
    pub id: i64,
    pub cityobject_id: i64,
    pub name: String,
    pub value: Value,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppearanceRow {
    pub id: i64,
    pub gml_id: Option<String>,
    pub theme: Option<String>,
    pub cityobject_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDataRow {
    pub id: i64,
    pub gml_id: Option<String>,
    pub appearance_id: i64,
    pub is_texture: bool,
    pub diffuse_color: Option<[f64; 3]>,
    pub transparency: Option<f64>,
    pub image_uri: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureParamRow {
    pub surface_geometry_id: i64,
    pub surface_data_id: i64,
    pub is_texture_parametrization: bool,
    /// Ring texture coordinates as `s t, s t, ...`
    pub texture_coordinates: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMemberRow {
    pub cityobject_id: i64,
    pub cityobjectgroup_id: i64,
    pub role: Option<String>,
}

/// A row of a thematic table, keyed by the feature's city-object id.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub id: i64,
    pub columns: BTreeMap<&'static str, Value>,
    /// Columns named by document attributes
    pub attributes: BTreeMap<String, Value>,
}

impl FeatureRow {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            columns: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<Value>) {
        self.columns.insert(column, value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).or_else(|| self.attributes.get(column))
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }
}

/// Rows of one thematic table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBatch {
    pub table: &'static str,
    pub rows: Vec<FeatureRow>,
}

/// Pending rows of one writer kind, handed to storage in one round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum RowBatch {
    Geometry(Vec<GeometryNode>),
    CityObject(Vec<CityObjectRow>),
    Implicit(Vec<ImplicitGeometryRow>),
    GenericAttribute(Vec<GenericAttributeRow>),
    Appearance(Vec<AppearanceRow>),
    SurfaceData(Vec<SurfaceDataRow>),
    TextureParam(Vec<TextureParamRow>),
    GroupMember(Vec<GroupMemberRow>),
    Feature(TableBatch),
}

impl RowBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::Geometry(r) => r.len(),
            Self::CityObject(r) => r.len(),
            Self::Implicit(r) => r.len(),
            Self::GenericAttribute(r) => r.len(),
            Self::Appearance(r) => r.len(),
            Self::SurfaceData(r) => r.len(),
            Self::TextureParam(r) => r.len(),
            Self::GroupMember(r) => r.len(),
            Self::Feature(b) => b.rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Geometry(_) => SURFACE_GEOMETRY,
            Self::CityObject(_) => CITYOBJECT,
            Self::Implicit(_) => IMPLICIT_GEOMETRY,
            Self::GenericAttribute(_) => GENERIC_ATTRIBUTE,
            Self::Appearance(_) => APPEARANCE,
            Self::SurfaceData(_) => SURFACE_DATA,
            Self::TextureParam(_) => TEXTURE_PARAM,
            Self::GroupMember(_) => GROUP_MEMBER,
            Self::Feature(b) => b.table,
        }
    }

    /// An empty batch of the same kind and table.
    pub fn empty_like(&self) -> Self {
        match self {
            Self::Geometry(_) => Self::Geometry(Vec::new()),
            Self::CityObject(_) => Self::CityObject(Vec::new()),
            Self::Implicit(_) => Self::Implicit(Vec::new()),
            Self::GenericAttribute(_) => Self::GenericAttribute(Vec::new()),
            Self::Appearance(_) => Self::Appearance(Vec::new()),
            Self::SurfaceData(_) => Self::SurfaceData(Vec::new()),
            Self::TextureParam(_) => Self::TextureParam(Vec::new()),
            Self::GroupMember(_) => Self::GroupMember(Vec::new()),
            Self::Feature(b) => Self::Feature(TableBatch {
                table: b.table,
                rows: Vec::new(),
            }),
        }
    }

    /// Append rows of the same variant (and table).
    pub fn append(&mut self, other: RowBatch) -> Result<()> {
        match (self, other) {
            (Self::Geometry(a), Self::Geometry(b)) => a.extend(b),
            (Self::CityObject(a), Self::CityObject(b)) => a.extend(b),
            (Self::Implicit(a), Self::Implicit(b)) => a.extend(b),
            (Self::GenericAttribute(a), Self::GenericAttribute(b)) => a.extend(b),
            (Self::Appearance(a), Self::Appearance(b)) => a.extend(b),
            (Self::SurfaceData(a), Self::SurfaceData(b)) => a.extend(b),
            (Self::TextureParam(a), Self::TextureParam(b)) => a.extend(b),
            (Self::GroupMember(a), Self::GroupMember(b)) => a.extend(b),
            (Self::Feature(a), Self::Feature(b)) if a.table == b.table => a.rows.extend(b.rows),
            (this, other) => {
                return Err(Error::storage(format!(
                    "cannot append {} rows to a {} batch",
                    other.table(),
                    this.table()
                )))
            }
        }
        Ok(())
    }
}

/// A single-column update patching a row written earlier.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub table: &'static str,
    pub id: i64,
    pub column: &'static str,
    pub value: Value,
}

impl RowUpdate {
    pub fn new(table: &'static str, id: i64, column: &'static str, value: impl Into<Value>) -> Self {
        Self {
            table,
            id,
            column,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citydb_import_geometry::{Point3, PolygonPayload};

    fn node(id: i64, payload: Option<Payload>) -> GeometryNode {
        GeometryNode {
            id,
            gml_id: None,
            parent_id: None,
            root_id: id,
            is_solid: false,
            is_composite: false,
            is_triangulated: false,
            is_xlink: false,
            is_reverse: false,
            payload,
            cityobject_id: None,
        }
    }

    #[test]
    fn test_payload_columns_are_exclusive() {
        let poly = PolygonPayload::new(vec![vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ]]);
        let (g, s, i) = node(1, Some(Payload::Implicit(poly.clone()))).payload_columns();
        assert!(g.is_none() && s.is_none());
        assert!(i.unwrap().starts_with("POLYGON Z"));
        let (g, s, i) = node(1, Some(Payload::Explicit(poly))).payload_columns();
        assert!(g.is_some() && s.is_none() && i.is_none());
        assert_eq!(node(1, None).payload_columns(), (None, None, None));
    }

    #[test]
    fn test_append_checks_variant() {
        let mut batch = RowBatch::Geometry(vec![node(1, None)]);
        batch.append(RowBatch::Geometry(vec![node(2, None)])).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.append(RowBatch::CityObject(vec![])).is_err());

        let mut building = RowBatch::Feature(TableBatch {
            table: "building",
            rows: vec![],
        });
        let room = RowBatch::Feature(TableBatch {
            table: "room",
            rows: vec![FeatureRow::new(1)],
        });
        assert!(building.append(room).is_err());
        assert!(building.empty_like().is_empty());
    }
}
