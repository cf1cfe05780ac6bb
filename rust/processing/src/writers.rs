// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thematic feature writers
//!
//! Each feature type maps onto one table described by a static
//! [`TableSpec`]: which geometry property fills which column, where implicit
//! representations go, which FK column points at the parent feature and
//! which column an XLink role patches. The importer drives geometry and
//! reference handling from the table layout; [`FeatureWriter`] only maps the
//! thematic attributes.

use citydb_import_core::{AttributeValue, Feature, FeatureType};

use crate::orchestrator::WriterKind;
use crate::rows::{FeatureRow, Value};

/// A geometry property stored as a surface-geometry FK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryColumn {
    pub property: &'static str,
    pub column: &'static str,
    /// The column references a solid
    pub solid: bool,
}

/// An implicit representation: prototype FK, reference point and matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplicitColumns {
    pub property: &'static str,
    pub rep_column: &'static str,
    pub ref_point_column: &'static str,
    pub matrix_column: &'static str,
}

/// Table layout of one feature table.
#[derive(Debug)]
pub struct TableSpec {
    pub table: &'static str,
    pub kind: WriterKind,
    pub geometry: &'static [GeometryColumn],
    pub implicit: &'static [ImplicitColumns],
    /// FK column per parent feature type
    pub parents: &'static [(FeatureType, &'static str)],
    /// FK to the topmost feature of the same table family
    pub root_column: Option<&'static str>,
    /// XLink role to FK column
    pub links: &'static [(&'static str, &'static str)],
    /// XLink role whose targets become group memberships
    pub member_role: Option<&'static str>,
}

impl TableSpec {
    pub fn geometry_column(&self, property: &str) -> Option<&GeometryColumn> {
        self.geometry.iter().find(|g| g.property == property)
    }

    pub fn implicit_columns(&self, property: &str) -> Option<&ImplicitColumns> {
        self.implicit.iter().find(|i| i.property == property)
    }

    pub fn parent_column(&self, parent: FeatureType) -> Option<&'static str> {
        self.parents
            .iter()
            .find(|(t, _)| *t == parent)
            .map(|(_, c)| *c)
    }

    pub fn link_column(&self, role: &str) -> Option<&'static str> {
        self.links.iter().find(|(r, _)| *r == role).map(|(_, c)| *c)
    }
}

/// Maps thematic attributes of one feature type to columns.
pub trait FeatureWriter: Send + Sync {
    fn spec(&self) -> &TableSpec;

    /// Copy document attributes into the row. Measures add a `_unit`
    /// column next to the value.
    fn map_attributes(&self, feature: &Feature, row: &mut FeatureRow) {
        for (name, value) in &feature.attributes {
            let column = column_name(name);
            if let AttributeValue::Measure { uom, .. } = value {
                row.set_attribute(format!("{}_unit", column), Value::Text(uom.clone()));
            }
            row.set_attribute(column, Value::from(value));
        }
    }
}

impl FeatureWriter for TableSpec {
    fn spec(&self) -> &TableSpec {
        self
    }
}

/// `measuredHeight` -> `measured_height`
pub fn column_name(attribute: &str) -> String {
    let mut out = String::with_capacity(attribute.len() + 4);
    for (i, c) in attribute.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

const fn geom(property: &'static str, column: &'static str) -> GeometryColumn {
    GeometryColumn {
        property,
        column,
        solid: false,
    }
}

const fn solid(property: &'static str, column: &'static str) -> GeometryColumn {
    GeometryColumn {
        property,
        column,
        solid: true,
    }
}

const fn implicit(
    property: &'static str,
    rep_column: &'static str,
    ref_point_column: &'static str,
    matrix_column: &'static str,
) -> ImplicitColumns {
    ImplicitColumns {
        property,
        rep_column,
        ref_point_column,
        matrix_column,
    }
}

pub static BUILDING: TableSpec = TableSpec {
    table: "building",
    kind: WriterKind::Building,
    geometry: &[
        geom("lod0FootPrint", "lod0_footprint_id"),
        geom("lod0RoofEdge", "lod0_roofprint_id"),
        geom("lod1MultiSurface", "lod1_multi_surface_id"),
        geom("lod2MultiSurface", "lod2_multi_surface_id"),
        geom("lod3MultiSurface", "lod3_multi_surface_id"),
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
        solid("lod1Solid", "lod1_solid_id"),
        solid("lod2Solid", "lod2_solid_id"),
        solid("lod3Solid", "lod3_solid_id"),
        solid("lod4Solid", "lod4_solid_id"),
    ],
    implicit: &[],
    parents: &[
        (FeatureType::Building, "building_parent_id"),
        (FeatureType::BuildingPart, "building_parent_id"),
    ],
    root_column: Some("building_root_id"),
    links: &[],
    member_role: None,
};

pub static ROOM: TableSpec = TableSpec {
    table: "room",
    kind: WriterKind::Room,
    geometry: &[
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
        solid("lod4Solid", "lod4_solid_id"),
    ],
    implicit: &[],
    parents: &[
        (FeatureType::Building, "building_id"),
        (FeatureType::BuildingPart, "building_id"),
    ],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static BUILDING_INSTALLATION: TableSpec = TableSpec {
    table: "building_installation",
    kind: WriterKind::BuildingInstallation,
    geometry: &[
        geom("lod2Geometry", "lod2_brep_id"),
        geom("lod3Geometry", "lod3_brep_id"),
        geom("lod4Geometry", "lod4_brep_id"),
    ],
    implicit: &[
        implicit(
            "lod2ImplicitRepresentation",
            "lod2_implicit_rep_id",
            "lod2_implicit_ref_point",
            "lod2_implicit_transformation",
        ),
        implicit(
            "lod3ImplicitRepresentation",
            "lod3_implicit_rep_id",
            "lod3_implicit_ref_point",
            "lod3_implicit_transformation",
        ),
        implicit(
            "lod4ImplicitRepresentation",
            "lod4_implicit_rep_id",
            "lod4_implicit_ref_point",
            "lod4_implicit_transformation",
        ),
    ],
    parents: &[
        (FeatureType::Building, "building_id"),
        (FeatureType::BuildingPart, "building_id"),
        (FeatureType::Room, "room_id"),
    ],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static BUILDING_FURNITURE: TableSpec = TableSpec {
    table: "building_furniture",
    kind: WriterKind::BuildingFurniture,
    geometry: &[geom("lod4Geometry", "lod4_brep_id")],
    implicit: &[implicit(
        "lod4ImplicitRepresentation",
        "lod4_implicit_rep_id",
        "lod4_implicit_ref_point",
        "lod4_implicit_transformation",
    )],
    parents: &[(FeatureType::Room, "room_id")],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static THEMATIC_SURFACE: TableSpec = TableSpec {
    table: "thematic_surface",
    kind: WriterKind::ThematicSurface,
    geometry: &[
        geom("lod2MultiSurface", "lod2_multi_surface_id"),
        geom("lod3MultiSurface", "lod3_multi_surface_id"),
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
    ],
    implicit: &[],
    parents: &[
        (FeatureType::Building, "building_id"),
        (FeatureType::BuildingPart, "building_id"),
        (FeatureType::Room, "room_id"),
        (FeatureType::BuildingInstallation, "building_installation_id"),
        (FeatureType::IntBuildingInstallation, "building_installation_id"),
    ],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static OPENING: TableSpec = TableSpec {
    table: "opening",
    kind: WriterKind::Opening,
    geometry: &[
        geom("lod3MultiSurface", "lod3_multi_surface_id"),
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
    ],
    implicit: &[
        implicit(
            "lod3ImplicitRepresentation",
            "lod3_implicit_rep_id",
            "lod3_implicit_ref_point",
            "lod3_implicit_transformation",
        ),
        implicit(
            "lod4ImplicitRepresentation",
            "lod4_implicit_rep_id",
            "lod4_implicit_ref_point",
            "lod4_implicit_transformation",
        ),
    ],
    // Openings are linked to their surfaces through opening_to_them_surface
    parents: &[],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static CITY_FURNITURE: TableSpec = TableSpec {
    table: "city_furniture",
    kind: WriterKind::CityFurniture,
    geometry: &[
        geom("lod1Geometry", "lod1_brep_id"),
        geom("lod2Geometry", "lod2_brep_id"),
        geom("lod3Geometry", "lod3_brep_id"),
        geom("lod4Geometry", "lod4_brep_id"),
    ],
    implicit: &[
        implicit(
            "lod1ImplicitRepresentation",
            "lod1_implicit_rep_id",
            "lod1_implicit_ref_point",
            "lod1_implicit_transformation",
        ),
        implicit(
            "lod2ImplicitRepresentation",
            "lod2_implicit_rep_id",
            "lod2_implicit_ref_point",
            "lod2_implicit_transformation",
        ),
        implicit(
            "lod3ImplicitRepresentation",
            "lod3_implicit_rep_id",
            "lod3_implicit_ref_point",
            "lod3_implicit_transformation",
        ),
        implicit(
            "lod4ImplicitRepresentation",
            "lod4_implicit_rep_id",
            "lod4_implicit_ref_point",
            "lod4_implicit_transformation",
        ),
    ],
    parents: &[],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static GENERIC_CITY_OBJECT: TableSpec = TableSpec {
    table: "generic_cityobject",
    kind: WriterKind::GenericCityObject,
    geometry: &[
        geom("lod0Geometry", "lod0_brep_id"),
        geom("lod1Geometry", "lod1_brep_id"),
        geom("lod2Geometry", "lod2_brep_id"),
        geom("lod3Geometry", "lod3_brep_id"),
        geom("lod4Geometry", "lod4_brep_id"),
    ],
    implicit: &[
        implicit(
            "lod0ImplicitRepresentation",
            "lod0_implicit_rep_id",
            "lod0_implicit_ref_point",
            "lod0_implicit_transformation",
        ),
        implicit(
            "lod1ImplicitRepresentation",
            "lod1_implicit_rep_id",
            "lod1_implicit_ref_point",
            "lod1_implicit_transformation",
        ),
        implicit(
            "lod2ImplicitRepresentation",
            "lod2_implicit_rep_id",
            "lod2_implicit_ref_point",
            "lod2_implicit_transformation",
        ),
        implicit(
            "lod3ImplicitRepresentation",
            "lod3_implicit_rep_id",
            "lod3_implicit_ref_point",
            "lod3_implicit_transformation",
        ),
        implicit(
            "lod4ImplicitRepresentation",
            "lod4_implicit_rep_id",
            "lod4_implicit_ref_point",
            "lod4_implicit_transformation",
        ),
    ],
    parents: &[],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static LAND_USE: TableSpec = TableSpec {
    table: "land_use",
    kind: WriterKind::LandUse,
    geometry: &[
        geom("lod0MultiSurface", "lod0_multi_surface_id"),
        geom("lod1MultiSurface", "lod1_multi_surface_id"),
        geom("lod2MultiSurface", "lod2_multi_surface_id"),
        geom("lod3MultiSurface", "lod3_multi_surface_id"),
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
    ],
    implicit: &[],
    parents: &[],
    root_column: None,
    links: &[],
    member_role: None,
};

pub static CITY_OBJECT_GROUP: TableSpec = TableSpec {
    table: "cityobjectgroup",
    kind: WriterKind::CityObjectGroup,
    geometry: &[geom("geometry", "brep_id")],
    implicit: &[],
    parents: &[],
    root_column: None,
    links: &[("parent", "parent_cityobject_id")],
    member_role: Some("groupMember"),
};

pub static BRIDGE: TableSpec = TableSpec {
    table: "bridge",
    kind: WriterKind::Bridge,
    geometry: &[
        geom("lod1MultiSurface", "lod1_multi_surface_id"),
        geom("lod2MultiSurface", "lod2_multi_surface_id"),
        geom("lod3MultiSurface", "lod3_multi_surface_id"),
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
        solid("lod1Solid", "lod1_solid_id"),
        solid("lod2Solid", "lod2_solid_id"),
        solid("lod3Solid", "lod3_solid_id"),
        solid("lod4Solid", "lod4_solid_id"),
    ],
    implicit: &[],
    parents: &[
        (FeatureType::Bridge, "bridge_parent_id"),
        (FeatureType::BridgePart, "bridge_parent_id"),
    ],
    root_column: Some("bridge_root_id"),
    links: &[],
    member_role: None,
};

pub static TUNNEL: TableSpec = TableSpec {
    table: "tunnel",
    kind: WriterKind::Tunnel,
    geometry: &[
        geom("lod1MultiSurface", "lod1_multi_surface_id"),
        geom("lod2MultiSurface", "lod2_multi_surface_id"),
        geom("lod3MultiSurface", "lod3_multi_surface_id"),
        geom("lod4MultiSurface", "lod4_multi_surface_id"),
        solid("lod1Solid", "lod1_solid_id"),
        solid("lod2Solid", "lod2_solid_id"),
        solid("lod3Solid", "lod3_solid_id"),
        solid("lod4Solid", "lod4_solid_id"),
    ],
    implicit: &[],
    parents: &[
        (FeatureType::Tunnel, "tunnel_parent_id"),
        (FeatureType::TunnelPart, "tunnel_parent_id"),
    ],
    root_column: Some("tunnel_root_id"),
    links: &[],
    member_role: None,
};

/// Link table between openings and the surfaces they are cut into.
pub const OPENING_TO_THEM_SURFACE: &str = "opening_to_them_surface";

/// The writer of a feature type.
pub fn writer_for(feature_type: FeatureType) -> &'static dyn FeatureWriter {
    table_spec(feature_type)
}

pub fn table_spec(feature_type: FeatureType) -> &'static TableSpec {
    use FeatureType::*;
    match feature_type {
        Building | BuildingPart => &BUILDING,
        Room => &ROOM,
        BuildingInstallation | IntBuildingInstallation => &BUILDING_INSTALLATION,
        BuildingFurniture => &BUILDING_FURNITURE,
        RoofSurface | WallSurface | GroundSurface | ClosureSurface | FloorSurface
        | CeilingSurface | InteriorWallSurface | OuterCeilingSurface | OuterFloorSurface => {
            &THEMATIC_SURFACE
        }
        Window | Door => &OPENING,
        CityFurniture => &CITY_FURNITURE,
        GenericCityObject => &GENERIC_CITY_OBJECT,
        LandUse => &LAND_USE,
        CityObjectGroup => &CITY_OBJECT_GROUP,
        Bridge | BridgePart => &BRIDGE,
        Tunnel | TunnelPart => &TUNNEL,
    }
}
