// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometry classifier
//!
//! A total function over [`GeometryKind`] deciding which shapes can be
//! stored as surface-geometry rows, and which child shapes each container
//! accepts as members.

use citydb_import_core::GeometryKind;

use crate::error::{Error, Result};

/// Storage class of a supported geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryClass {
    /// Leaf polygon carrying a coordinate payload
    Polygon,
    /// Orientable or textured surface: flips orientation, never stored itself
    OrientationWrapper,
    CompositeSurface,
    /// gml:Surface made of polygon patches
    PatchSurface,
    TriangulatedSurface,
    MultiSurface,
    MultiPolygon,
    Solid,
    CompositeSolid,
    MultiSolid,
    GeometricComplex,
}

/// What a container accepts as its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    /// Top-level insertion or geometric complex member
    Any,
    /// Any abstract surface
    Surface,
    /// Polygon patches only
    Polygon,
    /// Solids and composite solids
    Solid,
}

/// Structural flags stored with every surface-geometry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFlags {
    pub is_solid: bool,
    pub is_composite: bool,
    pub is_triangulated: bool,
}

/// Classify a geometry shape. Unsupported shapes yield an error that names
/// the shape, to be logged by the caller.
pub fn classify(kind: &GeometryKind) -> Result<GeometryClass> {
    let class = match kind {
        GeometryKind::Polygon(_) => GeometryClass::Polygon,
        GeometryKind::OrientableSurface(_) | GeometryKind::TexturedSurface(_) => {
            GeometryClass::OrientationWrapper
        }
        GeometryKind::CompositeSurface { .. } => GeometryClass::CompositeSurface,
        GeometryKind::Surface { .. } => GeometryClass::PatchSurface,
        GeometryKind::TriangulatedSurface { .. } | GeometryKind::Tin { .. } => {
            GeometryClass::TriangulatedSurface
        }
        GeometryKind::MultiSurface { .. } => GeometryClass::MultiSurface,
        GeometryKind::MultiPolygon { .. } => GeometryClass::MultiPolygon,
        GeometryKind::Solid(_) => GeometryClass::Solid,
        GeometryKind::CompositeSolid { .. } => GeometryClass::CompositeSolid,
        GeometryKind::MultiSolid { .. } => GeometryClass::MultiSolid,
        GeometryKind::GeometricComplex { .. } => GeometryClass::GeometricComplex,
        GeometryKind::LinearRing(_) => {
            return Err(Error::unsupported("LinearRing outside of a polygon"))
        }
        GeometryKind::Unsupported { type_name } => {
            return Err(Error::unsupported(format!("{} is not a supported geometry type", type_name)))
        }
    };
    Ok(class)
}

impl GeometryClass {
    /// Role required of this container's members, `None` for leaves.
    pub fn member_role(&self) -> Option<MemberRole> {
        match self {
            Self::Polygon => None,
            Self::OrientationWrapper
            | Self::CompositeSurface
            | Self::MultiSurface
            | Self::Solid => Some(MemberRole::Surface),
            Self::PatchSurface | Self::TriangulatedSurface | Self::MultiPolygon => {
                Some(MemberRole::Polygon)
            }
            Self::CompositeSolid | Self::MultiSolid => Some(MemberRole::Solid),
            Self::GeometricComplex => Some(MemberRole::Any),
        }
    }

    /// Whether this class consumes a row (and so an identifier).
    #[inline]
    pub fn allocates(&self) -> bool {
        !matches!(self, Self::OrientationWrapper)
    }

    pub fn flags(&self) -> NodeFlags {
        match self {
            Self::CompositeSurface | Self::GeometricComplex => NodeFlags {
                is_composite: true,
                ..Default::default()
            },
            Self::TriangulatedSurface => NodeFlags {
                is_triangulated: true,
                ..Default::default()
            },
            Self::Solid => NodeFlags {
                is_solid: true,
                ..Default::default()
            },
            Self::CompositeSolid => NodeFlags {
                is_solid: true,
                is_composite: true,
                ..Default::default()
            },
            _ => NodeFlags::default(),
        }
    }

    /// Whether this class is an abstract surface
    pub fn is_surface(&self) -> bool {
        matches!(
            self,
            Self::Polygon
                | Self::OrientationWrapper
                | Self::CompositeSurface
                | Self::PatchSurface
                | Self::TriangulatedSurface
        )
    }

    /// Whether this class is an abstract solid
    pub fn is_solid(&self) -> bool {
        matches!(self, Self::Solid | Self::CompositeSolid)
    }
}

impl MemberRole {
    /// Whether a member of class `class` may appear in this role.
    pub fn accepts(&self, class: GeometryClass) -> bool {
        match self {
            Self::Any => true,
            Self::Surface => class.is_surface(),
            Self::Polygon => class == GeometryClass::Polygon,
            Self::Solid => class.is_solid(),
        }
    }

    /// XLink targets in this role point at solids rather than surfaces.
    pub fn expects_solid(&self) -> bool {
        *self == Self::Solid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citydb_import_core::{LinearRing, Polygon, Solid};

    #[test]
    fn test_unsupported_shapes() {
        assert!(classify(&GeometryKind::LinearRing(LinearRing::default())).is_err());
        let err = classify(&GeometryKind::Unsupported {
            type_name: "MultiCurve".into(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("MultiCurve"));
    }

    #[test]
    fn test_flags() {
        let solid = classify(&GeometryKind::Solid(Solid::default())).unwrap();
        assert_eq!(solid.flags(), NodeFlags { is_solid: true, ..Default::default() });

        let cs = classify(&GeometryKind::CompositeSolid { members: vec![] }).unwrap();
        assert!(cs.flags().is_solid && cs.flags().is_composite);

        let tin = classify(&GeometryKind::Tin { members: vec![] }).unwrap();
        assert!(tin.flags().is_triangulated);

        let poly = classify(&GeometryKind::Polygon(Polygon::default())).unwrap();
        assert_eq!(poly.flags(), NodeFlags::default());
        assert!(poly.member_role().is_none());
    }

    #[test]
    fn test_member_roles() {
        assert!(MemberRole::Surface.accepts(GeometryClass::Polygon));
        assert!(MemberRole::Surface.accepts(GeometryClass::CompositeSurface));
        assert!(!MemberRole::Surface.accepts(GeometryClass::MultiSurface));
        assert!(!MemberRole::Surface.accepts(GeometryClass::Solid));
        assert!(MemberRole::Solid.accepts(GeometryClass::CompositeSolid));
        assert!(!MemberRole::Polygon.accepts(GeometryClass::CompositeSurface));
        assert!(MemberRole::Any.accepts(GeometryClass::MultiSolid));
    }

    #[test]
    fn test_wrapper_does_not_allocate() {
        assert!(!GeometryClass::OrientationWrapper.allocates());
        assert!(GeometryClass::MultiSolid.allocates());
    }
}
