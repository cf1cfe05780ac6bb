// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Nested geometry model
//!
//! A closed tagged union over every geometry shape the parser can hand to
//! the importer. Shapes the importer cannot store (stand-alone rings, curves,
//! points, ...) are still representable so that the classifier stays a total
//! function over this type.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A geometry node as produced by the parser.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Geometry {
    /// Document-scoped textual identifier (gml:id)
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<String>,
    /// Set by the parser when this node duplicates geometry that is defined
    /// (and imported) elsewhere in the same document.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_copy: bool,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub kind: GeometryKind,
}

/// Geometry shapes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum GeometryKind {
    /// A ring outside of any polygon
    LinearRing(LinearRing),
    Polygon(Polygon),
    OrientableSurface(OrientableSurface),
    /// CityGML 1.0 textured surface (deprecated appearance model)
    TexturedSurface(TexturedSurface),
    CompositeSurface { members: Vec<Member> },
    /// gml:Surface, members are its polygon patches
    Surface { members: Vec<Member> },
    TriangulatedSurface { members: Vec<Member> },
    Tin { members: Vec<Member> },
    MultiSurface { members: Vec<Member> },
    MultiPolygon { members: Vec<Member> },
    Solid(Solid),
    CompositeSolid { members: Vec<Member> },
    MultiSolid { members: Vec<Member> },
    GeometricComplex { members: Vec<Member> },
    /// Any primitive the importer does not store (curves, points, ...)
    Unsupported { type_name: String },
}

/// Either an inline geometry or an XLink reference to one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Member {
    Inline(Box<Geometry>),
    Href(String),
}

/// A closed ring of 3D coordinates, stored flat as `x, y, z, x, y, z, ...`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearRing {
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<String>,
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polygon {
    pub exterior: Option<LinearRing>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub interior: Vec<LinearRing>,
}

/// Surface orientation sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Orientation {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "+"))]
    Positive,
    #[cfg_attr(feature = "serde", serde(rename = "-"))]
    Negative,
}

impl Orientation {
    /// Parse the gml orientation attribute ("+" or "-").
    pub fn from_sign(sign: &str) -> Option<Self> {
        match sign.trim() {
            "+" | "" => Some(Self::Positive),
            "-" => Some(Self::Negative),
            _ => None,
        }
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self == Self::Negative
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrientableSurface {
    #[cfg_attr(feature = "serde", serde(default))]
    pub orientation: Orientation,
    pub base: Member,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TexturedSurface {
    #[cfg_attr(feature = "serde", serde(default))]
    pub orientation: Orientation,
    pub base: Member,
    /// References to materials defined elsewhere in the document
    #[cfg_attr(feature = "serde", serde(default))]
    pub material_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Solid {
    pub exterior: Option<Member>,
    /// Inner shells. Not stored by the importer.
    #[cfg_attr(feature = "serde", serde(default))]
    pub interior: Vec<Member>,
}

impl Geometry {
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            id: None,
            is_copy: false,
            kind,
        }
    }

    /// Builder-style gml:id setter
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark this node as a parser-created copy of geometry defined elsewhere.
    pub fn as_copy(mut self) -> Self {
        self.is_copy = true;
        self
    }

    /// A polygon without holes from flat xyz coordinates.
    pub fn polygon(exterior: Vec<f64>) -> Self {
        Self::new(GeometryKind::Polygon(Polygon {
            exterior: Some(LinearRing::new(exterior)),
            interior: Vec::new(),
        }))
    }

    pub fn composite_surface(members: Vec<Member>) -> Self {
        Self::new(GeometryKind::CompositeSurface { members })
    }

    pub fn multi_surface(members: Vec<Member>) -> Self {
        Self::new(GeometryKind::MultiSurface { members })
    }

    pub fn solid(exterior: Member) -> Self {
        Self::new(GeometryKind::Solid(Solid {
            exterior: Some(exterior),
            interior: Vec::new(),
        }))
    }

    pub fn orientable(orientation: Orientation, base: Member) -> Self {
        Self::new(GeometryKind::OrientableSurface(OrientableSurface {
            orientation,
            base,
        }))
    }

    /// Type name used in log output.
    pub fn type_name(&self) -> &str {
        self.kind.type_name()
    }
}

impl GeometryKind {
    pub fn type_name(&self) -> &str {
        match self {
            Self::LinearRing(_) => "LinearRing",
            Self::Polygon(_) => "Polygon",
            Self::OrientableSurface(_) => "OrientableSurface",
            Self::TexturedSurface(_) => "TexturedSurface",
            Self::CompositeSurface { .. } => "CompositeSurface",
            Self::Surface { .. } => "Surface",
            Self::TriangulatedSurface { .. } => "TriangulatedSurface",
            Self::Tin { .. } => "Tin",
            Self::MultiSurface { .. } => "MultiSurface",
            Self::MultiPolygon { .. } => "MultiPolygon",
            Self::Solid(_) => "Solid",
            Self::CompositeSolid { .. } => "CompositeSolid",
            Self::MultiSolid { .. } => "MultiSolid",
            Self::GeometricComplex { .. } => "GeometricComplex",
            Self::Unsupported { type_name } => type_name,
        }
    }

    /// Child members of aggregate and composite shapes, in document order.
    pub fn members(&self) -> Option<&[Member]> {
        match self {
            Self::CompositeSurface { members }
            | Self::Surface { members }
            | Self::TriangulatedSurface { members }
            | Self::Tin { members }
            | Self::MultiSurface { members }
            | Self::MultiPolygon { members }
            | Self::CompositeSolid { members }
            | Self::MultiSolid { members }
            | Self::GeometricComplex { members } => Some(members),
            _ => None,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Member {
    pub fn inline(geometry: Geometry) -> Self {
        Self::Inline(Box::new(geometry))
    }

    pub fn href(target: impl Into<String>) -> Self {
        Self::Href(target.into())
    }

    pub fn as_inline(&self) -> Option<&Geometry> {
        match self {
            Self::Inline(geometry) => Some(geometry),
            Self::Href(_) => None,
        }
    }

    /// The referenced gml:id without the leading `#`.
    pub fn href_target(&self) -> Option<&str> {
        match self {
            Self::Href(href) => Some(strip_fragment(href)),
            Self::Inline(_) => None,
        }
    }
}

impl LinearRing {
    pub fn new(coordinates: Vec<f64>) -> Self {
        Self {
            id: None,
            coordinates,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Number of xyz points (ignores a trailing partial tuple).
    #[inline]
    pub fn point_count(&self) -> usize {
        self.coordinates.len() / 3
    }
}

/// Strip the `#` of a same-document XLink. Remote references are returned
/// unchanged and will never match a local gml:id.
pub fn strip_fragment(href: &str) -> &str {
    href.trim().strip_prefix('#').unwrap_or(href.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<f64> {
        vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ]
    }

    #[test]
    fn href_target_strips_fragment() {
        assert_eq!(Member::href("#poly_1").href_target(), Some("poly_1"));
        assert_eq!(Member::href("poly_1").href_target(), Some("poly_1"));
        assert_eq!(
            Member::href("other.gml#poly_1").href_target(),
            Some("other.gml#poly_1")
        );
        assert!(Member::inline(Geometry::polygon(square()))
            .href_target()
            .is_none());
    }

    #[test]
    fn members_only_on_aggregates() {
        let ms = Geometry::multi_surface(vec![Member::inline(Geometry::polygon(square()))]);
        assert_eq!(ms.kind.members().map(<[Member]>::len), Some(1));
        assert!(Geometry::polygon(square()).kind.members().is_none());
    }

    #[test]
    fn orientation_from_sign() {
        assert_eq!(Orientation::from_sign("-"), Some(Orientation::Negative));
        assert_eq!(Orientation::from_sign("+"), Some(Orientation::Positive));
        assert_eq!(Orientation::from_sign("x"), None);
    }

    #[test]
    fn ring_point_count() {
        assert_eq!(LinearRing::new(square()).point_count(), 5);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn geometry_json_shape() {
        let json = r##"{
            "id": "ms_1",
            "type": "multi_surface",
            "members": [
                {"href": "#poly_9"},
                {"inline": {"type": "polygon", "exterior": {"coordinates": [0,0,0, 1,0,0, 1,1,0, 0,0,0]}}}
            ]
        }"##;
        let geometry: Geometry = serde_json::from_str(json).unwrap();
        assert_eq!(geometry.id.as_deref(), Some("ms_1"));
        let members = geometry.kind.members().unwrap();
        assert_eq!(members[0].href_target(), Some("poly_9"));
        assert_eq!(members[1].as_inline().unwrap().type_name(), "Polygon");
    }
}
