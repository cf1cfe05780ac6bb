// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Features: the top-level objects of a city model document.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::appearance::Appearance;
use crate::geometry::{strip_fragment, Member};
use crate::implicit::ImplicitGeometry;
use crate::schema::FeatureType;

/// A city object with its thematic attributes, geometry properties and
/// nested child features.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Feature {
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: Option<String>,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub feature_type: FeatureType,
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub envelope: Option<Envelope>,
    /// Thematic attributes mapped to columns of the feature table
    #[cfg_attr(feature = "serde", serde(default))]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub generic_attributes: BTreeMap<String, AttributeValue>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub geometries: Vec<GeometryProperty>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub implicit: Vec<ImplicitRepresentation>,
    /// Nested features (building parts, rooms, boundary surfaces, ...)
    #[cfg_attr(feature = "serde", serde(default))]
    pub children: Vec<Feature>,
    /// XLink references to other features
    #[cfg_attr(feature = "serde", serde(default))]
    pub links: Vec<FeatureLink>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub appearances: Vec<Appearance>,
}

/// A named geometry property, e.g. `lod2MultiSurface`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeometryProperty {
    pub name: String,
    pub member: Member,
}

/// A named implicit representation, e.g. `lod2ImplicitRepresentation`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImplicitRepresentation {
    pub name: String,
    pub geometry: ImplicitGeometry,
}

/// A reference from a feature to another feature.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureLink {
    /// Property name, e.g. `groupMember` or `parent`
    pub role: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Measure { value: f64, uom: String },
}

/// Axis-aligned 3D bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Envelope {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl Feature {
    pub fn new(feature_type: FeatureType) -> Self {
        Self {
            id: None,
            feature_type,
            name: None,
            description: None,
            envelope: None,
            attributes: BTreeMap::new(),
            generic_attributes: BTreeMap::new(),
            geometries: Vec::new(),
            implicit: Vec::new(),
            children: Vec::new(),
            links: Vec::new(),
            appearances: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_geometry(mut self, name: impl Into<String>, member: Member) -> Self {
        self.geometries.push(GeometryProperty {
            name: name.into(),
            member,
        });
        self
    }

    pub fn with_implicit(mut self, name: impl Into<String>, geometry: ImplicitGeometry) -> Self {
        self.implicit.push(ImplicitRepresentation {
            name: name.into(),
            geometry,
        });
        self
    }

    pub fn with_child(mut self, child: Feature) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_link(mut self, role: impl Into<String>, href: impl Into<String>) -> Self {
        self.links.push(FeatureLink {
            role: role.into(),
            href: href.into(),
        });
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Number of features in this subtree, including `self`.
    pub fn feature_count(&self) -> usize {
        1 + self.children.iter().map(Feature::feature_count).sum::<usize>()
    }
}

impl FeatureLink {
    /// The referenced gml:id without the leading `#`.
    pub fn target(&self) -> &str {
        strip_fragment(&self.href)
    }
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) | Self::Measure { value: v, .. } => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl Envelope {
    pub fn new(lower: [f64; 3], upper: [f64; 3]) -> Self {
        Self { lower, upper }
    }

    /// Envelope of a single point
    pub fn from_point(p: [f64; 3]) -> Self {
        Self { lower: p, upper: p }
    }

    pub fn expand_point(&mut self, p: [f64; 3]) {
        for axis in 0..3 {
            self.lower[axis] = self.lower[axis].min(p[axis]);
            self.upper[axis] = self.upper[axis].max(p[axis]);
        }
    }

    pub fn union(&mut self, other: &Envelope) {
        self.expand_point(other.lower);
        self.expand_point(other.upper);
    }

    /// Combine two optional envelopes
    pub fn merge(a: Option<Envelope>, b: Option<Envelope>) -> Option<Envelope> {
        match (a, b) {
            (Some(mut a), Some(b)) => {
                a.union(&b);
                Some(a)
            }
            (a, None) => a,
            (None, b) => b,
        }
    }
}
