// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # CityDB Import Core
//!
//! In-memory city model handed to the importer by a document parser.
//!
//! ## Overview
//!
//! - **Features**: [`Feature`] with thematic attributes, geometry properties,
//!   implicit representations, appearances and nested child features
//! - **Geometry**: [`Geometry`], a closed tagged union over every shape the
//!   parser can produce, with [`Member`] for inline-or-XLink properties
//! - **Implicit geometry**: [`ImplicitGeometry`], prototypes placed by matrix
//!   and reference point
//!
//! The importer never sees raw document bytes; it only walks these types.
//!
//! ## Quick Start
//!
//! ```rust
//! use citydb_import_core::{Feature, FeatureType, Geometry, Member};
//!
//! let wall = Geometry::polygon(vec![
//!     0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0,
//! ])
//! .with_id("wall_poly");
//!
//! let building = Feature::new(FeatureType::Building)
//!     .with_id("bldg_1")
//!     .with_geometry("lod2MultiSurface", Member::inline(Geometry::multi_surface(vec![
//!         Member::inline(wall),
//!     ])));
//!
//! assert_eq!(building.feature_count(), 1);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enable (de)serialization of the model

pub mod appearance;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod implicit;
pub mod schema;

pub use appearance::{Appearance, SurfaceData, SurfaceDataKind, TexCoordList, TextureTarget};
pub use error::{Error, Result};
pub use feature::{
    AttributeValue, Envelope, Feature, FeatureLink, GeometryProperty, ImplicitRepresentation,
};
pub use geometry::{
    strip_fragment, Geometry, GeometryKind, LinearRing, Member, OrientableSurface, Orientation,
    Polygon, Solid, TexturedSurface,
};
pub use implicit::ImplicitGeometry;
pub use schema::FeatureType;
