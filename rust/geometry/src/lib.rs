//! CityDB Import Geometry
//!
//! Storage-free geometry logic for the importer: classification of geometry
//! shapes, the canonical traversal plan of one recursive insertion, ring
//! validation, affine transformation and the coordinate payload codec.

pub mod classify;
pub mod error;
pub mod payload;
pub mod plan;
pub mod ring;
pub mod transform;

// Re-export nalgebra types for convenience
pub use nalgebra::{Matrix4, Point3, Vector3};

pub use classify::{classify, GeometryClass, MemberRole, NodeFlags};
pub use error::{Error, Result};
pub use payload::{Payload, PolygonPayload, SolidPayload};
pub use plan::{
    count_demand, plan, AliasTarget, Diagnostic, GeometryPlan, LinkTarget, PlanOptions,
    PlannedAlias, PlannedLink, PlannedMaterial, PlannedNode,
};
pub use ring::{prepare_polygon, prepare_ring, PreparedPolygon, MIN_RING_POINTS};
pub use transform::AffineTransform;
