// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deferred cross-references
//!
//! References that cannot be resolved while a feature is imported are
//! described by a [`PendingLink`] and sent to the [`DeferredQueue`]. The
//! [`XlinkResolver`] drains the queue once the primary pass has flushed.

mod resolver;

pub use resolver::{ResolverStats, XlinkResolver};

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use citydb_import_geometry::LinkTarget;

use crate::uid_cache::UidKind;

/// Where a resolved geometry reference is written.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometrySlot {
    /// A geometry FK column of a feature row
    Column {
        table: &'static str,
        column: &'static str,
        owner_id: i64,
    },
    /// A member position inside a geometry tree; the target subtree is
    /// copied below `parent_id`.
    Tree { parent_id: i64, root_id: i64 },
}

/// A geometry given either by id or by gml:id.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryRef {
    Id(i64),
    GmlId(String),
}

/// A reference waiting for its target.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingLink {
    /// FK column pointing at a feature (or, for implicit geometry, at a
    /// geometry) by gml:id
    Basic {
        table: &'static str,
        owner_id: i64,
        column: &'static str,
        target: String,
        target_kind: UidKind,
    },
    /// Geometry `href` (surface or solid)
    SurfaceGeometry {
        target: String,
        target_kind: LinkTarget,
        reverse: bool,
        slot: GeometrySlot,
    },
    /// Solid whose payload is assembled once its exterior is complete
    SolidGeometry { solid_id: i64 },
    GroupMember {
        group_id: i64,
        target: String,
        role: Option<String>,
    },
    /// Library object to be read into the implicit geometry row
    LibraryObject { implicit_id: i64, uri: String },
    TextureParam {
        surface_data_id: i64,
        target: String,
        /// Target is a ring id rather than a surface id
        ring: bool,
        is_texture: bool,
        texture_coordinates: Option<String>,
    },
    /// Material of a deprecated textured surface
    DeprecatedMaterial {
        material: String,
        surface: GeometryRef,
    },
}

impl PendingLink {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::SurfaceGeometry { .. } => "surface_geometry",
            Self::SolidGeometry { .. } => "solid_geometry",
            Self::GroupMember { .. } => "group_member",
            Self::LibraryObject { .. } => "library_object",
            Self::TextureParam { .. } => "texture_param",
            Self::DeprecatedMaterial { .. } => "deprecated_material",
        }
    }
}

/// A link with its queue sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedLink {
    pub seq: u64,
    pub link: PendingLink,
}

/// Multi-producer queue of pending links.
pub struct DeferredQueue {
    tx: Sender<QueuedLink>,
    rx: Receiver<QueuedLink>,
    next_seq: AtomicU64,
}

impl Default for DeferredQueue {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            next_seq: AtomicU64::new(0),
        }
    }
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue without blocking.
    pub fn propagate(&self, link: PendingLink) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        // The receiver lives as long as the queue, so sending cannot fail
        let _ = self.tx.send(QueuedLink { seq, link });
    }

    /// Take every link queued so far.
    pub fn drain(&self) -> Vec<QueuedLink> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Links queued since creation.
    pub fn total(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }
}
