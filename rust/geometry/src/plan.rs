// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical traversal plan
//!
//! One recursive insertion is planned by a single depth-first walk over the
//! geometry tree. The plan lists, in visit order, every node that will become
//! a surface-geometry row, every XLink that must be resolved later and every
//! orientation alias. The identifier demand of an insertion is the number of
//! planned nodes, and the writer zips the planned nodes with the identifiers
//! it fetched, so counting and inserting can never disagree about order or
//! count.
//!
//! ```text
//! MultiSurface            node 0  (root)
//! ├── Polygon             node 1  parent 0
//! ├── OrientableSurface(-)        alias -> node 2
//! │   └── CompositeSurface node 2 parent 0, reverse
//! │       └── Polygon      node 3 parent 2, reverse
//! └── href #poly_9                link, parent 0
//! ```

use citydb_import_core::{Envelope, Geometry, GeometryKind, Member, Orientation};
use rustc_hash::FxHashSet;

use crate::classify::{classify, GeometryClass, MemberRole, NodeFlags};
use crate::error::Error;
use crate::payload::{Payload, PolygonPayload, SolidPayload};
use crate::ring::prepare_polygon;
use crate::transform::AffineTransform;

/// Planning options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions<'a> {
    /// Affine transformation applied to explicit coordinates
    pub transform: Option<&'a AffineTransform>,
    /// Plan a prototype tree of an implicit geometry: polygon payloads are
    /// implicit and the transformation is not applied.
    pub implicit: bool,
    /// Collect ring ids for texture-coordinate correlation
    pub collect_ring_ids: bool,
}

/// One future surface-geometry row.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNode {
    pub gml_id: Option<String>,
    /// Index of the parent node in [`GeometryPlan::nodes`]
    pub parent: Option<usize>,
    pub class: GeometryClass,
    pub flags: NodeFlags,
    pub is_reverse: bool,
    pub payload: Option<Payload>,
    /// Solid whose payload cannot be assembled locally because its exterior
    /// contains unresolved references.
    pub solid_deferred: bool,
}

/// What an unresolved reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    Surface,
    Solid,
}

/// An in-tree XLink (or copy placeholder) to be resolved later.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLink {
    /// Target gml:id without `#`
    pub target: String,
    /// Node under which the referenced geometry belongs
    pub parent: Option<usize>,
    pub reverse: bool,
    pub target_kind: LinkTarget,
    /// Produced by a parser copy rather than an explicit href
    pub from_copy: bool,
}

/// Where an orientation wrapper's id points to.
#[derive(Debug, Clone, PartialEq)]
pub enum AliasTarget {
    /// A node of this plan
    Node(usize),
    /// A geometry referenced by gml:id
    Href(String),
}

/// Orientation wrappers are not stored; their id is remembered as an alias of
/// the wrapped geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAlias {
    pub gml_id: String,
    pub target: AliasTarget,
    /// Sign of the wrapper itself
    pub negative: bool,
    /// Whether the wrapper's own definition is the reverse of the target:
    /// of the stored rows for [`AliasTarget::Node`], of the referenced
    /// definition for [`AliasTarget::Href`].
    pub reverse: bool,
}

/// A material reference carried by a deprecated textured surface.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMaterial {
    pub surface: AliasTarget,
    pub material: String,
}

/// Something skipped while planning. Skips never abort the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub gml_id: Option<String>,
    pub error: Error,
}

/// The complete plan of one recursive insertion.
#[derive(Debug, Clone, Default)]
pub struct GeometryPlan {
    pub nodes: Vec<PlannedNode>,
    pub links: Vec<PlannedLink>,
    pub aliases: Vec<PlannedAlias>,
    pub materials: Vec<PlannedMaterial>,
    /// `(ring gml:id, polygon node index)`
    pub ring_ids: Vec<(String, usize)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl GeometryPlan {
    /// Number of identifiers the insertion needs.
    #[inline]
    pub fn demand(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Envelope over all polygon payloads.
    pub fn envelope(&self) -> Option<Envelope> {
        self.nodes
            .iter()
            .filter_map(|n| n.payload.as_ref().and_then(Payload::polygon))
            .fold(None, |acc, p| Envelope::merge(acc, p.envelope()))
    }
}

/// Count the identifier demand of a geometry tree.
pub fn count_demand(geometry: &Geometry, options: &PlanOptions<'_>) -> usize {
    plan(geometry, options).demand()
}

/// Plan the insertion of `geometry` as the root of a new tree.
pub fn plan(geometry: &Geometry, options: &PlanOptions<'_>) -> GeometryPlan {
    let mut planner = Planner {
        options,
        plan: GeometryPlan::default(),
        seen_ids: FxHashSet::default(),
    };
    planner.visit(geometry, None, false, MemberRole::Any);
    planner.plan
}

struct Planner<'o, 'a> {
    options: &'o PlanOptions<'a>,
    plan: GeometryPlan,
    seen_ids: FxHashSet<String>,
}

impl Planner<'_, '_> {
    fn skip(&mut self, geometry: &Geometry, error: Error) {
        self.plan.diagnostics.push(Diagnostic {
            gml_id: geometry.id.clone(),
            error,
        });
    }

    fn transform(&self) -> Option<&AffineTransform> {
        if self.options.implicit {
            None
        } else {
            self.options.transform
        }
    }

    fn push_node(&mut self, geometry: &Geometry, parent: Option<usize>, class: GeometryClass, reverse: bool) -> usize {
        let mut gml_id = geometry.id.clone();
        if let Some(id) = &gml_id {
            if !self.seen_ids.insert(id.clone()) {
                self.plan.diagnostics.push(Diagnostic {
                    gml_id: Some(id.clone()),
                    error: Error::unsupported(format!("duplicate gml:id {} within one geometry", id)),
                });
                gml_id = None;
            }
        }
        self.plan.nodes.push(PlannedNode {
            gml_id,
            parent,
            class,
            flags: class.flags(),
            is_reverse: reverse,
            payload: None,
            solid_deferred: false,
        });
        self.plan.nodes.len() - 1
    }

    fn push_link(&mut self, target: &str, parent: Option<usize>, reverse: bool, role: MemberRole, from_copy: bool) {
        self.plan.links.push(PlannedLink {
            target: citydb_import_core::strip_fragment(target).to_string(),
            parent,
            reverse,
            target_kind: if role.expects_solid() {
                LinkTarget::Solid
            } else {
                LinkTarget::Surface
            },
            from_copy,
        });
    }

    fn visit_member(&mut self, member: &Member, parent: Option<usize>, reverse: bool, role: MemberRole) {
        match member {
            Member::Inline(child) => self.visit(child, parent, reverse, role),
            Member::Href(href) => self.push_link(href, parent, reverse, role, false),
        }
    }

    fn visit(&mut self, geometry: &Geometry, parent: Option<usize>, reverse: bool, role: MemberRole) {
        // A copy of geometry imported elsewhere is linked, not re-inserted.
        if geometry.is_copy {
            if let Some(id) = &geometry.id {
                self.push_link(id, parent, reverse, role, true);
                return;
            }
        }

        let class = match classify(&geometry.kind) {
            Ok(class) => class,
            Err(e) => return self.skip(geometry, e),
        };
        if !role.accepts(class) {
            return self.skip(
                geometry,
                Error::unsupported(format!("{} is not allowed here", geometry.type_name())),
            );
        }

        match &geometry.kind {
            GeometryKind::Polygon(polygon) => {
                let prepared = match prepare_polygon(polygon, self.transform(), reverse) {
                    Ok(p) => p,
                    Err(e) => return self.skip(geometry, e),
                };
                for (_, e) in prepared.dropped_interiors {
                    self.skip(geometry, e);
                }
                let index = self.push_node(geometry, parent, class, reverse);
                if self.options.collect_ring_ids {
                    let ring_ids = polygon
                        .exterior
                        .iter()
                        .chain(polygon.interior.iter())
                        .filter_map(|r| r.id.clone());
                    for ring_id in ring_ids {
                        self.plan.ring_ids.push((ring_id, index));
                    }
                }
                self.plan.nodes[index].payload = Some(if self.options.implicit {
                    Payload::Implicit(prepared.payload)
                } else {
                    Payload::Explicit(prepared.payload)
                });
            }

            GeometryKind::OrientableSurface(wrapper) => {
                self.visit_wrapper(geometry, &wrapper.base, wrapper.orientation, parent, reverse, &[]);
            }
            GeometryKind::TexturedSurface(wrapper) => {
                self.visit_wrapper(
                    geometry,
                    &wrapper.base,
                    wrapper.orientation,
                    parent,
                    reverse,
                    &wrapper.material_refs,
                );
            }

            GeometryKind::Solid(solid) => {
                let Some(exterior) = &solid.exterior else {
                    return self.skip(geometry, Error::unsupported("Solid without exterior shell"));
                };
                if !solid.interior.is_empty() {
                    self.skip(
                        geometry,
                        Error::unsupported(format!(
                            "{} interior shell(s) of Solid are not supported",
                            solid.interior.len()
                        )),
                    );
                }
                let index = self.push_node(geometry, parent, class, reverse);
                let links_before = self.plan.links.len();
                self.visit_member(exterior, Some(index), reverse, MemberRole::Surface);

                // The solid payload is only computed for the insertion root.
                if index == 0 {
                    if self.plan.links.len() > links_before {
                        self.plan.nodes[index].solid_deferred = true;
                    } else {
                        let polygons: Vec<PolygonPayload> = self.plan.nodes[index + 1..]
                            .iter()
                            .filter_map(|n| n.payload.as_ref().and_then(Payload::polygon))
                            .cloned()
                            .collect();
                        if polygons.is_empty() {
                            self.skip(geometry, Error::DegeneratePolygon("Solid has no valid exterior polygons".into()));
                        } else {
                            self.plan.nodes[index].payload =
                                Some(Payload::Solid(SolidPayload::new(polygons)));
                        }
                    }
                }
            }

            kind => {
                // Remaining classes are pure containers.
                let members = kind.members().unwrap_or(&[]);
                let child_role = class.member_role().unwrap_or(MemberRole::Any);
                let index = self.push_node(geometry, parent, class, reverse);
                for member in members {
                    self.visit_member(member, Some(index), reverse, child_role);
                }
            }
        }
    }

    fn visit_wrapper(
        &mut self,
        geometry: &Geometry,
        base: &Member,
        orientation: Orientation,
        parent: Option<usize>,
        reverse: bool,
        material_refs: &[String],
    ) {
        let negative = orientation.is_negative();

        let nodes_before = self.plan.nodes.len();
        let links_before = self.plan.links.len();
        // A wrapped wrapper keeps the same slot; a genuine base takes a new id.
        self.visit_member(base, parent, reverse ^ negative, MemberRole::Surface);

        let target = if self.plan.nodes.len() > nodes_before {
            Some((AliasTarget::Node(nodes_before), reverse))
        } else if let Some(link) = self.plan.links.get(links_before) {
            Some((AliasTarget::Href(link.target.clone()), link.reverse ^ reverse))
        } else {
            None
        };

        let Some((target, alias_reverse)) = target else {
            return self.skip(geometry, Error::unsupported("orientation wrapper without a valid base surface"));
        };

        for material in material_refs {
            self.plan.materials.push(PlannedMaterial {
                surface: target.clone(),
                material: citydb_import_core::strip_fragment(material).to_string(),
            });
        }

        if let Some(id) = &geometry.id {
            self.plan.aliases.push(PlannedAlias {
                gml_id: id.clone(),
                target,
                negative,
                reverse: alias_reverse,
            });
        }
    }
}
