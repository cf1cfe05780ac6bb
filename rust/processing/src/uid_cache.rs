// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UID cross-reference cache
//!
//! Process-wide map from document ids (gml:ids, library URIs) to the numeric
//! ids they were written with. Shared by all import workers.
//!
//! The first registration of a key wins. A later registration of the same
//! key with a different id is rejected and logged, and references keep
//! resolving to the first definition.

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Maximum alias chain followed when resolving a geometry reference.
const MAX_ALIAS_DEPTH: usize = 32;

/// What an entry stands for. Keys of different kinds never collide, except
/// that geometry and geometry aliases share one key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UidKind {
    Geometry,
    /// Orientation wrapper pointing at another geometry by gml:id
    GeometryAlias,
    Feature,
    Implicit,
    SurfaceData,
    /// Ring id, mapped to its polygon
    Ring,
}

impl UidKind {
    fn space(self) -> UidKind {
        match self {
            Self::GeometryAlias => Self::Geometry,
            other => other,
        }
    }
}

/// A cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidEntry {
    pub id: i64,
    pub root_id: i64,
    /// For geometry: whether the stored rows are the reverse of this id's
    /// own definition. For aliases: whether this id is the reverse of the
    /// aliased definition.
    pub reverse: bool,
    /// Alias target (aliases), stored gml:id when replaced (geometry),
    /// table name (features)
    pub mapping: Option<String>,
    pub kind: UidKind,
}

impl UidEntry {
    pub fn geometry(id: i64, root_id: i64, reverse: bool) -> Self {
        Self {
            id,
            root_id,
            reverse,
            mapping: None,
            kind: UidKind::Geometry,
        }
    }

    pub fn alias(target: impl Into<String>, reverse: bool) -> Self {
        Self {
            id: 0,
            root_id: 0,
            reverse,
            mapping: Some(target.into()),
            kind: UidKind::GeometryAlias,
        }
    }

    pub fn of(kind: UidKind, id: i64) -> Self {
        Self {
            id,
            root_id: id,
            reverse: false,
            mapping: None,
            kind,
        }
    }

    pub fn with_mapping(mut self, mapping: impl Into<String>) -> Self {
        self.mapping = Some(mapping.into());
        self
    }
}

/// A geometry reference resolved to stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGeometry {
    pub id: i64,
    pub root_id: i64,
    /// Whether the stored rows must be reversed to obtain the referenced
    /// definition.
    pub reverse: bool,
}

/// Outcome of following a geometry reference through the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryLookup {
    Found(ResolvedGeometry),
    /// Alias chain ends at an id the cache does not know; `reverse` is the
    /// accumulated flip relative to that id's definition.
    Unknown { gml_id: String, reverse: bool },
    /// Alias chain loops back on itself
    Cycle,
}

#[derive(Default)]
pub struct UidCache {
    entries: RwLock<FxHashMap<(UidKind, String), UidEntry>>,
    /// Sequence numbers of links being resolved. Bounded by the queue size
    /// and emptied again by [`UidCache::release_claims`].
    claims: Mutex<FxHashSet<u64>>,
}

impl UidCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert `entry` under `key` unless the key is taken.
    ///
    /// Returns `true` when the entry was inserted or an identical one was
    /// already present.
    pub fn put(&self, key: &str, entry: UidEntry) -> bool {
        let space = entry.kind.space();
        let mut entries = self.entries.write();
        match entries.get(&(space, key.to_string())) {
            Some(existing) if *existing == entry => true,
            Some(existing) => {
                warn!(
                    gml_id = %key,
                    kind = ?entry.kind,
                    kept = existing.id,
                    rejected = entry.id,
                    "Duplicate gml:id, keeping the first definition"
                );
                false
            }
            None => {
                entries.insert((space, key.to_string()), entry);
                true
            }
        }
    }

    pub fn get(&self, kind: UidKind, key: &str) -> Option<UidEntry> {
        self.entries
            .read()
            .get(&(kind.space(), key.to_string()))
            .cloned()
    }

    pub fn id(&self, kind: UidKind, key: &str) -> Option<i64> {
        self.get(kind, key).map(|e| e.id)
    }

    /// Follow a geometry reference through aliases to stored rows.
    pub fn resolve_geometry(&self, gml_id: &str) -> GeometryLookup {
        let entries = self.entries.read();
        let mut key = gml_id.to_string();
        let mut reverse = false;
        let mut seen: FxHashSet<String> = FxHashSet::default();

        for _ in 0..MAX_ALIAS_DEPTH {
            if !seen.insert(key.clone()) {
                return GeometryLookup::Cycle;
            }
            match entries.get(&(UidKind::Geometry, key.clone())) {
                None => return GeometryLookup::Unknown { gml_id: key, reverse },
                Some(entry) => {
                    reverse ^= entry.reverse;
                    match (&entry.kind, &entry.mapping) {
                        (UidKind::GeometryAlias, Some(target)) => key = target.clone(),
                        _ => {
                            return GeometryLookup::Found(ResolvedGeometry {
                                id: entry.id,
                                root_id: entry.root_id,
                                reverse,
                            })
                        }
                    }
                }
            }
        }
        GeometryLookup::Cycle
    }

    /// Claim a deferred link for resolution. Only the first claim of a link
    /// succeeds.
    pub fn claim(&self, link_id: u64) -> bool {
        self.claims.lock().insert(link_id)
    }

    /// Forget the claims of links that were drained from the queue.
    pub fn release_claims(&self, link_ids: impl IntoIterator<Item = u64>) {
        let mut claims = self.claims.lock();
        for id in link_ids {
            claims.remove(&id);
        }
    }

    /// Number of links currently claimed.
    pub fn claimed(&self) -> usize {
        self.claims.lock().len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_first_writer_wins() {
        let cache = UidCache::new();
        assert!(cache.put("p1", UidEntry::geometry(1, 1, false)));
        assert!(cache.put("p1", UidEntry::geometry(1, 1, false)));
        assert!(!cache.put("p1", UidEntry::geometry(9, 9, false)));
        assert_eq!(cache.id(UidKind::Geometry, "p1"), Some(1));
    }

    #[test]
    fn test_kinds_are_separate() {
        let cache = UidCache::new();
        cache.put("x", UidEntry::of(UidKind::Feature, 5));
        cache.put("x", UidEntry::geometry(7, 7, false));
        assert_eq!(cache.id(UidKind::Feature, "x"), Some(5));
        assert_eq!(cache.id(UidKind::Geometry, "x"), Some(7));
        // aliases share the geometry key space
        assert!(!cache.put("x", UidEntry::alias("y", true)));
    }

    #[test]
    fn test_alias_chain_accumulates_reverse() {
        let cache = UidCache::new();
        cache.put("poly", UidEntry::geometry(3, 1, false));
        cache.put("neg", UidEntry::alias("poly", true));
        cache.put("negneg", UidEntry::alias("neg", true));
        assert_eq!(
            cache.resolve_geometry("neg"),
            GeometryLookup::Found(ResolvedGeometry {
                id: 3,
                root_id: 1,
                reverse: true
            })
        );
        match cache.resolve_geometry("negneg") {
            GeometryLookup::Found(r) => assert!(!r.reverse),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_alias_to_unknown_and_cycle() {
        let cache = UidCache::new();
        cache.put("w", UidEntry::alias("remote", true));
        assert_eq!(
            cache.resolve_geometry("w"),
            GeometryLookup::Unknown {
                gml_id: "remote".into(),
                reverse: true
            }
        );
        cache.put("a", UidEntry::alias("b", false));
        cache.put("b", UidEntry::alias("a", false));
        assert_eq!(cache.resolve_geometry("a"), GeometryLookup::Cycle);
    }

    #[test]
    fn test_claim_once_across_threads() {
        let cache = Arc::new(UidCache::new());
        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    s.spawn(move || cache.claim(42) as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_release_claims() {
        let cache = UidCache::new();
        assert!(cache.claim(1));
        assert!(cache.claim(2));
        cache.release_claims([1, 2, 3]);
        assert_eq!(cache.claimed(), 0);
        assert!(cache.claim(1));
    }
}
