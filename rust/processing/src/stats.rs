// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Import counters

use std::collections::BTreeMap;

use serde::Serialize;

use crate::deferred::ResolverStats;

/// Counters of an import job, merged from all workers.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Imported features per feature type name
    pub features_by_type: BTreeMap<String, usize>,
    pub geometry_nodes: usize,
    /// Geometries (or parts of them) skipped as invalid or unsupported
    pub skipped_geometries: usize,
    pub implicit_created: usize,
    pub implicit_reused: usize,
    pub links_queued: usize,
    /// References found in the UID cache while importing
    pub links_resolved_locally: usize,
    pub resolver: ResolverStats,
}

impl ImportStats {
    pub fn features(&self) -> usize {
        self.features_by_type.values().sum()
    }

    pub fn count_feature(&mut self, type_name: &str) {
        *self.features_by_type.entry(type_name.to_string()).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &ImportStats) {
        for (name, count) in &other.features_by_type {
            *self.features_by_type.entry(name.clone()).or_insert(0) += count;
        }
        self.geometry_nodes += other.geometry_nodes;
        self.skipped_geometries += other.skipped_geometries;
        self.implicit_created += other.implicit_created;
        self.implicit_reused += other.implicit_reused;
        self.links_queued += other.links_queued;
        self.links_resolved_locally += other.links_resolved_locally;
        self.resolver.resolved += other.resolver.resolved;
        self.resolver.unresolved += other.resolver.unresolved;
        self.resolver.already_claimed += other.resolver.already_claimed;
        self.resolver.copied_nodes += other.resolver.copied_nodes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut a = ImportStats::default();
        a.count_feature("Building");
        a.geometry_nodes = 3;
        let mut b = ImportStats::default();
        b.count_feature("Building");
        b.count_feature("Room");
        b.geometry_nodes = 2;
        b.resolver.resolved = 4;
        a.merge(&b);
        assert_eq!(a.features(), 3);
        assert_eq!(a.features_by_type["Building"], 2);
        assert_eq!(a.geometry_nodes, 5);
        assert_eq!(a.resolver.resolved, 4);
    }
}
