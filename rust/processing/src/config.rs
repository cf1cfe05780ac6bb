// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Import configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use citydb_import_geometry::AffineTransform;
use tracing::warn;

/// How gml:ids are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GmlIdMode {
    /// Keep the document's ids
    Keep,
    /// Replace every id with `prefix` followed by a random UUID. The original
    /// id is still used to resolve references.
    Replace { prefix: String },
}

/// Import configuration.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Pending rows per writer kind before an automatic flush.
    pub batch_size: usize,
    pub gml_id_mode: GmlIdMode,
    /// Affine transformation applied to explicit coordinates.
    pub transform: Option<AffineTransform>,
    /// Import appearances and correlate texture coordinates.
    pub import_appearance: bool,
    /// Maximum wait for the resolution lock of one shared geometry.
    pub lock_timeout: Duration,
    /// Number of worker threads for parallel import.
    pub worker_threads: usize,
    /// Top-level features handed to one worker at a time.
    pub features_per_task: usize,
    /// Base directory of relative library-object URIs.
    pub library_base_dir: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            gml_id_mode: GmlIdMode::Keep,
            transform: None,
            import_appearance: true,
            lock_timeout: Duration::from_millis(30_000),
            worker_threads: num_cpus::get(),
            features_per_task: 64,
            library_base_dir: None,
        }
    }
}

impl ImportConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a variable lookup function.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let gml_id_mode = match var("CITYDB_GMLID_MODE").as_deref().map(str::trim) {
            Some(mode) if mode.eq_ignore_ascii_case("replace") => GmlIdMode::Replace {
                prefix: var("CITYDB_GMLID_PREFIX").unwrap_or_else(|| "UUID_".into()),
            },
            Some(mode) if !mode.eq_ignore_ascii_case("keep") => {
                warn!(mode = %mode, "Unknown gml:id mode, keeping original ids");
                GmlIdMode::Keep
            }
            _ => GmlIdMode::Keep,
        };

        let transform = var("CITYDB_AFFINE").and_then(|text| match AffineTransform::parse(&text) {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(error = %e, "Ignoring invalid affine transformation");
                None
            }
        });

        Self {
            batch_size: var("CITYDB_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.batch_size),
            gml_id_mode,
            transform,
            import_appearance: var("CITYDB_IMPORT_APPEARANCE")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.import_appearance),
            lock_timeout: var("CITYDB_LOCK_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            worker_threads: var("CITYDB_WORKER_THREADS")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.worker_threads),
            features_per_task: var("CITYDB_FEATURES_PER_TASK")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.features_per_task),
            library_base_dir: var("CITYDB_LIBRARY_DIR").map(PathBuf::from),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ImportConfig::from_lookup(lookup(&[]));
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.gml_id_mode, GmlIdMode::Keep);
        assert!(config.transform.is_none());
        assert!(config.import_appearance);
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = ImportConfig::from_lookup(lookup(&[
            ("CITYDB_BATCH_SIZE", "20"),
            ("CITYDB_GMLID_MODE", "replace"),
            ("CITYDB_AFFINE", "1,0,0,5,0,1,0,0,0,0,1,0"),
            ("CITYDB_IMPORT_APPEARANCE", "off"),
            ("CITYDB_LOCK_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.batch_size, 20);
        assert_eq!(
            config.gml_id_mode,
            GmlIdMode::Replace {
                prefix: "UUID_".into()
            }
        );
        assert!(config.transform.is_some());
        assert!(!config.import_appearance);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ImportConfig::from_lookup(lookup(&[
            ("CITYDB_BATCH_SIZE", "0"),
            ("CITYDB_AFFINE", "1,2,3"),
            ("CITYDB_GMLID_MODE", "shuffle"),
        ]));
        assert_eq!(config.batch_size, 1000);
        assert!(config.transform.is_none());
        assert_eq!(config.gml_id_mode, GmlIdMode::Keep);
    }
}
