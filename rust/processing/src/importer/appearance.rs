// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Appearances: materials and parameterized textures.

use citydb_import_core::{strip_fragment, Appearance, SurfaceDataKind};

use super::Importer;
use crate::deferred::PendingLink;
use crate::error::Result;
use crate::ids::IdBlock;
use crate::orchestrator::WriterKind;
use crate::rows::{AppearanceRow, RowBatch, SurfaceDataRow, TextureParamRow};
use crate::storage::Sequence;
use crate::uid_cache::{GeometryLookup, UidEntry, UidKind};

impl Importer {
    pub(crate) fn import_appearances(&mut self, appearances: &[Appearance], cityobject_id: i64) -> Result<()> {
        if appearances.is_empty() {
            return Ok(());
        }
        let storage = self.services.storage.as_ref();
        let mut appearance_ids = IdBlock::allocate(storage, Sequence::Appearance, appearances.len())?;
        let surface_data_count: usize = appearances.iter().map(|a| a.surface_data.len()).sum();
        let mut surface_data_ids = if surface_data_count > 0 {
            Some(IdBlock::allocate(storage, Sequence::SurfaceData, surface_data_count)?)
        } else {
            None
        };

        let mut appearance_rows = Vec::with_capacity(appearances.len());
        let mut surface_data_rows = Vec::with_capacity(surface_data_count);
        let mut params = Vec::new();

        for appearance in appearances {
            let appearance_id = appearance_ids.next()?;
            appearance_rows.push(AppearanceRow {
                id: appearance_id,
                gml_id: appearance.id.as_deref().map(|id| self.services.output_gml_id(id)),
                theme: appearance.theme.clone(),
                cityobject_id,
            });

            for surface_data in &appearance.surface_data {
                let Some(block) = surface_data_ids.as_mut() else {
                    break;
                };
                let id = block.next()?;
                if let Some(original) = &surface_data.id {
                    self.services
                        .uid_cache
                        .put(original, UidEntry::of(UidKind::SurfaceData, id));
                }
                let gml_id = surface_data.id.as_deref().map(|id| self.services.output_gml_id(id));

                match &surface_data.kind {
                    SurfaceDataKind::X3dMaterial {
                        diffuse_color,
                        transparency,
                        targets,
                    } => {
                        surface_data_rows.push(SurfaceDataRow {
                            id,
                            gml_id,
                            appearance_id,
                            is_texture: false,
                            diffuse_color: *diffuse_color,
                            transparency: *transparency,
                            image_uri: None,
                            mime_type: None,
                        });
                        for target in targets {
                            self.texture_target(&mut params, id, strip_fragment(target), false, false, None);
                        }
                    }
                    SurfaceDataKind::ParameterizedTexture {
                        image_uri,
                        mime_type,
                        targets,
                    } => {
                        surface_data_rows.push(SurfaceDataRow {
                            id,
                            gml_id,
                            appearance_id,
                            is_texture: true,
                            diffuse_color: None,
                            transparency: None,
                            image_uri: Some(image_uri.clone()),
                            mime_type: mime_type.clone(),
                        });
                        for target in targets {
                            if target.tex_coords.is_empty() {
                                self.texture_target(&mut params, id, strip_fragment(&target.uri), false, true, None);
                                continue;
                            }
                            for coords in &target.tex_coords {
                                self.texture_target(
                                    &mut params,
                                    id,
                                    strip_fragment(&coords.ring),
                                    true,
                                    true,
                                    Some(format_tex_coords(&coords.coordinates)),
                                );
                            }
                        }
                    }
                }
            }
        }

        self.orchestrator
            .push(WriterKind::Appearance, RowBatch::Appearance(appearance_rows))?;
        if !surface_data_rows.is_empty() {
            self.orchestrator
                .push(WriterKind::SurfaceData, RowBatch::SurfaceData(surface_data_rows))?;
        }
        if !params.is_empty() {
            self.orchestrator
                .push(WriterKind::TextureParam, RowBatch::TextureParam(params))?;
        }
        Ok(())
    }

    /// Link surface data to a surface, or to the polygon of a ring.
    fn texture_target(
        &mut self,
        params: &mut Vec<TextureParamRow>,
        surface_data_id: i64,
        target: &str,
        ring: bool,
        is_texture: bool,
        texture_coordinates: Option<String>,
    ) {
        let cache = &self.services.uid_cache;
        let surface = if ring {
            cache.id(UidKind::Ring, target)
        } else {
            match cache.resolve_geometry(target) {
                GeometryLookup::Found(found) => Some(found.id),
                _ => None,
            }
        };
        match surface {
            Some(surface_geometry_id) => {
                self.stats.links_resolved_locally += 1;
                params.push(TextureParamRow {
                    surface_geometry_id,
                    surface_data_id,
                    is_texture_parametrization: is_texture,
                    texture_coordinates,
                });
            }
            None => self.propagate(PendingLink::TextureParam {
                surface_data_id,
                target: target.to_string(),
                ring,
                is_texture,
                texture_coordinates,
            }),
        }
    }
}

/// `s t, s t, ...` from flat coordinates.
fn format_tex_coords(coordinates: &[f64]) -> String {
    coordinates
        .chunks(2)
        .map(|pair| pair.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use citydb_import_core::{
        Feature, FeatureType, Geometry, GeometryKind, LinearRing, Member, Polygon, SurfaceData,
        TexCoordList, TextureTarget,
    };

    use super::*;
    use crate::config::ImportConfig;
    use crate::importer::ImportServices;
    use crate::storage::MemoryStorage;

    fn textured_polygon() -> Geometry {
        Geometry::new(GeometryKind::Polygon(Polygon {
            exterior: Some(
                LinearRing::new(vec![
                    0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0,
                ])
                .with_id("ring_1"),
            ),
            interior: Vec::new(),
        }))
        .with_id("poly_1")
    }

    fn appearance() -> Appearance {
        Appearance {
            id: Some("app".into()),
            theme: Some("rgbTexture".into()),
            surface_data: vec![
                SurfaceData::material("mat", vec!["#poly_1".into(), "#missing".into()]),
                SurfaceData::texture(
                    "tex",
                    "facade.jpg",
                    vec![TextureTarget {
                        uri: "#poly_1".into(),
                        tex_coords: vec![TexCoordList {
                            ring: "#ring_1".into(),
                            coordinates: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0],
                        }],
                    }],
                ),
            ],
        }
    }

    #[test]
    fn test_targets_resolved_through_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
        let mut importer = Importer::new(Arc::clone(&services));
        let mut feature = Feature::new(FeatureType::GenericCityObject)
            .with_geometry("lod2Geometry", Member::inline(textured_polygon()));
        feature.appearances.push(appearance());
        importer.import_feature(&feature).unwrap();
        importer.flush_all().unwrap();

        assert_eq!(storage.appearances().len(), 1);
        let surface_data = storage.surface_data();
        assert_eq!(surface_data.len(), 2);
        let polygon = storage.geometry_rows()[0].id;

        let params = storage.texture_params();
        assert_eq!(params.len(), 2);
        let texture = params.iter().find(|p| p.is_texture_parametrization).unwrap();
        assert_eq!(texture.surface_geometry_id, polygon);
        assert_eq!(texture.texture_coordinates.as_deref(), Some("0 0, 1 0, 1 1, 0 0"));

        // The material's second target is unknown and waits for the resolver
        let queued = services.queue.drain();
        assert_eq!(queued.len(), 1);
        assert!(matches!(&queued[0].link, PendingLink::TextureParam { target, ring: false, .. } if target == "missing"));
    }

    #[test]
    fn test_appearance_import_disabled() {
        let storage = Arc::new(MemoryStorage::new());
        let config = ImportConfig {
            import_appearance: false,
            ..Default::default()
        };
        let services = Arc::new(ImportServices::new(storage.clone(), config));
        let mut importer = Importer::new(Arc::clone(&services));
        let mut feature = Feature::new(FeatureType::GenericCityObject)
            .with_geometry("lod2Geometry", Member::inline(textured_polygon()));
        feature.appearances.push(appearance());
        importer.import_feature(&feature).unwrap();
        importer.flush_all().unwrap();

        assert!(storage.appearances().is_empty());
        assert!(services.uid_cache.get(UidKind::Ring, "ring_1").is_none());
        assert!(services.queue.is_empty());
    }

    #[test]
    fn test_format_tex_coords() {
        assert_eq!(format_tex_coords(&[0.5, 0.25, 1.0, 0.0]), "0.5 0.25, 1 0");
    }
}
