// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use approx::assert_relative_eq;
use citydb_import_core::{
    Feature, FeatureType, Geometry, ImplicitGeometry, Member, Orientation,
};
use citydb_import_geometry::{count_demand, Payload, PlanOptions, PolygonPayload};
use citydb_import_processing::{
    AffineTransform, GeometryNode, ImportConfig, ImportJob, ImportServices, Importer,
    MemoryStorage, PendingLink, Storage, Value, XlinkResolver,
};

fn config() -> ImportConfig {
    ImportConfig {
        worker_threads: 2,
        features_per_task: 1,
        ..Default::default()
    }
}

fn square(z: f64) -> Vec<f64> {
    vec![
        0.0, 0.0, z, 1.0, 0.0, z, 1.0, 1.0, z, 0.0, 1.0, z, 0.0, 0.0, z,
    ]
}

fn polygon(id: &str, z: f64) -> Member {
    Member::inline(Geometry::polygon(square(z)).with_id(id))
}

fn rows_by_root(rows: &[GeometryNode], root: i64) -> Vec<GeometryNode> {
    rows.iter().filter(|r| r.root_id == root).cloned().collect()
}

fn explicit(node: &GeometryNode) -> &PolygonPayload {
    match &node.payload {
        Some(Payload::Explicit(p)) => p,
        other => panic!("expected explicit payload, got {:?}", other),
    }
}

#[test]
fn test_consumed_ids_equal_demand() {
    let tree = Geometry::multi_surface(vec![
        polygon("a", 0.0),
        Member::inline(Geometry::orientable(
            Orientation::Negative,
            Member::inline(Geometry::composite_surface(vec![polygon("b", 1.0), polygon("c", 2.0)])),
        )),
        Member::href("#remote"),
        // Too few points, skipped without consuming an id
        Member::inline(Geometry::polygon(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0])),
    ]);
    let demand = count_demand(&tree, &PlanOptions::default());
    assert_eq!(demand, 5);

    let storage = Arc::new(MemoryStorage::new());
    let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
    let mut importer = Importer::new(Arc::clone(&services));
    let root = importer.insert_geometry(&tree, None).unwrap().unwrap();
    importer.flush_all().unwrap();

    let rows = storage.geometry_rows();
    assert_eq!(rows.len(), demand);
    let mut ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (root..root + demand as i64).collect::<Vec<_>>());
    assert_eq!(services.queue.len(), 1);
}

#[test]
fn test_payload_round_trip_with_transform() {
    let storage = Arc::new(MemoryStorage::new());
    let job = ImportJob::new(
        storage.clone(),
        ImportConfig {
            transform: Some(AffineTransform::translation(100.0, 200.0, 0.5)),
            ..config()
        },
    );
    let feature = Feature::new(FeatureType::LandUse)
        .with_id("lu")
        .with_geometry("lod1MultiSurface", Member::inline(Geometry::multi_surface(vec![polygon("p", 3.0)])));
    job.run(&[feature]).unwrap();

    let rows = storage.geometry_rows();
    let node = rows.iter().find(|r| r.gml_id.as_deref() == Some("p")).unwrap();
    let (wkt, solid, implicit) = node.payload_columns();
    assert!(solid.is_none() && implicit.is_none());
    let decoded = PolygonPayload::from_wkt(&wkt.unwrap()).unwrap();
    let expected = square(3.0);
    let exterior = decoded.exterior().unwrap();
    assert_eq!(exterior.len(), 5);
    for (point, source) in exterior.iter().zip(expected.chunks(3)) {
        assert_relative_eq!(point.x, source[0] + 100.0);
        assert_relative_eq!(point.y, source[1] + 200.0);
        assert_relative_eq!(point.z, source[2] + 0.5);
    }
}

#[test]
fn test_local_reference_produces_no_pending_link() {
    let storage = Arc::new(MemoryStorage::new());
    let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
    let mut importer = Importer::new(Arc::clone(&services));

    let first = Feature::new(FeatureType::GenericCityObject)
        .with_id("g1")
        .with_geometry("lod2Geometry", polygon("shared_poly", 0.0));
    let second = Feature::new(FeatureType::GenericCityObject)
        .with_id("g2")
        .with_geometry("lod2Geometry", Member::href("#shared_poly"));
    importer.import_feature(&first).unwrap();
    importer.import_feature(&second).unwrap();
    importer.flush_all().unwrap();

    assert!(services.queue.is_empty());
    let rows = storage.feature_rows("generic_cityobject");
    assert_eq!(rows[0].get("lod2_brep_id"), rows[1].get("lod2_brep_id"));

    let third = Feature::new(FeatureType::GenericCityObject)
        .with_geometry("lod2Geometry", Member::href("#nowhere"));
    importer.import_feature(&third).unwrap();
    let queued = services.queue.drain();
    assert_eq!(queued.len(), 1);
    assert!(matches!(&queued[0].link, PendingLink::SurfaceGeometry { target, .. } if target == "nowhere"));
}

#[test]
fn test_orientation_reverses_every_ring() {
    let storage = Arc::new(MemoryStorage::new());
    let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
    let mut importer = Importer::new(services);

    let plain = Geometry::multi_surface(vec![Member::inline(Geometry::composite_surface(vec![
        polygon("a1", 0.0),
        polygon("a2", 1.0),
    ]))]);
    let flipped = Geometry::multi_surface(vec![Member::inline(Geometry::orientable(
        Orientation::Negative,
        Member::inline(Geometry::composite_surface(vec![polygon("b1", 0.0), polygon("b2", 1.0)])),
    ))]);
    let plain_root = importer.insert_geometry(&plain, None).unwrap().unwrap();
    let flipped_root = importer.insert_geometry(&flipped, None).unwrap().unwrap();
    importer.flush_all().unwrap();

    let rows = storage.geometry_rows();
    let plain = rows_by_root(&rows, plain_root);
    let flipped = rows_by_root(&rows, flipped_root);
    assert_eq!(plain.len(), flipped.len());
    for (a, b) in plain.iter().zip(&flipped) {
        // Same structure
        assert_eq!(a.parent_id.map(|p| p - plain_root), b.parent_id.map(|p| p - flipped_root));
        assert_eq!(a.flags(), b.flags());
        match (&a.payload, &b.payload) {
            (None, None) => {}
            _ => assert_eq!(explicit(a).reversed(), *explicit(b)),
        }
    }
    assert!(flipped[1..].iter().all(|r| r.is_reverse));
    assert!(!flipped[0].is_reverse);
}

#[test]
fn test_solid_with_external_surface_is_assembled_after_resolution() {
    let storage = Arc::new(MemoryStorage::new());
    let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
    let mut importer = Importer::new(Arc::clone(&services));

    let with_solid = Feature::new(FeatureType::Building).with_id("b1").with_geometry(
        "lod2Solid",
        Member::inline(
            Geometry::solid(Member::inline(Geometry::composite_surface(vec![
                polygon("own", 0.0),
                Member::href("#wall_of_b2"),
            ])))
            .with_id("solid"),
        ),
    );
    importer.import_feature(&with_solid).unwrap();
    importer.flush_all().unwrap();

    let solid = storage
        .geometry_rows()
        .into_iter()
        .find(|r| r.gml_id.as_deref() == Some("solid"))
        .unwrap();
    assert!(solid.is_solid);
    assert_eq!(solid.payload, None);
    assert_eq!(
        storage.feature_rows("building")[0].get("lod2_solid_id"),
        Some(&Value::Int(solid.id))
    );

    let neighbour = Feature::new(FeatureType::Building)
        .with_id("b2")
        .with_geometry("lod2MultiSurface", Member::inline(Geometry::multi_surface(vec![polygon("wall_of_b2", 5.0)])));
    importer.import_feature(&neighbour).unwrap();
    importer.flush_all().unwrap();

    let stats = XlinkResolver::new(storage.as_ref(), &services.uid_cache)
        .run(&services.queue)
        .unwrap();
    assert_eq!(stats.resolved, 2);
    assert_eq!(stats.copied_nodes, 1);

    let rows = storage.geometry_rows();
    let copy = rows
        .iter()
        .find(|r| r.is_xlink)
        .expect("referenced polygon copied into the shell");
    assert_eq!(copy.root_id, solid.id);
    match storage.geometry_node(solid.id).unwrap().and_then(|n| n.payload) {
        Some(Payload::Solid(payload)) => assert_eq!(payload.polygons.len(), 2),
        other => panic!("solid payload missing: {:?}", other),
    }
}

#[test]
fn test_only_insertion_root_is_owned_by_feature() {
    let storage = Arc::new(MemoryStorage::new());
    let job = ImportJob::new(storage.clone(), config());
    let feature = Feature::new(FeatureType::Building).with_id("b1").with_geometry(
        "lod2MultiSurface",
        Member::inline(Geometry::multi_surface(vec![polygon("w1", 0.0), polygon("w2", 1.0)])),
    );
    job.run(&[feature]).unwrap();

    let building = storage.city_objects()[0].id;
    let rows = storage.geometry_rows();
    assert_eq!(rows.len(), 3);
    let (roots, children): (Vec<_>, Vec<_>) = rows.iter().partition(|r| r.parent_id.is_none());
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].cityobject_id, Some(building));
    assert_eq!(
        storage.feature_rows("building")[0].get("lod2_multi_surface_id"),
        Some(&Value::Int(roots[0].id))
    );
    assert!(children.iter().all(|r| r.cityobject_id.is_none()));
}

#[test]
fn test_copied_subtree_includes_nested_reference() {
    let storage = Arc::new(MemoryStorage::new());
    let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
    let mut importer = Importer::new(Arc::clone(&services));

    // a -> cs_b, and cs_b itself waits on pc
    let a = Feature::new(FeatureType::GenericCityObject).with_id("a").with_geometry(
        "lod1Geometry",
        Member::inline(Geometry::multi_surface(vec![Member::href("#cs_b")])),
    );
    let b = Feature::new(FeatureType::GenericCityObject).with_id("b").with_geometry(
        "lod1Geometry",
        Member::inline(Geometry::multi_surface(vec![Member::inline(
            Geometry::composite_surface(vec![polygon("b1", 0.0), Member::href("#pc")]).with_id("cs_b"),
        )])),
    );
    let c = Feature::new(FeatureType::GenericCityObject)
        .with_id("c")
        .with_geometry("lod1Geometry", polygon("pc", 2.0));
    for feature in [&a, &b, &c] {
        importer.import_feature(feature).unwrap();
    }
    importer.flush_all().unwrap();
    assert_eq!(services.queue.len(), 2);

    let stats = XlinkResolver::new(storage.as_ref(), &services.uid_cache)
        .run(&services.queue)
        .unwrap();
    assert_eq!(stats.resolved, 2);
    assert_eq!(stats.unresolved, 0);

    let a_root = match storage.feature_rows("generic_cityobject")[0].get("lod1_brep_id") {
        Some(Value::Int(id)) => *id,
        other => panic!("lod1_brep_id missing: {:?}", other),
    };
    let tree = rows_by_root(&storage.geometry_rows(), a_root);
    assert_eq!(tree.len(), 4);
    let pc = tree
        .iter()
        .find(|r| r.gml_id.as_deref() == Some("pc"))
        .expect("nested reference copied along with cs_b");
    assert!(pc.is_xlink);
    let cs_b = tree.iter().find(|r| r.gml_id.as_deref() == Some("cs_b")).unwrap();
    assert_eq!(pc.parent_id, Some(cs_b.id));
}

#[test]
fn test_prototype_reference_before_definition() {
    let storage = Arc::new(MemoryStorage::new());
    let services = Arc::new(ImportServices::new(storage.clone(), ImportConfig::default()));
    let mut importer = Importer::new(Arc::clone(&services));

    let referencing = Feature::new(FeatureType::CityFurniture)
        .with_id("bench_1")
        .with_implicit("lod2ImplicitRepresentation", ImplicitGeometry::relative(Member::href("#proto")));
    let defining = Feature::new(FeatureType::CityFurniture).with_id("bench_2").with_implicit(
        "lod2ImplicitRepresentation",
        ImplicitGeometry::relative(Member::inline(
            Geometry::multi_surface(vec![polygon("seat", 0.0)]).with_id("proto"),
        ))
        .at([5.0, 0.0, 0.0]),
    );
    importer.import_feature(&referencing).unwrap();
    importer.import_feature(&defining).unwrap();
    importer.flush_all().unwrap();

    let rows = storage.geometry_rows();
    assert_eq!(rows.len(), 2);
    let implicit = storage.implicit_rows();
    assert_eq!(implicit.len(), 1);
    let prototype = rows.iter().find(|r| r.gml_id.as_deref() == Some("proto")).unwrap();
    assert_eq!(implicit[0].relative_brep_id, Some(prototype.id));

    let stats = XlinkResolver::new(storage.as_ref(), &services.uid_cache)
        .run(&services.queue)
        .unwrap();
    assert_eq!(stats.unresolved, 0);
    assert_eq!(storage.implicit_rows()[0].relative_brep_id, Some(prototype.id));
    assert!(storage
        .feature_rows("city_furniture")
        .iter()
        .all(|r| r.get("lod2_implicit_rep_id") == Some(&Value::Int(implicit[0].id))));
}

#[test]
fn test_circular_reference_is_skipped() {
    let storage = Arc::new(MemoryStorage::new());
    let job = ImportJob::new(storage.clone(), config());
    let feature = Feature::new(FeatureType::GenericCityObject).with_geometry(
        "lod1Geometry",
        Member::inline(
            Geometry::multi_surface(vec![polygon("p", 0.0), Member::href("#self_ms")]).with_id("self_ms"),
        ),
    );
    let stats = job.run(&[feature]).unwrap();
    assert_eq!(stats.resolver.unresolved, 1);
    assert_eq!(stats.resolver.copied_nodes, 0);
    assert_eq!(storage.geometry_rows().len(), 2);
}

#[test]
fn test_library_object_loaded_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tree.3ds"), b"3ds-bytes").unwrap();

    let storage = Arc::new(MemoryStorage::new());
    let job = ImportJob::new(
        storage.clone(),
        ImportConfig {
            library_base_dir: Some(dir.path().to_path_buf()),
            ..config()
        },
    );
    let features: Vec<Feature> = (0..8)
        .map(|i| {
            Feature::new(FeatureType::CityFurniture)
                .with_id(format!("tree_{}", i))
                .with_implicit(
                    "lod2ImplicitRepresentation",
                    ImplicitGeometry::library("tree.3ds").at([i as f64, 0.0, 0.0]),
                )
        })
        .collect();
    let stats = job.run(&features).unwrap();

    let implicit = storage.implicit_rows();
    assert_eq!(implicit.len(), 1);
    assert_eq!(implicit[0].library_object.as_deref(), Some(&b"3ds-bytes"[..]));
    assert_eq!(stats.implicit_created, 1);
    assert_eq!(stats.implicit_reused, 7);

    let rows = storage.feature_rows("city_furniture");
    assert_eq!(rows.len(), 8);
    assert!(rows
        .iter()
        .all(|r| r.get("lod2_implicit_rep_id") == Some(&Value::Int(implicit[0].id))));
    assert!(rows
        .iter()
        .any(|r| r.get("lod2_implicit_ref_point") == Some(&Value::Point([3.0, 0.0, 0.0]))));
}

#[test]
fn test_features_from_json() {
    let json = r##"[
        {
            "id": "bldg_1",
            "type": "Building",
            "attributes": { "measuredHeight": { "value": 9.5, "uom": "m" } },
            "geometries": [
                {
                    "name": "lod2MultiSurface",
                    "member": { "inline": {
                        "type": "multi_surface",
                        "members": [
                            { "inline": {
                                "id": "roof",
                                "type": "polygon",
                                "exterior": { "coordinates": [0.0, 0.0, 9.0, 1.0, 0.0, 9.0, 1.0, 1.0, 9.0, 0.0, 0.0, 9.0] }
                            } }
                        ]
                    } }
                }
            ],
            "children": [
                { "type": "RoofSurface", "geometries": [
                    { "name": "lod2MultiSurface", "member": { "href": "#roof" } }
                ] }
            ]
        }
    ]"##;
    let features: Vec<Feature> = serde_json::from_str(json).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let stats = ImportJob::new(storage.clone(), config()).run(&features).unwrap();

    assert_eq!(stats.features(), 2);
    assert_eq!(stats.links_resolved_locally, 1);
    let building = &storage.feature_rows("building")[0];
    assert_eq!(building.get("measured_height"), Some(&Value::Double(9.5)));
    let roof = &storage.feature_rows("thematic_surface")[0];
    assert_eq!(roof.get("building_id"), Some(&Value::Int(building.id)));
    assert!(roof.get("lod2_multi_surface_id").and_then(Value::as_id).is_some());

    let report = serde_json::to_value(&stats).unwrap();
    assert_eq!(report["features_by_type"]["Building"], 1);
}
