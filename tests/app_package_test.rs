use std::io::Read;

use flate2::read::GzDecoder;
use marqo_index_core::app_package::AppPackage;
use marqo_index_core::field::{DistanceMetric, FieldDescriptor, FieldFeature, FieldType, HnswConfig};
use marqo_index_core::index_descriptor::{IndexDescriptor, IndexType, ModelSpec};
use marqo_index_core::schema_gen::generate_schema;
use tar::Archive;

fn read_tar_entry(tarball: &[u8], path: &str) -> Option<String> {
    let decoder = GzDecoder::new(tarball);
    let mut archive = Archive::new(decoder);
    for entry in archive.entries().expect("tar entries") {
        let mut entry = entry.expect("tar entry");
        let entry_path = entry.path().expect("entry path").to_string_lossy().to_string();
        if entry_path == path || entry_path == format!("./{path}") {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).expect("read entry");
            return Some(contents);
        }
    }
    None
}

#[test]
fn bootstrap_then_add_index_produces_a_deployable_package() {
    let dir = tempfile::tempdir().unwrap();
    let mut pkg = AppPackage::construct_from_directory(dir.path(), "marqo").expect("construct fresh package");
    assert!(pkg.get_config().is_none());
    assert!(pkg.need_bootstrapping("2.12.0", None, false).unwrap());

    pkg.bootstrap("2.12.0", vec![]).unwrap();
    assert_eq!(pkg.get_config().unwrap().version, "2.12.0");
    assert_eq!(pkg.services.marqo_chain_searcher_count(), 1);

    let descriptor = IndexDescriptor::new(
        "products",
        IndexType::Structured,
        ModelSpec { name: "ViT-L-14".into(), dimension: 768 },
        DistanceMetric::Angular,
        HnswConfig::default(),
        vec![FieldDescriptor::new("title", FieldType::Text, [FieldFeature::LexicalSearch, FieldFeature::Filter]).unwrap()],
        vec![],
        0,
    )
    .unwrap();
    let schema_text = generate_schema(&descriptor);
    let saved = pkg.add_index_and_schema(descriptor, schema_text.clone()).unwrap();

    assert!(pkg.has_index("products"));
    assert!(pkg.has_schema(&saved.schema_name));
    assert!(pkg.services.has_schema(&saved.schema_name));

    pkg.save_to_disk().unwrap();

    let reloaded = AppPackage::construct_from_directory(dir.path(), "marqo").unwrap();
    assert!(reloaded.has_index("products"));
    assert_eq!(reloaded.schemas.get(&saved.schema_name).unwrap(), &schema_text);
    assert_eq!(reloaded.get_config().unwrap().version, "2.12.0");

    let tarball = pkg.to_gzip_tar().unwrap();
    assert!(!tarball.is_empty());
    let services_xml = read_tar_entry(&tarball, "services.xml").expect("services.xml present in tarball");
    assert!(services_xml.contains("ai.marqo.search.HybridSearcher"));
    let schema_in_tar = read_tar_entry(&tarball, &format!("schemas/{}.sd", saved.schema_name)).expect("schema file present in tarball");
    assert!(schema_in_tar.contains("field title type string"));
}

#[test]
fn deleting_an_index_opens_a_schema_removal_override_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut pkg = AppPackage::construct_from_directory(dir.path(), "marqo").unwrap();
    pkg.bootstrap("2.12.0", vec![]).unwrap();

    let descriptor = IndexDescriptor::new(
        "products",
        IndexType::Unstructured,
        ModelSpec { name: "ViT-L-14".into(), dimension: 512 },
        DistanceMetric::Angular,
        HnswConfig::default(),
        vec![],
        vec![],
        0,
    )
    .unwrap();
    let schema_text = generate_schema(&descriptor);
    let saved = pkg.add_index_and_schema(descriptor, schema_text).unwrap();
    pkg.save_to_disk().unwrap();

    pkg.delete_index_and_schema("products").unwrap();
    assert!(!pkg.has_index("products"));
    assert!(!pkg.has_schema(&saved.schema_name));
    assert!(!pkg.services.has_schema(&saved.schema_name));

    pkg.save_to_disk().unwrap();
    let overrides_path = dir.path().join("validation-overrides.xml");
    let overrides = std::fs::read_to_string(&overrides_path).expect("validation-overrides.xml written");
    assert!(overrides.contains("schema-removal"));
}

#[test]
fn deleting_an_unknown_index_does_not_touch_the_package() {
    let dir = tempfile::tempdir().unwrap();
    let mut pkg = AppPackage::construct_from_directory(dir.path(), "marqo").unwrap();
    pkg.bootstrap("2.12.0", vec![]).unwrap();
    let err = pkg.delete_index_and_schema("ghost").unwrap_err();
    assert!(matches!(err, marqo_index_core::CoreError::IndexNotFound(_)));
}
