//! The on-disk application package: the files-on-disk view of everything the
//! backend needs to converge on — `services.xml`, the versioned index
//! settings journal, generated schemas, the default query profile, and the
//! custom-component bundle. Every mutating operation here is followed by
//! [`AppPackage::save_to_disk`], which writes each owned file atomically
//! (write-to-temp, then rename) into the package's working directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{event, Level};

use crate::error::{CoreError, Result};
use crate::index_descriptor::IndexDescriptor;
use crate::services_manifest::ServicesManifest;
use crate::settings_store::{IndexSettingRecord, SettingsStore};

const SERVICES_FILE: &str = "services.xml";
const CONFIG_FILE: &str = "marqo_config.json";
const SCHEMAS_DIR: &str = "schemas";
const COMPONENTS_DIR: &str = "components";
const QUERY_PROFILE_PATH: &str = "search/query-profiles/default.xml";
const VALIDATION_OVERRIDES_FILE: &str = "validation-overrides.xml";
const DEFAULT_LEGACY_VERSION: &str = "2.0.0";

/// The jar bundles this package is responsible for positioning on every
/// bootstrap refresh. Their bytes are produced by an external build
/// pipeline (out of scope per the purpose/scope boundary); this crate only
/// owns the delete-then-recreate directory dance and, absent real bytes
/// from that pipeline, writes an empty placeholder so the file the
/// canonical `services.xml` references always exists on disk.
const KNOWN_COMPONENT_BUNDLES: &[&str] = &["marqo-custom-components.jar"];

/// Process/package-level configuration: minimally a semver version string.
/// Absence (`AppPackage::config` is `None`) indicates a pre-bootstrap or
/// legacy package. Extra fields round-trip through `#[serde(flatten)]` so a
/// newer writer's additions survive a read-modify-write by an older one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MarqoConfig {
    pub version: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// The files-on-disk view of a deployed application: `services.xml`, the
/// optional package config, the index-settings journal, generated schema
/// text keyed by schema name, and any transient validation-overrides
/// content pending its next save.
pub struct AppPackage {
    pub root: PathBuf,
    pub config: Option<MarqoConfig>,
    pub settings_store: SettingsStore,
    pub services: ServicesManifest,
    pub schemas: HashMap<String, String>,
    validation_overrides: Option<String>,
}

impl AppPackage {
    /// Reads an existing package directory. A missing `services.xml` is
    /// treated as a fresh/never-deployed package and seeded with the
    /// minimal skeleton rather than failing; a missing `marqo_config.json`
    /// simply leaves `config` as `None` (pre-bootstrap or legacy package).
    pub fn construct_from_directory(root: impl Into<PathBuf>, content_cluster_id: &str) -> Result<Self> {
        let root = root.into();

        let services_path = root.join(SERVICES_FILE);
        let services = if services_path.exists() {
            ServicesManifest::from_str(&fs::read_to_string(&services_path)?)?
        } else {
            ServicesManifest::default_skeleton(content_cluster_id)
        };

        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.exists() { Some(serde_json::from_str(&fs::read_to_string(&config_path)?)?) } else { None };

        let settings_store = SettingsStore::load_from_disk(&root)?;

        let schemas_dir = root.join(SCHEMAS_DIR);
        let mut schemas = HashMap::new();
        if schemas_dir.exists() {
            for entry in fs::read_dir(&schemas_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("sd") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        schemas.insert(stem.to_string(), fs::read_to_string(&path)?);
                    }
                }
            }
        }

        let validation_overrides_path = root.join(VALIDATION_OVERRIDES_FILE);
        let validation_overrides = if validation_overrides_path.exists() { Some(fs::read_to_string(&validation_overrides_path)?) } else { None };

        Ok(Self { root, config, settings_store, services, schemas, validation_overrides })
    }

    pub fn get_config(&self) -> Option<&MarqoConfig> {
        self.config.as_ref()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.settings_store.get(name).is_some()
    }

    pub fn has_schema(&self, schema_name: &str) -> bool {
        self.schemas.contains_key(schema_name)
    }

    /// Writes every file this package owns into `root`, atomically per
    /// file. The components directory is not rewritten here: it is only
    /// refreshed by [`Self::bootstrap`], since its contents come from an
    /// external build pipeline rather than from in-memory state.
    pub fn save_to_disk(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        atomic_write(&self.root.join(SERVICES_FILE), self.services.to_xml_string()?.as_bytes())?;
        if let Some(cfg) = &self.config {
            atomic_write(&self.root.join(CONFIG_FILE), serde_json::to_string_pretty(cfg)?.as_bytes())?;
        }
        self.settings_store.save_to_disk(&self.root)?;
        for (schema_name, text) in &self.schemas {
            atomic_write(&self.root.join(SCHEMAS_DIR).join(format!("{schema_name}.sd")), text.as_bytes())?;
        }
        if let Some(overrides) = &self.validation_overrides {
            atomic_write(&self.root.join(VALIDATION_OVERRIDES_FILE), overrides.as_bytes())?;
        }
        Ok(())
    }

    /// Resolves the deployed version in priority order: the package's own
    /// `marqo_config.json`, then a supplied legacy config document, then the
    /// default `2.0.0`.
    fn deployed_version(&self, legacy_config: Option<&Value>) -> String {
        if let Some(cfg) = &self.config {
            return cfg.version.clone();
        }
        if let Some(legacy) = legacy_config {
            if let Some(v) = legacy.get("version").and_then(|v| v.as_str()) {
                return v.to_string();
            }
        }
        DEFAULT_LEGACY_VERSION.to_string()
    }

    /// True when `marqo_version` is newer than the resolved deployed
    /// version, or older and `allow_downgrade` is set. Monotone in
    /// `marqo_version` when `allow_downgrade` is false.
    pub fn need_bootstrapping(&self, marqo_version: &str, legacy_config: Option<&Value>, allow_downgrade: bool) -> Result<bool> {
        let deployed_str = self.deployed_version(legacy_config);
        let deployed = semver::Version::parse(&deployed_str).map_err(|e| CoreError::Internal(format!("invalid deployed version '{deployed_str}': {e}")))?;
        let new = semver::Version::parse(marqo_version).map_err(|e| CoreError::Internal(format!("invalid marqo version '{marqo_version}': {e}")))?;
        Ok(new > deployed || (new < deployed && allow_downgrade))
    }

    fn write_default_query_profile(&self) -> Result<()> {
        let xml = "<query-profile id=\"default\">\n  <field name=\"maxHits\">1000</field>\n  <field name=\"maxOffset\">10000</field>\n</query-profile>\n";
        atomic_write(&self.root.join(QUERY_PROFILE_PATH), xml.as_bytes())
    }

    fn refresh_components_dir(&self) -> Result<()> {
        let dir = self.root.join(COMPONENTS_DIR);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        for name in KNOWN_COMPONENT_BUNDLES {
            atomic_write(&dir.join(name), &[])?;
        }
        Ok(())
    }

    /// Version-gated install/upgrade: if the package was never configured
    /// and legacy index records were supplied, ingests them through the
    /// settings store starting at version 1 (their original version numbers
    /// are discarded — see DESIGN.md); writes the default query profile;
    /// refreshes the component bundle directory; canonicalizes the services
    /// manifest's container block; stamps the config version.
    pub fn bootstrap(&mut self, marqo_version: &str, existing_index_records: Vec<IndexSettingRecord>) -> Result<()> {
        let previously_configured = self.config.is_some();
        if !previously_configured {
            for mut record in existing_index_records {
                record.version = 0;
                let saved = self.settings_store.save(record)?;
                event!(Level::INFO, index = %saved.name, "ingested legacy index record at bootstrap");
            }
        }

        self.write_default_query_profile()?;
        self.refresh_components_dir()?;
        self.services.config_components()?;

        match &mut self.config {
            Some(cfg) => cfg.version = marqo_version.to_string(),
            None => self.config = Some(MarqoConfig { version: marqo_version.to_string(), extra: serde_json::Map::new() }),
        }
        event!(Level::INFO, version = %marqo_version, "application package bootstrapped");
        Ok(())
    }

    /// Version-checks and records `record` through the settings store, then
    /// writes `schema_text` under `schemas/` and registers the schema in
    /// the services manifest.
    pub fn add_index_and_schema(&mut self, record: IndexDescriptor, schema_text: String) -> Result<IndexSettingRecord> {
        let saved = self.settings_store.save(record)?;
        self.schemas.insert(saved.schema_name.clone(), schema_text);
        self.services.add_schema(&saved.schema_name)?;
        Ok(saved)
    }

    /// Fails if `name` is unknown; otherwise removes it from the settings
    /// store, deletes its schema file, unregisters it from the services
    /// manifest, and stamps a validation-overrides file permitting
    /// `schema-removal` through end of the current UTC day.
    pub fn delete_index_and_schema(&mut self, name: &str) -> Result<()> {
        let record = self.settings_store.get(name).cloned().ok_or_else(|| CoreError::IndexNotFound(name.to_string()))?;
        self.settings_store.delete(name);
        self.schemas.remove(&record.schema_name);
        self.services.remove_schema(&record.schema_name)?;
        self.stamp_schema_removal_override();
        event!(Level::WARN, index = %name, schema = %record.schema_name, "schema removal override window opened");
        Ok(())
    }

    /// Stamps the transient validation-overrides content. The "end of
    /// current UTC day" window is hard to pin down exactly (see SPEC_FULL
    /// open questions / DESIGN.md); this records the override for today's
    /// UTC date, Vespa's `allow until=` attribute being day-granular.
    fn stamp_schema_removal_override(&mut self) {
        let today = OffsetDateTime::now_utc().date();
        let until = format!("{:04}-{:02}-{:02}", today.year(), u8::from(today.month()), today.day());
        self.validation_overrides = Some(format!("<validation-overrides>\n  <allow until=\"{until}\">schema-removal</allow>\n</validation-overrides>\n"));
    }

    /// Packs the package root into a gzipped tarball, the wire format the
    /// deploy endpoint's `prepareandactivate` expects.
    pub fn to_gzip_tar(&self) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", &self.root)?;
        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DistanceMetric, FieldDescriptor, FieldFeature, FieldType, HnswConfig};
    use crate::index_descriptor::{IndexType, ModelSpec};

    fn descriptor(name: &str, version: u32) -> IndexDescriptor {
        IndexDescriptor::new(
            name,
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            vec![FieldDescriptor::new("t", FieldType::Text, [FieldFeature::LexicalSearch]).unwrap()],
            vec![],
            version,
        )
        .unwrap()
    }

    fn empty_package(root: &Path) -> AppPackage {
        AppPackage { root: root.to_path_buf(), config: None, settings_store: SettingsStore::new(), services: ServicesManifest::default_skeleton("marqo"), schemas: HashMap::new(), validation_overrides: None }
    }

    #[test]
    fn need_bootstrapping_true_when_new_version_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        pkg.config = Some(MarqoConfig { version: "2.10.0".into(), extra: Default::default() });
        assert!(pkg.need_bootstrapping("2.12.0", None, false).unwrap());
        assert!(!pkg.need_bootstrapping("2.10.0", None, false).unwrap());
        assert!(!pkg.need_bootstrapping("2.9.0", None, false).unwrap());
        assert!(pkg.need_bootstrapping("2.9.0", None, true).unwrap());
    }

    #[test]
    fn need_bootstrapping_falls_back_to_legacy_then_default() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = empty_package(dir.path());
        let legacy = serde_json::json!({"version": "1.5.0"});
        assert!(pkg.need_bootstrapping("2.0.0", Some(&legacy), false).unwrap());
        assert!(!pkg.need_bootstrapping("2.0.0", None, false).unwrap());
    }

    #[test]
    fn bootstrap_upgrade_preserves_legacy_records_and_stamps_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        pkg.config = Some(MarqoConfig { version: "2.10.0".into(), extra: Default::default() });
        assert!(pkg.need_bootstrapping("2.12.0", None, false).unwrap());

        pkg.bootstrap("2.12.0", vec![]).unwrap();
        assert_eq!(pkg.get_config().unwrap().version, "2.12.0");
        assert_eq!(pkg.services.marqo_chain_searcher_count(), 1);
    }

    #[test]
    fn bootstrap_ingests_legacy_records_starting_at_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        let legacy = descriptor("legacy-idx", 7);
        pkg.bootstrap("2.12.0", vec![legacy]).unwrap();
        assert_eq!(pkg.settings_store.get("legacy-idx").unwrap().version, 1);
    }

    #[test]
    fn add_then_delete_index_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        let d = descriptor("products", 0);
        let saved = pkg.add_index_and_schema(d, "schema products_1 {}".into()).unwrap();
        assert!(pkg.has_index("products"));
        assert!(pkg.has_schema(&saved.schema_name));
        assert!(pkg.services.has_schema(&saved.schema_name));

        pkg.delete_index_and_schema("products").unwrap();
        assert!(!pkg.has_index("products"));
        assert!(!pkg.has_schema(&saved.schema_name));
        assert!(pkg.validation_overrides.is_some());
    }

    #[test]
    fn delete_unknown_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        let err = pkg.delete_index_and_schema("ghost").unwrap_err();
        assert!(matches!(err, CoreError::IndexNotFound(_)));
    }

    #[test]
    fn save_and_reload_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        let d = descriptor("products", 0);
        pkg.add_index_and_schema(d, "schema products_1 {}".into()).unwrap();
        pkg.save_to_disk().unwrap();

        let reloaded = AppPackage::construct_from_directory(dir.path(), "marqo").unwrap();
        assert!(reloaded.has_index("products"));
        assert!(reloaded.schemas.values().any(|s| s.contains("products_1")));
    }

    #[test]
    fn gzip_tar_packs_package_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut pkg = empty_package(dir.path());
        pkg.bootstrap("2.12.0", vec![]).unwrap();
        pkg.save_to_disk().unwrap();
        let tarball = pkg.to_gzip_tar().unwrap();
        assert!(!tarball.is_empty());
    }
}
