//! Schema Registry
//!
//! Owns every known [`SchemaVersion`] and its [`SchemaDefinition`]. Loading is
//! eager: all definitions are read, resolved and parsed when the registry is
//! built, and nothing is re-read afterwards, so one instance can be shared
//! freely (`Arc<SchemaRegistry>`) for the life of a session.
//!
//! Definitions come from one of three places:
//! - the definitions bundled into the crate (`definitions/` at build time)
//! - a directory laid out as `<dir>/v<maj>.<min>.<patch>/*.json`
//! - definitions already built in memory

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use include_dir::{include_dir, Dir};
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::definition::{SchemaDefinition, ROOT_SCHEMA_FILE};
use crate::error::{Result, SchemaError};
use crate::version::SchemaVersion;

static BUNDLED_DEFINITIONS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/definitions");

/// Where a registry's definitions were loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    Bundled,
    Directory(PathBuf),
    InMemory,
}

/// The set of registered schema versions
#[derive(Debug)]
pub struct SchemaRegistry {
    definitions: BTreeMap<SchemaVersion, SchemaDefinition>,
    current: SchemaVersion,
    source: RegistrySource,
}

impl SchemaRegistry {
    /// Load the definitions shipped with the crate
    pub fn bundled() -> Result<Self> {
        let mut versions = BTreeMap::new();
        for dir in BUNDLED_DEFINITIONS.dirs() {
            let name = dir.path().to_string_lossy();
            let version = SchemaVersion::parse(&name).map_err(|_| {
                SchemaError::Registry(format!("bundled directory '{name}' is not a version"))
            })?;

            let mut files = BTreeMap::new();
            for file in dir.files() {
                let Some(file_name) = file.path().file_name() else {
                    continue;
                };
                let file_name = file_name.to_string_lossy().into_owned();
                if !file_name.ends_with(".json") {
                    continue;
                }
                files.insert(file_name.clone(), parse_json(&file_name, file.contents())?);
            }
            versions.insert(version, files);
        }
        Self::from_version_files(versions, RegistrySource::Bundled)
    }

    /// Load every `v<maj>.<min>.<patch>` subdirectory of `dir`
    ///
    /// Subdirectories whose name is not a version, or that lack the root
    /// definition file, are skipped with a warning.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(SchemaError::Registry(format!(
                "definitions directory {} does not exist",
                dir.display()
            )));
        }

        let mut versions: BTreeMap<SchemaVersion, BTreeMap<String, Value>> = BTreeMap::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| SchemaError::Registry(err.to_string()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Ok(version) = SchemaVersion::parse(&name) else {
                warn!(directory = %entry.path().display(), "Skipping non-version directory");
                continue;
            };
            if !entry.path().join(ROOT_SCHEMA_FILE).is_file() {
                warn!(
                    directory = %entry.path().display(),
                    "Skipping version directory without {ROOT_SCHEMA_FILE}"
                );
                continue;
            }
            versions.insert(version, read_version_dir(entry.path())?);
        }
        Self::from_version_files(versions, RegistrySource::Directory(dir.to_path_buf()))
    }

    /// Build from definitions constructed in memory
    pub fn from_definitions(definitions: impl IntoIterator<Item = SchemaDefinition>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for definition in definitions {
            let version = definition.version().clone();
            if map.insert(version.clone(), definition).is_some() {
                return Err(SchemaError::Registry(format!(
                    "version {version} is defined more than once"
                )));
            }
        }
        Self::finish(map, RegistrySource::InMemory)
    }

    fn from_version_files(
        versions: BTreeMap<SchemaVersion, BTreeMap<String, Value>>,
        source: RegistrySource,
    ) -> Result<Self> {
        let mut definitions = BTreeMap::new();
        for (version, files) in versions {
            let definition = SchemaDefinition::from_files(version.clone(), &files)?;
            debug!(
                version = %version,
                checksum = %definition.checksum().short(12),
                "Loaded schema definition"
            );
            definitions.insert(version, definition);
        }
        Self::finish(definitions, source)
    }

    fn finish(definitions: BTreeMap<SchemaVersion, SchemaDefinition>, source: RegistrySource) -> Result<Self> {
        let current = definitions
            .keys()
            .next_back()
            .cloned()
            .ok_or_else(|| SchemaError::Registry("no schema definitions found".to_string()))?;
        debug!(count = definitions.len(), current = %current, source = ?source, "Schema registry ready");
        Ok(Self {
            definitions,
            current,
            source,
        })
    }

    pub fn source(&self) -> &RegistrySource {
        &self.source
    }

    /// The highest registered version
    pub fn get_current_version(&self) -> &SchemaVersion {
        &self.current
    }

    /// All registered versions, ascending
    pub fn get_supported_versions(&self) -> Vec<SchemaVersion> {
        self.definitions.keys().cloned().collect()
    }

    pub fn is_version_supported(&self, version: &SchemaVersion) -> bool {
        self.definitions.contains_key(version)
    }

    /// Fail with `VersionNotFound` unless `version` is registered
    pub fn assert_version_supported(&self, version: &SchemaVersion) -> Result<()> {
        if self.is_version_supported(version) {
            Ok(())
        } else {
            Err(self.not_found(&version.tag_string()))
        }
    }

    /// Parse and look up a version string
    pub fn resolve(&self, version: &str) -> Result<SchemaVersion> {
        let parsed = SchemaVersion::parse(version)?;
        self.assert_version_supported(&parsed)?;
        Ok(parsed)
    }

    pub fn get_definition(&self, version: &SchemaVersion) -> Result<&SchemaDefinition> {
        self.definitions
            .get(version)
            .ok_or_else(|| self.not_found(&version.tag_string()))
    }

    /// Every definition, ascending by version
    pub fn definitions(&self) -> impl Iterator<Item = &SchemaDefinition> {
        self.definitions.values()
    }

    /// The registered version directly above `version`
    pub fn next_version(&self, version: &SchemaVersion) -> Option<&SchemaVersion> {
        use std::ops::Bound::{Excluded, Unbounded};
        self.definitions
            .range::<SchemaVersion, _>((Excluded(version), Unbounded))
            .next()
            .map(|(v, _)| v)
    }

    /// The registered version directly below `version`
    pub fn previous_version(&self, version: &SchemaVersion) -> Option<&SchemaVersion> {
        self.definitions
            .range::<SchemaVersion, _>(..version)
            .next_back().map(|(v, _)| v)
    }

    fn not_found(&self, version: &str) -> SchemaError {
        SchemaError::VersionNotFound {
            version: version.to_string(),
            supported: self
                .definitions
                .keys()
                .map(SchemaVersion::tag_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn read_version_dir(dir: &Path) -> Result<BTreeMap<String, Value>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| SchemaError::Registry(err.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let bytes = fs::read(path)?;
        files.insert(name, parse_json(&path.display().to_string(), &bytes)?);
    }
    Ok(files)
}

fn parse_json(name: &str, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|err| SchemaError::Registry(format!("malformed definition file {name}: {err}")))
}
