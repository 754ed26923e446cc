//! Schema manager
//!
//! The one entry point the workspace and storage layers talk to. A manager
//! owns one registry, one validator and one migrator; each is built on
//! first use and then reused for the life of the manager.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use crate::codec::{DocumentCodec, JsonCodec};
use crate::compatibility::{MigrationRecommendation, VersionCompatibility};
use crate::config::SchemaConfig;
use crate::document::Document;
use crate::error::{Result, SchemaError};
use crate::migration::SchemaMigrator;
use crate::registry::SchemaRegistry;
use crate::validator::{SchemaValidator, ValidationResult};
use crate::version::SchemaVersion;

#[derive(Debug, Clone)]
enum RegistrySpec {
    Bundled,
    Directory(PathBuf),
    Ready(Arc<SchemaRegistry>),
}

/// Facade over registry, validator and migrator
pub struct SchemaManager {
    spec: RegistrySpec,
    check_constraints: bool,
    codec: Arc<dyn DocumentCodec>,
    registry: OnceCell<Arc<SchemaRegistry>>,
    validator: OnceCell<SchemaValidator>,
    migrator: OnceCell<SchemaMigrator>,
}

impl SchemaManager {
    /// A manager over the bundled definitions
    pub fn new() -> Self {
        Self::with_spec(RegistrySpec::Bundled)
    }

    /// A manager over an already loaded registry
    ///
    /// Only the bundled migration steps whose versions it contains are
    /// registered; use [`with_migrator`](Self::with_migrator) for custom steps.
    pub fn with_registry(registry: Arc<SchemaRegistry>) -> Self {
        Self::with_spec(RegistrySpec::Ready(registry))
    }

    /// A manager over definitions in `dir`
    pub fn from_directory(dir: impl Into<PathBuf>) -> Self {
        Self::with_spec(RegistrySpec::Directory(dir.into()))
    }

    pub fn from_config(config: &SchemaConfig) -> Self {
        let spec = match config.definitions_dir() {
            Some(dir) => RegistrySpec::Directory(dir),
            None => RegistrySpec::Bundled,
        };
        let mut manager = Self::with_spec(spec);
        manager.check_constraints = config.validation.check_constraints;
        manager
    }

    /// A manager around a fully configured migrator
    pub fn with_migrator(migrator: SchemaMigrator) -> Self {
        let registry = Arc::clone(migrator.registry());
        let manager = Self::with_spec(RegistrySpec::Ready(Arc::clone(&registry)));
        // Fresh cells, so these sets cannot fail
        let _ = manager.registry.set(registry);
        let _ = manager.validator.set(migrator.validator().clone());
        let _ = manager.migrator.set(migrator);
        manager
    }

    fn with_spec(spec: RegistrySpec) -> Self {
        Self {
            spec,
            check_constraints: true,
            codec: Arc::new(JsonCodec::new()),
            registry: OnceCell::new(),
            validator: OnceCell::new(),
            migrator: OnceCell::new(),
        }
    }

    /// Decode files for [`validate_file`](Self::validate_file) with `codec`
    pub fn with_codec(mut self, codec: Arc<dyn DocumentCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn registry(&self) -> Result<&Arc<SchemaRegistry>> {
        self.registry.get_or_try_init(|| {
            let registry = match &self.spec {
                RegistrySpec::Bundled => SchemaRegistry::bundled()?,
                RegistrySpec::Directory(dir) => SchemaRegistry::from_directory(dir)?,
                RegistrySpec::Ready(registry) => return Ok(Arc::clone(registry)),
            };
            debug!(source = ?registry.source(), "Schema registry loaded");
            Ok(Arc::new(registry))
        })
    }

    pub fn validator(&self) -> Result<&SchemaValidator> {
        self.validator.get_or_try_init(|| {
            Ok(SchemaValidator::new(Arc::clone(self.registry()?))
                .with_codec(Arc::clone(&self.codec))
                .check_constraints(self.check_constraints))
        })
    }

    pub fn migrator(&self) -> Result<&SchemaMigrator> {
        self.migrator
            .get_or_try_init(|| SchemaMigrator::bundled(self.validator()?.clone()))
    }

    pub fn get_current_version(&self) -> Result<SchemaVersion> {
        Ok(self.registry()?.get_current_version().clone())
    }

    /// Registered versions, ascending
    pub fn get_supported_versions(&self) -> Result<Vec<SchemaVersion>> {
        Ok(self.registry()?.get_supported_versions())
    }

    pub fn validate(&self, document: &Document, version: Option<&SchemaVersion>) -> Result<ValidationResult> {
        self.validator()?.validate(document, version)
    }

    pub fn validate_file(&self, path: impl AsRef<Path>, version: Option<&SchemaVersion>) -> Result<ValidationResult> {
        self.validator()?.validate_file(path, version)
    }

    /// Validate one entity (`campaign`, `lineitem`) on its own
    pub fn validate_component(
        &self,
        value: &Value,
        component: &str,
        version: Option<&SchemaVersion>,
    ) -> Result<ValidationResult> {
        self.validator()?.validate_component(value, component, version)
    }

    /// The resolved JSON Schema of one component, of `version` or the
    /// current version
    pub fn get_schema(&self, component: &str, version: Option<&SchemaVersion>) -> Result<Value> {
        let registry = self.registry()?;
        let version = version.unwrap_or_else(|| registry.get_current_version());
        let definition = registry.get_definition(version)?;
        definition
            .component(component)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| SchemaError::UnknownComponent {
                component: component.to_string(),
                version: version.clone(),
                available: definition.component_names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Every component's resolved JSON Schema, keyed by component name
    pub fn get_all_schemas(&self, version: Option<&SchemaVersion>) -> Result<BTreeMap<String, Value>> {
        let registry = self.registry()?;
        let version = version.unwrap_or_else(|| registry.get_current_version());
        Ok(registry
            .get_definition(version)?
            .components()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.schema.clone()))
            .collect())
    }

    /// Migrate to `to`, or to the current version
    pub fn migrate(
        &self,
        document: &Document,
        from: &SchemaVersion,
        to: Option<&SchemaVersion>,
    ) -> Result<Document> {
        self.migrator()?.migrate(document, from, to)
    }

    pub fn compatibility(&self, version: &SchemaVersion) -> Result<VersionCompatibility> {
        Ok(VersionCompatibility::classify(version, self.registry()?))
    }

    /// What an importer should do with a plan written against `version`
    pub fn recommendation(&self, version: &SchemaVersion) -> Result<MigrationRecommendation> {
        let registry = self.registry()?;
        let current = registry.get_current_version();
        let compatibility = VersionCompatibility::classify(version, registry);
        let recommendation = MigrationRecommendation::new(version, current, compatibility);

        let needs_path = matches!(
            compatibility,
            VersionCompatibility::BackwardCompatible | VersionCompatibility::Deprecated
        );
        if needs_path && !self.migrator()?.can_migrate(version, current) {
            return Ok(recommendation.reject(format!("no migration path to {current}")));
        }
        Ok(recommendation)
    }
}

impl Default for SchemaManager {
    fn default() -> Self {
        Self::new()
    }
}
