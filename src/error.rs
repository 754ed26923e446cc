//! Error types for the media plan schema core

use std::path::PathBuf;

use thiserror::Error;

use crate::validator::ValidationResult;
use crate::version::SchemaVersion;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema core errors
///
/// Validation problems in a document are never reported through this type;
/// they come back as a [`ValidationResult`]. Everything here is a
/// configuration or programming defect and is raised immediately.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema version '{version}' is not supported. Supported versions: {supported}")]
    VersionNotFound { version: String, supported: String },

    #[error("Invalid schema version '{0}': expected v<major>.<minor>.<patch>")]
    InvalidVersion(String),

    #[error("Unknown schema version - cannot validate: document has no meta.schema_version")]
    MissingVersion,

    #[error("Schema registry error: {0}")]
    Registry(String),

    #[error("Schema version {version} has no component '{component}'. Available: {available}")]
    UnknownComponent {
        component: String,
        version: SchemaVersion,
        available: String,
    },

    #[error("Schema migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Failed to read media plan file {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    #[error("Cannot decode media plan: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    /// Whether this error means a referenced version is unknown or malformed
    pub fn is_version_error(&self) -> bool {
        matches!(
            self,
            SchemaError::VersionNotFound { .. } | SchemaError::InvalidVersion(_)
        )
    }
}

/// Errors raised while registering or running migrations
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("No migration step registered from {from} to {to}")]
    MissingStep { from: SchemaVersion, to: SchemaVersion },

    #[error("Migration step {from} -> {to} is not reversible")]
    NotReversible { from: SchemaVersion, to: SchemaVersion },

    #[error("Error during migration from {from} to {to}: {source}")]
    StepFailed {
        from: SchemaVersion,
        to: SchemaVersion,
        #[source]
        source: TransformError,
    },

    #[error("Migrated document does not validate against {version}: {}", .errors.summary())]
    InvalidResult {
        version: SchemaVersion,
        errors: ValidationResult,
    },

    #[error("Invalid migration step {from} -> {to}: {reason}")]
    Registration {
        from: SchemaVersion,
        to: SchemaVersion,
        reason: String,
    },
}

/// Failure of a single step transformation over a document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Field '{0}' is not an object")]
    NotAnObject(String),

    #[error("Cannot rename '{from}': target field '{to}' already exists")]
    TargetExists { from: String, to: String },

    #[error("Cannot convert field '{path}': {reason}")]
    Unconvertible { path: String, reason: String },

    #[error("Invalid field path '{0}'")]
    InvalidPath(String),

    #[error("{0}")]
    Custom(String),
}
