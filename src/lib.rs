//! Media Plan Schema Core
//!
//! Versioned schemas for media plan documents: a registry of known schema
//! versions, a validator that reports every problem in a plan at once, and a
//! migrator that moves plans between versions one step at a time.
//!
//! ## Features
//!
//! - **Numeric Versions**: `v<major>.<minor>.<patch>` ordered by component
//! - **Collected Validation**: errors come back as data, never as the first failure
//! - **Checked Migrations**: every migrated plan is validated against its target
//! - **Declarative Steps**: renames, defaults and conversions with derived downgrades
//! - **Checksums**: SHA256 of every loaded definition
//!
//! ## Architecture
//!
//! ```text
//! SchemaManager
//! ├── SchemaRegistry    definitions/v0.0.0, definitions/v1.0.0, ...
//! ├── SchemaValidator   Document + SchemaDefinition -> ValidationResult
//! └── SchemaMigrator    MigrationStep chain, validated result
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use mediaplan_schema::{Document, SchemaManager};
//!
//! # fn main() -> mediaplan_schema::Result<()> {
//! let manager = SchemaManager::new();
//! let plan = Document::from_value(serde_json::json!({
//!     "meta": { "schema_version": "v0.0.0" }
//! }))?;
//!
//! let errors = manager.validate(&plan, None)?;
//! for error in &errors {
//!     println!("{error}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod codec;
pub mod compatibility;
pub mod config;
pub mod definition;
pub mod document;
pub mod error;
pub mod manager;
pub mod migration;
pub mod registry;
pub mod validator;
pub mod version;

pub use checksum::Checksum;
pub use codec::{DocumentCodec, JsonCodec};
pub use compatibility::{MigrationRecommendation, RecommendedAction, VersionCompatibility};
pub use config::SchemaConfig;
pub use definition::{CrossFieldConstraint, SchemaComponent, SchemaDefinition};
pub use document::{Document, FieldPath};
pub use error::{MigrationError, Result, SchemaError, TransformError};
pub use manager::SchemaManager;
pub use migration::{Conversion, FieldRule, MigrationPath, MigrationStep, SchemaMigrator};
pub use registry::SchemaRegistry;
pub use validator::{SchemaValidator, ValidationError, ValidationErrorKind, ValidationResult};
pub use version::SchemaVersion;
