//! Document validation
//!
//! Walks a document against a [`SchemaDefinition`] and collects every
//! violation in the order fields are checked. Validation never mutates the
//! document and never stops at the first problem. Only configuration defects
//! (unknown version, no version at all) are returned as errors.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{DocumentCodec, JsonCodec};
use crate::definition::{CrossFieldConstraint, FieldShape, SchemaDefinition};
use crate::document::{join_path, value_kind, Document};
use crate::error::{Result, SchemaError};
use crate::registry::SchemaRegistry;
use crate::version::SchemaVersion;

/// Path reported for the document itself
pub const ROOT_PATH: &str = "$";

/// What kind of rule a document broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingField,
    TypeMismatch,
    InvalidEnumValue,
    StructureMismatch,
    InvalidFormat,
    OutOfRange,
    UnexpectedField,
    ConstraintViolation,
}

impl ValidationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::TypeMismatch => "type_mismatch",
            Self::InvalidEnumValue => "invalid_enum_value",
            Self::StructureMismatch => "structure_mismatch",
            Self::InvalidFormat => "invalid_format",
            Self::OutOfRange => "out_of_range",
            Self::UnexpectedField => "unexpected_field",
            Self::ConstraintViolation => "constraint_violation",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One violation found in a document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// Dot/bracket path into the document, `$` for the root
    pub path: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Ordered violations of one validation pass; empty means valid
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.errors.iter()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    /// Errors of one kind, in order
    pub fn of_kind(&self, kind: ValidationErrorKind) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    /// `path: message` lines
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// One-line description for error messages
    pub fn summary(&self) -> String {
        match self.errors.len() {
            0 => "no errors".to_string(),
            n => format!("{n} error(s): {}", self.messages().join("; ")),
        }
    }

    pub fn push(&mut self, path: impl Into<String>, kind: ValidationErrorKind, message: impl Into<String>) {
        let path = path.into();
        self.errors.push(ValidationError {
            path: if path.is_empty() { ROOT_PATH.to_string() } else { path },
            kind,
            message: message.into(),
        });
    }
}

impl IntoIterator for ValidationResult {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationResult {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Validates documents against registered definitions
#[derive(Clone)]
pub struct SchemaValidator {
    registry: Arc<SchemaRegistry>,
    codec: Arc<dyn DocumentCodec>,
    check_constraints: bool,
}

impl SchemaValidator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            codec: Arc::new(JsonCodec::new()),
            check_constraints: true,
        }
    }

    /// Use a different codec for [`validate_file`](Self::validate_file)
    pub fn with_codec(mut self, codec: Arc<dyn DocumentCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Enable or disable cross-field constraints
    pub fn check_constraints(mut self, enabled: bool) -> Self {
        self.check_constraints = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &dyn DocumentCodec {
        self.codec.as_ref()
    }

    /// Validate against `version`, or the document's `meta.schema_version`
    pub fn validate(&self, document: &Document, version: Option<&SchemaVersion>) -> Result<ValidationResult> {
        let declared = document.schema_version();
        let version = match version {
            Some(version) => {
                match &declared {
                    Ok(Some(declared)) if declared != version => warn!(
                        declared = %declared,
                        requested = %version,
                        "Validating against a version other than the declared one"
                    ),
                    Err(err) => warn!(
                        requested = %version,
                        error = %err,
                        "Ignoring malformed declared schema version"
                    ),
                    _ => {}
                }
                version.clone()
            }
            None => declared?.ok_or(SchemaError::MissingVersion)?,
        };

        let definition = self.registry.get_definition(&version)?;
        let result = self.validate_definition(document, definition);
        debug!(version = %version, errors = result.len(), "Validated document");
        Ok(result)
    }

    /// Validate against a definition directly
    pub fn validate_definition(&self, document: &Document, definition: &SchemaDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();
        let root = Value::Object(document.to_mapping().clone());
        check_value(&root, definition.root(), "", &mut result);

        if self.check_constraints {
            for constraint in definition.constraints() {
                check_constraint(document, constraint, &mut result);
            }
        }
        result
    }

    /// Validate a single entity (`campaign`, `lineitem`) against one
    /// component of `version`, or of the current version when `None`
    ///
    /// Paths in the result are relative to `value`. Cross-field constraints
    /// belong to the whole plan and are not checked here.
    pub fn validate_component(
        &self,
        value: &Value,
        component: &str,
        version: Option<&SchemaVersion>,
    ) -> Result<ValidationResult> {
        let version = version.unwrap_or_else(|| self.registry.get_current_version());
        let definition = self.registry.get_definition(version)?;
        let entry = definition
            .component(component)
            .ok_or_else(|| SchemaError::UnknownComponent {
                component: component.to_string(),
                version: version.clone(),
                available: definition.component_names().collect::<Vec<_>>().join(", "),
            })?;

        let mut result = ValidationResult::new();
        check_value(value, &entry.shape, "", &mut result);
        debug!(version = %version, component, errors = result.len(), "Validated component");
        Ok(result)
    }

    /// Decode a file with the configured codec and validate it
    pub fn validate_file(&self, path: impl AsRef<Path>, version: Option<&SchemaVersion>) -> Result<ValidationResult> {
        let path = path.as_ref();
        debug!(path = %path.display(), codec = self.codec.name(), "Reading media plan");
        let document = self.codec.read_file(path)?;
        self.validate(&document, version)
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("current", self.registry.get_current_version())
            .field("codec", &self.codec.name())
            .field("check_constraints", &self.check_constraints)
            .finish()
    }
}

fn check_value(value: &Value, shape: &FieldShape, path: &str, result: &mut ValidationResult) {
    if !shape.accepts_type(value) {
        let kind = if shape.expects_container() || matches!(value, Value::Object(_) | Value::Array(_)) {
            ValidationErrorKind::StructureMismatch
        } else {
            ValidationErrorKind::TypeMismatch
        };
        result.push(
            path,
            kind,
            format!("Expected {}, found {}", shape.type_names(), value_kind(value)),
        );
        return;
    }

    if let Some(allowed) = &shape.enum_values {
        if !allowed.contains(value) {
            let allowed = allowed.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
            result.push(
                path,
                ValidationErrorKind::InvalidEnumValue,
                format!("Value {value} is not one of: {allowed}"),
            );
        }
    }

    match value {
        Value::String(raw) => {
            if let Some(format) = shape.format {
                if !format.accepts(raw) {
                    result.push(
                        path,
                        ValidationErrorKind::InvalidFormat,
                        format!("'{raw}' is not a valid {}", format.name()),
                    );
                }
            }
        }
        Value::Number(number) => {
            if let Some(n) = number.as_f64() {
                if let Some(min) = shape.minimum.filter(|min| n < *min) {
                    result.push(path, ValidationErrorKind::OutOfRange, format!("{n} is below the minimum {min}"));
                }
                if let Some(max) = shape.maximum.filter(|max| n > *max) {
                    result.push(path, ValidationErrorKind::OutOfRange, format!("{n} is above the maximum {max}"));
                }
            }
        }
        Value::Object(map) => {
            for property in &shape.properties {
                let child_path = join_path(path, &property.name);
                match map.get(&property.name) {
                    Some(child) => check_value(child, &property.shape, &child_path, result),
                    None if property.required => result.push(
                        child_path,
                        ValidationErrorKind::MissingField,
                        format!("Required field '{}' is missing", property.name),
                    ),
                    None => {}
                }
            }
            if !shape.additional_properties {
                for key in map.keys().filter(|key| shape.property(key).is_none()) {
                    result.push(
                        join_path(path, key),
                        ValidationErrorKind::UnexpectedField,
                        format!("Field '{key}' is not allowed here"),
                    );
                }
            }
        }
        Value::Array(items) => {
            if let Some(min_items) = shape.min_items.filter(|min| items.len() < *min) {
                result.push(
                    path,
                    ValidationErrorKind::StructureMismatch,
                    format!("Expected at least {min_items} item(s), found {}", items.len()),
                );
            }
            if let Some(item_shape) = &shape.items {
                for (index, item) in items.iter().enumerate() {
                    check_value(item, item_shape, &format!("{path}[{index}]"), result);
                }
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}

/// Date of a `date` or `date-time` string
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn date_at(document: &Document, path: &str) -> Option<NaiveDate> {
    document.get_str(path).and_then(parse_date)
}

fn check_constraint(document: &Document, constraint: &CrossFieldConstraint, result: &mut ValidationResult) {
    match constraint {
        CrossFieldConstraint::DateOrder { start, end } => {
            if let (Some(from), Some(until)) = (date_at(document, start), date_at(document, end)) {
                if from > until {
                    result.push(
                        end.as_str(),
                        ValidationErrorKind::ConstraintViolation,
                        format!("{start} ({from}) is after {end} ({until})"),
                    );
                }
            }
        }
        CrossFieldConstraint::WithinParentDates { items, parent } => {
            let Some(entries) = document.get_array(items) else {
                return;
            };
            let parent_start = date_at(document, &join_path(parent, "start_date"));
            let parent_end = date_at(document, &join_path(parent, "end_date"));

            for (index, entry) in entries.iter().enumerate() {
                let Some(entry) = entry.as_object() else {
                    continue;
                };
                let item_path = format!("{items}[{index}]");
                let label = match entry.get("id").and_then(Value::as_str) {
                    Some(id) => format!("{item_path} ({id})"),
                    None => item_path.clone(),
                };
                let item_date = |field: &str| entry.get(field).and_then(Value::as_str).and_then(parse_date);

                if let (Some(starts), Some(bound)) = (item_date("start_date"), parent_start) {
                    if starts < bound {
                        result.push(
                            format!("{item_path}.start_date"),
                            ValidationErrorKind::ConstraintViolation,
                            format!("{label} starts {starts}, before {parent} starts {bound}"),
                        );
                    }
                }
                if let (Some(ends), Some(bound)) = (item_date("end_date"), parent_end) {
                    if ends > bound {
                        result.push(
                            format!("{item_path}.end_date"),
                            ValidationErrorKind::ConstraintViolation,
                            format!("{label} ends {ends}, after {parent} ends {bound}"),
                        );
                    }
                }
            }
        }
    }
}
