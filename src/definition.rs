//! Schema definitions
//!
//! A definition is written as a JSON Schema subset (one root file plus
//! sibling files pulled in with `$ref`) and parsed once into typed rules the
//! validator walks. Supported keywords:
//!
//! - `type` (name or list of names), `enum`, `format` (`date`, `date-time`)
//! - `properties` (declaration order is checking order), `required`,
//!   `additionalProperties` (boolean)
//! - `items`, `minItems`, `minimum`, `maximum`
//! - `x-constraints` at the root for cross-field rules

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checksum::Checksum;
use crate::document::join_path;
use crate::error::{Result, SchemaError};
use crate::version::SchemaVersion;

/// Root file of every version directory
pub const ROOT_SCHEMA_FILE: &str = "mediaplan.schema.json";

/// Component name of the root file
pub const ROOT_COMPONENT: &str = "mediaplan";

/// Primitive and container types a field may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl FieldType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "integer" => FieldType::Integer,
            "boolean" => FieldType::Boolean,
            "object" => FieldType::Object,
            "array" => FieldType::Array,
            "null" => FieldType::Null,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Null => "null",
        }
    }

    /// Whether `value` is of this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Null => value.is_null(),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, FieldType::Object | FieldType::Array)
    }
}

/// String formats the validator understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueFormat {
    /// `YYYY-MM-DD`
    Date,
    /// RFC 3339 timestamp
    DateTime,
}

impl ValueFormat {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "date" => Some(ValueFormat::Date),
            "date-time" => Some(ValueFormat::DateTime),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueFormat::Date => "date",
            ValueFormat::DateTime => "date-time",
        }
    }

    pub fn accepts(&self, raw: &str) -> bool {
        match self {
            ValueFormat::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok(),
            ValueFormat::DateTime => DateTime::parse_from_rfc3339(raw).is_ok(),
        }
    }
}

/// Structural rules for one value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldShape {
    /// Allowed types; empty means any
    pub types: Vec<FieldType>,
    pub enum_values: Option<Vec<Value>>,
    pub format: Option<ValueFormat>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    /// Declared object properties, in checking order
    pub properties: Vec<PropertyRule>,
    pub additional_properties: bool,
    pub items: Option<Box<FieldShape>>,
    pub min_items: Option<usize>,
}

impl FieldShape {
    fn any() -> Self {
        Self {
            additional_properties: true,
            ..Self::default()
        }
    }

    pub fn accepts_type(&self, value: &Value) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t.matches(value))
    }

    pub fn expects_container(&self) -> bool {
        self.types.iter().any(FieldType::is_container)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyRule> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Human-readable list of allowed types
    pub fn type_names(&self) -> String {
        self.types
            .iter()
            .map(FieldType::name)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// An object property and whether it must be present
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRule {
    pub name: String,
    pub required: bool,
    pub shape: FieldShape,
}

/// Rules spanning more than one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CrossFieldConstraint {
    /// The date at `start` is on or before the date at `end`
    DateOrder { start: String, end: String },
    /// Each element of the `items` array has `start_date`/`end_date`
    /// within the `parent` object's dates
    WithinParentDates { items: String, parent: String },
}

/// One file of a version, addressable on its own (`campaign`, `lineitem`)
#[derive(Debug, Clone)]
pub struct SchemaComponent {
    pub shape: FieldShape,
    /// The file with every `$ref` inlined
    pub schema: Value,
}

/// The full rule set of one schema version
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    version: SchemaVersion,
    title: Option<String>,
    root: FieldShape,
    constraints: Vec<CrossFieldConstraint>,
    resolved: Value,
    checksum: Checksum,
    components: BTreeMap<String, SchemaComponent>,
}

impl SchemaDefinition {
    /// Parse a self-contained definition (no `$ref`s to other files)
    pub fn from_value(version: SchemaVersion, root: Value) -> Result<Self> {
        let mut files = BTreeMap::new();
        files.insert(ROOT_SCHEMA_FILE.to_string(), root);
        Self::from_files(version, &files)
    }

    /// Parse a version's files, starting at [`ROOT_SCHEMA_FILE`]
    pub fn from_files(version: SchemaVersion, files: &BTreeMap<String, Value>) -> Result<Self> {
        let root = files.get(ROOT_SCHEMA_FILE).ok_or_else(|| {
            SchemaError::Registry(format!("{version}: missing {ROOT_SCHEMA_FILE}"))
        })?;

        let mut stack = vec![ROOT_SCHEMA_FILE.to_string()];
        let resolved = resolve_refs(root, files, &mut stack)
            .map_err(|reason| SchemaError::Registry(format!("{version}: {reason}")))?;

        let mut for_compile = resolved.clone();
        if let Some(map) = for_compile.as_object_mut() {
            map.remove("$schema");
        }
        jsonschema::JSONSchema::compile(&for_compile).map_err(|err| {
            SchemaError::Registry(format!("{version}: not a valid JSON Schema: {err}"))
        })?;

        let root_shape = parse_shape(&resolved, "")
            .map_err(|reason| SchemaError::Registry(format!("{version}: {reason}")))?;
        if !root_shape.types.is_empty() && !root_shape.types.contains(&FieldType::Object) {
            return Err(SchemaError::Registry(format!(
                "{version}: the root of a media plan definition must be an object"
            )));
        }

        let mut components = BTreeMap::new();
        for (file, raw) in files {
            if file == ROOT_SCHEMA_FILE {
                continue;
            }
            let Some(name) = component_name(file) else {
                continue;
            };
            let mut stack = vec![file.clone()];
            let schema = resolve_refs(raw, files, &mut stack)
                .map_err(|reason| SchemaError::Registry(format!("{version}: {file}: {reason}")))?;
            let shape = parse_shape(&schema, "")
                .map_err(|reason| SchemaError::Registry(format!("{version}: {file}: {reason}")))?;
            components.insert(name.to_string(), SchemaComponent { shape, schema });
        }
        components.insert(
            ROOT_COMPONENT.to_string(),
            SchemaComponent {
                shape: root_shape.clone(),
                schema: resolved.clone(),
            },
        );

        let constraints = match resolved.get("x-constraints") {
            None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|err| {
                SchemaError::Registry(format!("{version}: invalid x-constraints: {err}"))
            })?,
        };

        Ok(Self {
            title: resolved.get("title").and_then(Value::as_str).map(String::from),
            checksum: Checksum::from_json(&resolved),
            version,
            root: root_shape,
            constraints,
            resolved,
            components,
        })
    }

    pub fn version(&self) -> &SchemaVersion {
        &self.version
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn root(&self) -> &FieldShape {
        &self.root
    }

    pub fn constraints(&self) -> &[CrossFieldConstraint] {
        &self.constraints
    }

    /// The definition with every `$ref` inlined
    pub fn resolved_schema(&self) -> &Value {
        &self.resolved
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Fields every valid document carries, as path templates
    /// (`lineitems[].name`)
    ///
    /// Only required properties are descended into, so a required child of
    /// an optional object is not listed.
    pub fn required_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        collect_required(&self.root, "", true, &mut paths);
        paths
    }

    /// Every field marked required by its parent, present or not
    ///
    /// Unlike [`required_paths`](Self::required_paths) this includes
    /// `owner.name` when `owner` itself is optional.
    pub fn required_fields(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        collect_required(&self.root, "", false, &mut paths);
        paths
    }

    /// Shape of a single file of this version, by name without the
    /// `.schema.json` suffix
    pub fn component(&self, name: &str) -> Option<&SchemaComponent> {
        self.components.get(name)
    }

    /// Names of every component, root included
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn components(&self) -> &BTreeMap<String, SchemaComponent> {
        &self.components
    }
}

fn component_name(file: &str) -> Option<&str> {
    file.strip_suffix(".schema.json")
        .or_else(|| file.strip_suffix(".json"))
}

fn collect_required(shape: &FieldShape, prefix: &str, strict: bool, paths: &mut BTreeSet<String>) {
    for property in &shape.properties {
        if strict && !property.required {
            continue;
        }
        let path = join_path(prefix, &property.name);
        if property.required {
            paths.insert(path.clone());
        }
        collect_required(&property.shape, &path, strict, paths);
        if let Some(items) = &property.shape.items {
            collect_required(items, &format!("{path}[]"), strict, paths);
        }
    }
}

fn resolve_refs(
    node: &Value,
    files: &BTreeMap<String, Value>,
    stack: &mut Vec<String>,
) -> std::result::Result<Value, String> {
    match node {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref") {
                let target = reference
                    .as_str()
                    .ok_or_else(|| "$ref must be a string".to_string())?;
                let file = target.strip_prefix("./").unwrap_or(target);
                if file.starts_with('#') || file.contains('#') {
                    return Err(format!("unsupported $ref '{target}': only file references are allowed"));
                }
                if stack.iter().any(|seen| seen == file) {
                    return Err(format!("circular $ref: {} -> {file}", stack.join(" -> ")));
                }
                let referenced = files
                    .get(file)
                    .ok_or_else(|| format!("$ref to unknown file '{target}'"))?;

                stack.push(file.to_string());
                let mut resolved = resolve_refs(referenced, files, stack)?;
                stack.pop();

                if let Value::Object(target_map) = &mut resolved {
                    for (key, value) in map {
                        if key != "$ref" {
                            target_map.insert(key.clone(), resolve_refs(value, files, stack)?);
                        }
                    }
                }
                return Ok(resolved);
            }

            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve_refs(value, files, stack)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_refs(item, files, stack))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn parse_shape(node: &Value, path: &str) -> std::result::Result<FieldShape, String> {
    let location = if path.is_empty() { "$" } else { path };
    let map = node
        .as_object()
        .ok_or_else(|| format!("{location}: a field definition must be an object"))?;

    let mut shape = FieldShape::any();

    match map.get("type") {
        None => {}
        Some(Value::String(name)) => shape.types.push(parse_type(name, location)?),
        Some(Value::Array(names)) => {
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| format!("{location}: type names must be strings"))?;
                shape.types.push(parse_type(name, location)?);
            }
        }
        Some(_) => return Err(format!("{location}: 'type' must be a string or a list")),
    }

    if let Some(values) = map.get("enum") {
        let values = values
            .as_array()
            .ok_or_else(|| format!("{location}: 'enum' must be a list"))?;
        shape.enum_values = Some(values.clone());
    }

    if let Some(format) = map.get("format").and_then(Value::as_str) {
        // Unknown formats are annotations only
        shape.format = ValueFormat::parse(format);
    }

    shape.minimum = parse_number(map, "minimum", location)?;
    shape.maximum = parse_number(map, "maximum", location)?;

    if let Some(min_items) = map.get("minItems") {
        let min_items = min_items
            .as_u64()
            .ok_or_else(|| format!("{location}: 'minItems' must be a non-negative integer"))?;
        shape.min_items = Some(min_items as usize);
    }

    match map.get("additionalProperties") {
        None => {}
        Some(Value::Bool(allowed)) => shape.additional_properties = *allowed,
        // Schema-valued additionalProperties only constrains extra fields; treat as allowed
        Some(Value::Object(_)) => shape.additional_properties = true,
        Some(_) => return Err(format!("{location}: 'additionalProperties' must be a boolean")),
    }

    let required: Vec<String> = match map.get("required") {
        None => Vec::new(),
        Some(Value::Array(names)) => names
            .iter()
            .map(|name| {
                name.as_str()
                    .map(String::from)
                    .ok_or_else(|| format!("{location}: 'required' entries must be strings"))
            })
            .collect::<std::result::Result<_, _>>()?,
        Some(_) => return Err(format!("{location}: 'required' must be a list")),
    };

    if let Some(properties) = map.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| format!("{location}: 'properties' must be an object"))?;
        for (name, child) in properties {
            let child_path = join_path(path, name);
            shape.properties.push(PropertyRule {
                name: name.clone(),
                required: required.contains(name),
                shape: parse_shape(child, &child_path)?,
            });
        }
    }
    for name in &required {
        if shape.property(name).is_none() {
            shape.properties.push(PropertyRule {
                name: name.clone(),
                required: true,
                shape: FieldShape::any(),
            });
        }
    }

    if let Some(items) = map.get("items") {
        shape.items = Some(Box::new(parse_shape(items, &format!("{location}[]"))?));
    }

    Ok(shape)
}

fn parse_type(name: &str, location: &str) -> std::result::Result<FieldType, String> {
    FieldType::parse(name).ok_or_else(|| format!("{location}: unknown type '{name}'"))
}

fn parse_number(
    map: &Map<String, Value>,
    key: &str,
    location: &str,
) -> std::result::Result<Option<f64>, String> {
    match map.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{location}: '{key}' must be a number")),
    }
}
