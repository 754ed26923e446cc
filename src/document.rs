//! Media plan documents and field addressing
//!
//! A [`Document`] is an ordered mapping of field names to JSON-like values.
//! The schema core never interprets it beyond what a definition declares, so
//! any shape a media plan file can carry round-trips unchanged.
//!
//! Fields are addressed with dot/bracket paths:
//!
//! ```text
//! meta.schema_version      nested object field
//! lineitems[0].name        one array element
//! lineitems[].budget       every array element (migration rules only)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SchemaError, TransformError};
use crate::version::SchemaVersion;

/// Field holding the metadata block
pub const META_FIELD: &str = "meta";
/// Field inside `meta` naming the version a document conforms to
pub const SCHEMA_VERSION_FIELD: &str = "schema_version";

/// A media plan as a mapping of fields to values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing mapping
    pub fn from_mapping(mapping: Map<String, Value>) -> Self {
        Self(mapping)
    }

    /// Build from a JSON value; only objects are documents
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(mapping) => Ok(Self(mapping)),
            other => Err(SchemaError::Decode(format!(
                "a media plan must be a JSON object, found {}",
                value_kind(&other)
            ))),
        }
    }

    /// Borrow the underlying mapping
    pub fn to_mapping(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_mapping(self) -> Map<String, Value> {
        self.0
    }

    pub(crate) fn mapping_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Copy into a plain JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Look up a concrete path such as `lineitems[0].cost_total`
    ///
    /// Returns `None` for malformed paths, `[]` selectors, or missing fields.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let path = FieldPath::parse(path).ok()?;
        let mut current = &self.0;
        for step in &path.parents {
            let child = current.get(&step.key)?;
            let next = match step.selector {
                Selector::Field => child,
                Selector::At(index) => child.as_array()?.get(index)?,
                Selector::Each => return None,
            };
            current = next.as_object()?;
        }
        current.get(&path.field)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get_path(path).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get_path(path).and_then(Value::as_bool)
    }

    pub fn get_object(&self, path: &str) -> Option<&Map<String, Value>> {
        self.get_path(path).and_then(Value::as_object)
    }

    pub fn get_array(&self, path: &str) -> Option<&Vec<Value>> {
        self.get_path(path).and_then(Value::as_array)
    }

    /// Read `meta.schema_version`
    ///
    /// `Ok(None)` when the field is absent; a value that is not a valid
    /// version string is an error.
    pub fn schema_version(&self) -> Result<Option<SchemaVersion>> {
        match self
            .get(META_FIELD)
            .and_then(Value::as_object)
            .and_then(|meta| meta.get(SCHEMA_VERSION_FIELD))
        {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => SchemaVersion::parse(raw).map(Some),
            Some(other) => Err(SchemaError::InvalidVersion(other.to_string())),
        }
    }

    /// Stamp `meta.schema_version`, creating `meta` when missing
    pub fn set_schema_version(&mut self, version: &SchemaVersion) {
        let meta = self
            .0
            .entry(META_FIELD)
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert(
                SCHEMA_VERSION_FIELD.to_string(),
                Value::String(version.tag_string()),
            );
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(mapping: Map<String, Value>) -> Self {
        Self(mapping)
    }
}

impl TryFrom<Value> for Document {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        Value::Object(document.0)
    }
}

/// How a path step descends into its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// `key` - the value itself
    Field,
    /// `key[3]` - one array element
    At(usize),
    /// `key[]` - every array element
    Each,
}

/// One intermediate step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub key: String,
    pub selector: Selector,
}

/// A parsed field path: intermediate steps plus the addressed field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    parents: Vec<PathStep>,
    field: String,
}

impl FieldPath {
    pub fn parse(raw: &str) -> std::result::Result<Self, TransformError> {
        let invalid = || TransformError::InvalidPath(raw.to_string());
        if raw.is_empty() {
            return Err(invalid());
        }

        let mut steps = Vec::new();
        for segment in raw.split('.') {
            let (key, selector) = match segment.split_once('[') {
                None => (segment, Selector::Field),
                Some((key, rest)) => {
                    let inner = rest.strip_suffix(']').ok_or_else(invalid)?;
                    let selector = if inner.is_empty() {
                        Selector::Each
                    } else {
                        Selector::At(inner.parse().map_err(|_| invalid())?)
                    };
                    (key, selector)
                }
            };
            if key.is_empty() || key.contains(['[', ']']) {
                return Err(invalid());
            }
            steps.push(PathStep {
                key: key.to_string(),
                selector,
            });
        }

        let last = steps.pop().ok_or_else(invalid)?;
        if last.selector != Selector::Field {
            return Err(invalid());
        }
        Ok(Self {
            parents: steps,
            field: last.key,
        })
    }

    pub fn parents(&self) -> &[PathStep] {
        &self.parents
    }

    /// Name of the addressed field
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The same parent with a different field name
    pub fn sibling(&self, field: &str) -> Self {
        Self {
            parents: self.parents.clone(),
            field: field.to_string(),
        }
    }

    /// Visit every object this path's field lives in
    ///
    /// `[]` steps fan out over array elements. With `create`, missing plain
    /// object steps are created as empty objects; otherwise a missing step
    /// simply matches nothing. The callback receives the parent object and the
    /// concrete path of the field (`lineitems[2].budget`).
    pub(crate) fn visit_parents<F>(
        &self,
        document: &mut Document,
        create: bool,
        visit: &mut F,
    ) -> std::result::Result<(), TransformError>
    where
        F: FnMut(&mut Map<String, Value>, &str) -> std::result::Result<(), TransformError>,
    {
        walk(
            document.mapping_mut(),
            &self.parents,
            &self.field,
            "",
            create,
            visit,
        )
    }
}

fn walk<F>(
    object: &mut Map<String, Value>,
    steps: &[PathStep],
    field: &str,
    trail: &str,
    create: bool,
    visit: &mut F,
) -> std::result::Result<(), TransformError>
where
    F: FnMut(&mut Map<String, Value>, &str) -> std::result::Result<(), TransformError>,
{
    let Some((step, rest)) = steps.split_first() else {
        return visit(object, &join_path(trail, field));
    };

    let here = join_path(trail, &step.key);
    if !object.contains_key(&step.key) {
        if create && step.selector == Selector::Field {
            object.insert(step.key.clone(), Value::Object(Map::new()));
        } else {
            return Ok(());
        }
    }
    let Some(child) = object.get_mut(&step.key) else {
        return Ok(());
    };

    match step.selector {
        Selector::Field => {
            let child = child
                .as_object_mut()
                .ok_or_else(|| TransformError::NotAnObject(here.clone()))?;
            walk(child, rest, field, &here, create, visit)
        }
        Selector::At(index) => {
            let Some(item) = child.as_array_mut().and_then(|items| items.get_mut(index)) else {
                return Ok(());
            };
            let here = format!("{here}[{index}]");
            let item = item
                .as_object_mut()
                .ok_or_else(|| TransformError::NotAnObject(here.clone()))?;
            walk(item, rest, field, &here, create, visit)
        }
        Selector::Each => {
            let Some(items) = child.as_array_mut() else {
                return Err(TransformError::NotAnObject(here));
            };
            for (index, item) in items.iter_mut().enumerate() {
                let here = format!("{here}[{index}]");
                let item = item
                    .as_object_mut()
                    .ok_or_else(|| TransformError::NotAnObject(here.clone()))?;
                walk(item, rest, field, &here, create, visit)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.parents {
            write!(f, "{}", step.key)?;
            match step.selector {
                Selector::Field => {}
                Selector::At(index) => write!(f, "[{index}]")?,
                Selector::Each => write!(f, "[]")?,
            }
            write!(f, ".")?;
        }
        write!(f, "{}", self.field)
    }
}

/// Append a field name to a dotted path
pub(crate) fn join_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

/// Short name of a value's JSON type, for messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
