//! Declarative field rules
//!
//! Most steps between neighbouring versions are a handful of renames,
//! removals, defaults and value conversions. Writing them as data lets the
//! migrator check at registration time which fields a step fills and derive
//! the reverse step automatically.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::document::{value_kind, Document, FieldPath};
use crate::error::TransformError;

/// Change of a value's representation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    /// `"1000"` to `1000`
    StringToNumber,
    /// `1000` to `"1000"`
    NumberToString,
    /// Multiply by a factor (unit changes)
    Scale(f64),
}

impl Conversion {
    /// The conversion undoing this one, if any
    pub fn inverse(&self) -> Option<Conversion> {
        match self {
            Conversion::StringToNumber => Some(Conversion::NumberToString),
            Conversion::NumberToString => Some(Conversion::StringToNumber),
            Conversion::Scale(factor) if *factor != 0.0 && factor.is_finite() => {
                Some(Conversion::Scale(1.0 / factor))
            }
            Conversion::Scale(_) => None,
        }
    }

    /// Convert one value; values already in the target form pass through
    pub fn apply(&self, value: &Value, path: &str) -> Result<Value, TransformError> {
        let unconvertible = |reason: String| TransformError::Unconvertible {
            path: path.to_string(),
            reason,
        };

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Conversion::StringToNumber, Value::String(raw)) => {
                let raw = raw.trim();
                if let Ok(int) = raw.parse::<i64>() {
                    return Ok(Value::from(int));
                }
                raw.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| unconvertible(format!("'{raw}' is not a number")))
            }
            (Conversion::StringToNumber, Value::Number(_)) => Ok(value.clone()),
            (Conversion::NumberToString, Value::Number(number)) => Ok(Value::String(number.to_string())),
            (Conversion::NumberToString, Value::String(_)) => Ok(value.clone()),
            (Conversion::Scale(factor), Value::Number(number)) => {
                let scaled = number.as_f64().map(|n| n * factor).unwrap_or(f64::NAN);
                number_value(scaled).ok_or_else(|| unconvertible(format!("cannot scale {number} by {factor}")))
            }
            (conversion, other) => Err(unconvertible(format!(
                "{conversion:?} does not apply to a {}",
                value_kind(other)
            ))),
        }
    }
}

/// Integral results stay integers
fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

/// One field-level change
///
/// Paths use dot/bracket notation; `[]` applies the rule to every element
/// of an array (`lineitems[].budget`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FieldRule {
    /// Rename the field at `path` to `to`, keeping its position
    Rename { path: String, to: String },
    /// Drop the field
    Remove { path: String },
    /// Set the field when it is absent
    Default { path: String, value: Value },
    /// Change the field's representation when present
    Convert { path: String, conversion: Conversion },
}

impl FieldRule {
    pub fn rename(path: impl Into<String>, to: impl Into<String>) -> Self {
        FieldRule::Rename {
            path: path.into(),
            to: to.into(),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        FieldRule::Remove { path: path.into() }
    }

    pub fn default_value(path: impl Into<String>, value: Value) -> Self {
        FieldRule::Default {
            path: path.into(),
            value,
        }
    }

    pub fn convert(path: impl Into<String>, conversion: Conversion) -> Self {
        FieldRule::Convert {
            path: path.into(),
            conversion,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FieldRule::Rename { path, .. }
            | FieldRule::Remove { path }
            | FieldRule::Default { path, .. }
            | FieldRule::Convert { path, .. } => path,
        }
    }

    /// Check the rule's paths parse
    pub fn check(&self) -> Result<(), TransformError> {
        FieldPath::parse(self.path())?;
        if let FieldRule::Rename { to, .. } = self {
            if to.is_empty() || to.contains(['.', '[', ']']) {
                return Err(TransformError::InvalidPath(to.clone()));
            }
        }
        Ok(())
    }

    /// Update the set of path templates known to be present once this rule
    /// has run
    ///
    /// A rename only carries a field that was already known present, along
    /// with everything below it. A default fills its field and the objects
    /// above it, up to the nearest `[]`.
    pub(crate) fn track_presence(&self, present: &mut BTreeSet<String>) {
        let Ok(parsed) = FieldPath::parse(self.path()) else {
            return;
        };
        let path = parsed.to_string();
        match self {
            FieldRule::Rename { to, .. } => {
                if !present.contains(&path) {
                    return;
                }
                let target = parsed.sibling(to).to_string();
                for moved in take_subtree(present, &path) {
                    present.insert(format!("{target}{}", &moved[path.len()..]));
                }
            }
            FieldRule::Default { .. } => mark_present(present, &path),
            FieldRule::Remove { .. } => {
                take_subtree(present, &path);
            }
            FieldRule::Convert { .. } => {}
        }
    }

    /// Whether a downgrade can undo this rule
    ///
    /// A filled default is kept on the way down: there is no telling whether
    /// the value came from the rule or from the document.
    pub fn is_reversible(&self) -> bool {
        match self {
            FieldRule::Default { .. } => true,
            _ => self.inverse().is_some(),
        }
    }

    /// The rule undoing this one; `None` for defaults and for rules that
    /// cannot be undone
    pub fn inverse(&self) -> Option<FieldRule> {
        match self {
            FieldRule::Rename { path, to } => {
                let parsed = FieldPath::parse(path).ok()?;
                Some(FieldRule::Rename {
                    path: parsed.sibling(to).to_string(),
                    to: parsed.field().to_string(),
                })
            }
            FieldRule::Convert { path, conversion } => conversion.inverse().map(|conversion| FieldRule::Convert {
                path: path.clone(),
                conversion,
            }),
            FieldRule::Default { .. } | FieldRule::Remove { .. } => None,
        }
    }

    pub fn apply(&self, document: &mut Document) -> Result<(), TransformError> {
        let path = FieldPath::parse(self.path())?;
        let field = path.field().to_string();

        match self {
            FieldRule::Rename { to, .. } => path.visit_parents(document, false, &mut |parent, concrete| {
                if !parent.contains_key(&field) {
                    return Ok(());
                }
                if parent.contains_key(to) {
                    return Err(TransformError::TargetExists {
                        from: concrete.to_string(),
                        to: to.clone(),
                    });
                }
                rebuild(parent, |key, value| {
                    let key = if key == field { to.clone() } else { key };
                    Some((key, value))
                });
                Ok(())
            }),
            FieldRule::Remove { .. } => path.visit_parents(document, false, &mut |parent, _| {
                rebuild(parent, |key, value| (key != field).then_some((key, value)));
                Ok(())
            }),
            FieldRule::Default { value, .. } => path.visit_parents(document, true, &mut |parent, _| {
                if !parent.contains_key(&field) {
                    parent.insert(field.clone(), value.clone());
                }
                Ok(())
            }),
            FieldRule::Convert { conversion, .. } => path.visit_parents(document, false, &mut |parent, concrete| {
                if let Some(value) = parent.get_mut(&field) {
                    *value = conversion.apply(value, concrete)?;
                }
                Ok(())
            }),
        }
    }
}

/// Rebuild a mapping entry by entry, keeping the order of what remains
fn rebuild<F>(mapping: &mut Map<String, Value>, mut keep: F)
where
    F: FnMut(String, Value) -> Option<(String, Value)>,
{
    let entries = std::mem::take(mapping);
    for (key, value) in entries {
        if let Some((key, value)) = keep(key, value) {
            mapping.insert(key, value);
        }
    }
}

/// Apply rules in order
/// Add `path` and its enclosing objects, stopping at an array
pub(crate) fn mark_present(present: &mut BTreeSet<String>, path: &str) {
    present.insert(path.to_string());
    let mut current = path;
    while let Some((parent, _)) = current.rsplit_once('.') {
        if parent.ends_with(']') {
            break;
        }
        present.insert(parent.to_string());
        current = parent;
    }
}

/// Remove `path` and every path below it, returning what was removed
fn take_subtree(present: &mut BTreeSet<String>, path: &str) -> Vec<String> {
    let below = |candidate: &String| {
        candidate == path
            || candidate
                .strip_prefix(path)
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
    };
    let taken: Vec<String> = present.iter().filter(|p| below(p)).cloned().collect();
    for path in &taken {
        present.remove(path);
    }
    taken
}

pub fn apply_rules(rules: &[FieldRule], mut document: Document) -> Result<Document, TransformError> {
    for rule in rules {
        rule.apply(&mut document)?;
    }
    Ok(document)
}

/// Inverse of a rule list (reversed order), or the first rule that cannot be undone
pub fn invert_rules(rules: &[FieldRule]) -> Result<Vec<FieldRule>, &FieldRule> {
    let mut inverse = Vec::with_capacity(rules.len());
    for rule in rules.iter().rev() {
        if !rule.is_reversible() {
            return Err(rule);
        }
        inverse.extend(rule.inverse());
    }
    Ok(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut d = doc(json!({ "a": 1, "budget": "10", "z": 2 }));
        FieldRule::rename("budget", "total_budget").apply(&mut d).unwrap();
        let keys: Vec<_> = d.to_mapping().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "total_budget", "z"]);
    }

    #[test]
    fn test_rename_onto_existing_field_fails() {
        let mut d = doc(json!({ "budget": 1, "total_budget": 2 }));
        let err = FieldRule::rename("budget", "total_budget").apply(&mut d).unwrap_err();
        assert!(matches!(err, TransformError::TargetExists { .. }));
    }

    #[test]
    fn test_rules_fan_out_over_arrays() {
        let mut d = doc(json!({ "lineitems": [{ "budget": "5" }, { "budget": 7 }, {}] }));
        let rules = [
            FieldRule::rename("lineitems[].budget", "cost_total"),
            FieldRule::convert("lineitems[].cost_total", Conversion::StringToNumber),
            FieldRule::default_value("lineitems[].cost_total", json!(0)),
        ];
        d = apply_rules(&rules, d).unwrap();
        assert_eq!(
            d.to_value(),
            json!({ "lineitems": [{ "cost_total": 5 }, { "cost_total": 7 }, { "cost_total": 0 }] })
        );
    }

    #[test]
    fn test_default_creates_parents_and_keeps_existing() {
        let mut d = doc(json!({ "meta": { "name": "kept" } }));
        FieldRule::default_value("meta.name", json!("new")).apply(&mut d).unwrap();
        FieldRule::default_value("meta.owner.team", json!("ops")).apply(&mut d).unwrap();
        assert_eq!(d.get_str("meta.name"), Some("kept"));
        assert_eq!(d.get_str("meta.owner.team"), Some("ops"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Conversion::StringToNumber.apply(&json!("1000"), "x").unwrap(), json!(1000));
        assert_eq!(Conversion::StringToNumber.apply(&json!(" 12.5 "), "x").unwrap(), json!(12.5));
        assert_eq!(Conversion::NumberToString.apply(&json!(1000), "x").unwrap(), json!("1000"));
        assert_eq!(Conversion::Scale(100.0).apply(&json!(2.5), "x").unwrap(), json!(250));
        assert_eq!(Conversion::Scale(0.5).apply(&json!(3), "x").unwrap(), json!(1.5));
        assert_eq!(Conversion::StringToNumber.apply(&Value::Null, "x").unwrap(), Value::Null);

        let err = Conversion::StringToNumber.apply(&json!("lots"), "budget").unwrap_err();
        assert!(matches!(err, TransformError::Unconvertible { path, .. } if path == "budget"));
        assert!(Conversion::Scale(2.0).apply(&json!(true), "x").is_err());
    }

    #[test]
    fn test_inverse_rules_undo_changes() {
        let rules = vec![
            FieldRule::rename("lineitems[].budget", "cost_total"),
            FieldRule::convert("lineitems[].cost_total", Conversion::Scale(4.0)),
            FieldRule::default_value("meta.id", json!("plan")),
        ];
        let original = doc(json!({ "meta": { "id": "plan" }, "lineitems": [{ "budget": 1.5 }] }));
        let upgraded = apply_rules(&rules, original.clone()).unwrap();
        assert_eq!(upgraded.get_f64("lineitems[0].cost_total"), Some(6.0));

        let inverse = invert_rules(&rules).unwrap();
        let restored = apply_rules(&inverse, upgraded).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_remove_is_not_invertible() {
        let rules = [FieldRule::rename("a", "b"), FieldRule::remove("c")];
        assert_eq!(invert_rules(&rules).unwrap_err(), &FieldRule::remove("c"));
        assert!(Conversion::Scale(0.0).inverse().is_none());
        assert!(FieldRule::default_value("a", json!(1)).is_reversible());
    }

    fn present(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_rename_carries_presence_and_subtree() {
        let mut known = present(&["lineitems", "lineitems[].budget", "lineitems[].budget.amount"]);
        FieldRule::rename("lineitems[].budget", "cost").track_presence(&mut known);
        assert_eq!(known, present(&["lineitems", "lineitems[].cost", "lineitems[].cost.amount"]));

        // Nothing is known about an optional field, so nothing moves
        let mut known = present(&["meta"]);
        FieldRule::rename("budget", "total_budget").track_presence(&mut known);
        assert_eq!(known, present(&["meta"]));
        assert!(FieldRule::rename("a", "b.c").check().is_err());
    }

    #[test]
    fn test_default_marks_enclosing_objects() {
        let mut known = BTreeSet::new();
        FieldRule::default_value("owner.contact.name", json!("")).track_presence(&mut known);
        assert_eq!(known, present(&["owner", "owner.contact", "owner.contact.name"]));

        let mut known = BTreeSet::new();
        FieldRule::default_value("lineitems[].extra.name", json!("")).track_presence(&mut known);
        assert_eq!(known, present(&["lineitems[].extra", "lineitems[].extra.name"]));

        let mut known = present(&["a", "a.b", "ab"]);
        FieldRule::remove("a").track_presence(&mut known);
        assert_eq!(known, present(&["ab"]));
    }
}
