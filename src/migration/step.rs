//! Migration steps and paths

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::document::{Document, FieldPath};
use crate::error::TransformError;
use crate::migration::rules::{apply_rules, invert_rules, mark_present, FieldRule};
use crate::version::SchemaVersion;

/// A pure transformation over a whole document
pub type TransformFn = Arc<dyn Fn(Document) -> Result<Document, TransformError> + Send + Sync>;

/// Which way a hop crosses a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upgrade,
    Downgrade,
}

#[derive(Clone)]
pub(crate) enum Downgrade {
    Unsupported,
    /// Derive from the upgrade rules at registration
    Derive,
    Rules(Vec<FieldRule>),
    Custom(TransformFn),
}

/// A directed edge between two neighbouring versions
///
/// The upgrade runs the custom transform (if any) and then the rules, in
/// order. A downgrade is either derived from the rules with
/// [`reversible`](Self::reversible) or supplied with
/// [`with_downgrade`](Self::with_downgrade); without one the step only
/// upgrades.
#[derive(Clone)]
pub struct MigrationStep {
    from: SchemaVersion,
    to: SchemaVersion,
    description: Option<String>,
    rules: Vec<FieldRule>,
    transform: Option<TransformFn>,
    provides: Vec<String>,
    pub(crate) downgrade: Downgrade,
    downgrade_provides: Vec<String>,
}

impl MigrationStep {
    pub fn new(from: SchemaVersion, to: SchemaVersion) -> Self {
        Self {
            from,
            to,
            description: None,
            rules: Vec::new(),
            transform: None,
            provides: Vec::new(),
            downgrade: Downgrade::Unsupported,
            downgrade_provides: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = FieldRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Custom transformation, run before the rules
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Document) -> Result<Document, TransformError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Declare fields the custom transformation always fills
    pub fn provides<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provides.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Allow downgrades by inverting the rules
    pub fn reversible(mut self) -> Self {
        self.downgrade = Downgrade::Derive;
        self
    }

    /// Allow downgrades with a custom transformation
    pub fn with_downgrade<F>(mut self, transform: F) -> Self
    where
        F: Fn(Document) -> Result<Document, TransformError> + Send + Sync + 'static,
    {
        self.downgrade = Downgrade::Custom(Arc::new(transform));
        self
    }

    /// Declare fields the downgrade always fills
    pub fn downgrade_provides<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.downgrade_provides.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn from_version(&self) -> &SchemaVersion {
        &self.from
    }

    pub fn to_version(&self) -> &SchemaVersion {
        &self.to
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn field_rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn is_reversible(&self) -> bool {
        !matches!(self.downgrade, Downgrade::Unsupported)
    }

    /// Path templates present after an upgrade of a document carrying
    /// `before`
    pub(crate) fn upgrade_presence(&self, before: &BTreeSet<String>) -> BTreeSet<String> {
        track(before, &self.provides, &self.rules)
    }

    /// Path templates present after a downgrade of a document carrying
    /// `before`
    pub(crate) fn downgrade_presence(&self, before: &BTreeSet<String>) -> BTreeSet<String> {
        let rules: &[FieldRule] = match &self.downgrade {
            Downgrade::Rules(rules) => rules,
            _ => &[],
        };
        track(before, &self.downgrade_provides, rules)
    }

    /// Check rule paths and resolve a derived downgrade
    pub(crate) fn prepare(&mut self) -> Result<(), String> {
        for rule in &self.rules {
            rule.check().map_err(|err| err.to_string())?;
        }
        if let Downgrade::Derive = self.downgrade {
            if self.transform.is_some() {
                return Err("a step with a custom transform needs an explicit downgrade".to_string());
            }
            let inverse = invert_rules(&self.rules)
                .map_err(|rule| format!("rule on '{}' cannot be reversed", rule.path()))?;
            self.downgrade = Downgrade::Rules(inverse);
        }
        Ok(())
    }

    /// Run the step; the result is stamped with the version it now conforms to
    pub(crate) fn apply(&self, document: Document, direction: Direction) -> Result<Document, TransformError> {
        let (mut document, stamp) = match direction {
            Direction::Upgrade => {
                let document = match &self.transform {
                    Some(transform) => transform(document)?,
                    None => document,
                };
                (apply_rules(&self.rules, document)?, &self.to)
            }
            Direction::Downgrade => {
                let document = match &self.downgrade {
                    Downgrade::Rules(rules) => apply_rules(rules, document)?,
                    Downgrade::Custom(transform) => transform(document)?,
                    Downgrade::Unsupported | Downgrade::Derive => {
                        return Err(TransformError::Custom(format!(
                            "step {} -> {} has no downgrade",
                            self.from, self.to
                        )))
                    }
                };
                (document, &self.from)
            }
        };
        document.set_schema_version(stamp);
        Ok(document)
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .field("rules", &self.rules)
            .field("custom_transform", &self.transform.is_some())
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

/// Declared paths come from the transform, which runs before the rules
fn track(before: &BTreeSet<String>, provides: &[String], rules: &[FieldRule]) -> BTreeSet<String> {
    let mut present = before.clone();
    for path in provides {
        mark_present(&mut present, &normalize(path));
    }
    for rule in rules {
        rule.track_presence(&mut present);
    }
    present
}

fn normalize(path: &str) -> String {
    FieldPath::parse(path)
        .map(|p| p.to_string())
        .unwrap_or_else(|_| path.to_string())
}

/// One application of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationHop {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub direction: Direction,
}

/// The ordered hops connecting two versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPath {
    hops: Vec<MigrationHop>,
}

impl MigrationPath {
    pub(crate) fn new(hops: Vec<MigrationHop>) -> Self {
        Self { hops }
    }

    pub fn hops(&self) -> &[MigrationHop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Every version visited, including both ends
    pub fn versions(&self) -> Vec<SchemaVersion> {
        let mut versions: Vec<_> = self.hops.first().map(|h| h.from.clone()).into_iter().collect();
        versions.extend(self.hops.iter().map(|h| h.to.clone()));
        versions
    }
}

impl fmt::Display for MigrationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let versions: Vec<_> = self.versions().iter().map(ToString::to_string).collect();
        write!(f, "{}", versions.join(" -> "))
    }
}
