//! Schema migration
//!
//! Steps connect neighbouring registered versions. A migration between any
//! two versions walks the chain one step at a time, never skipping a
//! version: upgrades ascend through every intervening version, downgrades
//! descend and only cross steps that declare a downgrade. A gap anywhere in
//! the chain fails the whole migration before any step runs.
//!
//! The result of the last step is validated against the target version, and
//! nothing is returned unless it is valid. The caller's document is never
//! modified.

mod builtin;
mod rules;
mod step;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{MigrationError, Result};
use crate::registry::SchemaRegistry;
use crate::validator::SchemaValidator;
use crate::version::SchemaVersion;

pub use builtin::{bundled_steps, v0_0_0_to_v1_0_0};
pub use rules::{Conversion, FieldRule};
pub use step::{Direction, MigrationHop, MigrationPath, MigrationStep, TransformFn};

/// Applies registered migration steps
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    registry: Arc<SchemaRegistry>,
    validator: SchemaValidator,
    /// Keyed by (lower, upper)
    steps: BTreeMap<(SchemaVersion, SchemaVersion), MigrationStep>,
}

impl SchemaMigrator {
    /// A migrator with no steps
    pub fn new(validator: SchemaValidator) -> Self {
        Self {
            registry: Arc::clone(validator.registry()),
            validator,
            steps: BTreeMap::new(),
        }
    }

    /// A migrator with the bundled steps whose versions are registered
    pub fn bundled(validator: SchemaValidator) -> Result<Self> {
        let mut migrator = Self::new(validator);
        for step in bundled_steps() {
            if migrator.registry.is_version_supported(step.from_version())
                && migrator.registry.is_version_supported(step.to_version())
            {
                migrator.register_step(step)?;
            }
        }
        Ok(migrator)
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The validator checking migration results
    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Register a step between two neighbouring versions
    ///
    /// Every field a valid target document carries must be present after
    /// the step runs on any valid source document. Fields the source already
    /// requires count as present. A `Rename` carries a present field to its
    /// new name, a `Default` fills its field and the objects enclosing it,
    /// and [`MigrationStep::provides`] declares what the custom transform
    /// fills. The same holds for the downgrade of a reversible step.
    pub fn register_step(&mut self, mut step: MigrationStep) -> Result<()> {
        let from = step.from_version().clone();
        let to = step.to_version().clone();
        let rejected = |reason: String| MigrationError::Registration {
            from: from.clone(),
            to: to.clone(),
            reason,
        };

        self.registry.assert_version_supported(&from)?;
        self.registry.assert_version_supported(&to)?;
        if from >= to {
            return Err(rejected("steps must go from a lower to a higher version".to_string()).into());
        }
        if self.registry.next_version(&from) != Some(&to) {
            return Err(rejected(format!("{to} is not the version directly after {from}")).into());
        }
        if self.steps.contains_key(&(from.clone(), to.clone())) {
            return Err(rejected("a step is already registered".to_string()).into());
        }
        step.prepare().map_err(rejected)?;

        let source = self.registry.get_definition(&from)?.required_paths();
        let target = self.registry.get_definition(&to)?.required_paths();

        let missing = uncovered(&target, &step.upgrade_presence(&source));
        if !missing.is_empty() {
            return Err(rejected(format!(
                "no default for newly required field(s): {}",
                missing.join(", ")
            ))
            .into());
        }
        if step.is_reversible() {
            let missing = uncovered(&source, &step.downgrade_presence(&target));
            if !missing.is_empty() {
                return Err(rejected(format!(
                    "downgrade has no default for required field(s): {}",
                    missing.join(", ")
                ))
                .into());
            }
        }

        debug!(
            from = %from,
            to = %to,
            reversible = step.is_reversible(),
            "Registered migration step"
        );
        self.steps.insert((from, to), step);
        Ok(())
    }

    /// Registered steps, ascending
    pub fn steps(&self) -> impl Iterator<Item = &MigrationStep> {
        self.steps.values()
    }

    /// The chain of hops from `from` to `to`
    pub fn migration_path(&self, from: &SchemaVersion, to: &SchemaVersion) -> Result<MigrationPath> {
        self.registry.assert_version_supported(from)?;
        self.registry.assert_version_supported(to)?;

        let (lower, upper) = if from <= to { (from, to) } else { (to, from) };
        let chain: Vec<SchemaVersion> = self
            .registry
            .get_supported_versions()
            .into_iter()
            .filter(|v| v >= lower && v <= upper)
            .collect();

        let mut hops = Vec::with_capacity(chain.len().saturating_sub(1));
        for pair in chain.windows(2) {
            let (low, high) = (pair[0].clone(), pair[1].clone());
            let step = self.steps.get(&(low.clone(), high.clone()));
            if from <= to {
                if step.is_none() {
                    return Err(MigrationError::MissingStep { from: low, to: high }.into());
                }
                hops.push(MigrationHop {
                    from: low,
                    to: high,
                    direction: Direction::Upgrade,
                });
            } else {
                match step {
                    None => return Err(MigrationError::MissingStep { from: high, to: low }.into()),
                    Some(step) if !step.is_reversible() => {
                        return Err(MigrationError::NotReversible { from: high, to: low }.into())
                    }
                    Some(_) => hops.push(MigrationHop {
                        from: high,
                        to: low,
                        direction: Direction::Downgrade,
                    }),
                }
            }
        }
        if from > to {
            hops.reverse();
        }
        Ok(MigrationPath::new(hops))
    }

    pub fn can_migrate(&self, from: &SchemaVersion, to: &SchemaVersion) -> bool {
        self.migration_path(from, to).is_ok()
    }

    /// Migrate `document` from `from` to `to` (the current version when `None`)
    pub fn migrate(
        &self,
        document: &Document,
        from: &SchemaVersion,
        to: Option<&SchemaVersion>,
    ) -> Result<Document> {
        let to = to.unwrap_or_else(|| self.registry.get_current_version()).clone();
        self.registry.assert_version_supported(from)?;
        self.registry.assert_version_supported(&to)?;

        match document.schema_version() {
            Ok(Some(declared)) if &declared != from => {
                warn!(declared = %declared, from = %from, "Document declares a different schema version");
            }
            Err(err) => {
                warn!(from = %from, error = %err, "Ignoring malformed declared schema version");
            }
            _ => {}
        }

        if *from == to {
            return Ok(document.clone());
        }

        let path = self.migration_path(from, &to)?;
        let mut current = document.clone();
        for hop in path.hops() {
            let key = match hop.direction {
                Direction::Upgrade => (hop.from.clone(), hop.to.clone()),
                Direction::Downgrade => (hop.to.clone(), hop.from.clone()),
            };
            let step = self.steps.get(&key).ok_or_else(|| MigrationError::MissingStep {
                from: hop.from.clone(),
                to: hop.to.clone(),
            })?;
            current = step
                .apply(current, hop.direction)
                .map_err(|source| MigrationError::StepFailed {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                    source,
                })?;
            debug!(from = %hop.from, to = %hop.to, direction = ?hop.direction, "Applied migration step");
        }

        let result = self.validator.validate(&current, Some(&to))?;
        if !result.is_valid() {
            return Err(MigrationError::InvalidResult {
                version: to,
                errors: result,
            }
            .into());
        }

        info!(from = %from, to = %to, path = %path, "Migrated media plan");
        Ok(current)
    }

    /// For each version, every other version it can migrate to
    pub fn reachable_versions(&self) -> BTreeMap<SchemaVersion, Vec<SchemaVersion>> {
        let mut graph: DiGraph<SchemaVersion, Direction> = DiGraph::new();
        let mut nodes: HashMap<SchemaVersion, NodeIndex> = HashMap::new();
        for version in self.registry.get_supported_versions() {
            let index = graph.add_node(version.clone());
            nodes.insert(version, index);
        }

        for ((low, high), step) in &self.steps {
            let (Some(&a), Some(&b)) = (nodes.get(low), nodes.get(high)) else {
                continue;
            };
            graph.add_edge(a, b, Direction::Upgrade);
            if step.is_reversible() {
                graph.add_edge(b, a, Direction::Downgrade);
            }
        }

        let mut reachable = BTreeMap::new();
        for (version, &start) in &nodes {
            let mut found = BTreeSet::new();
            let mut bfs = Bfs::new(&graph, start);
            while let Some(node) = bfs.next(&graph) {
                if node != start {
                    found.insert(graph[node].clone());
                }
            }
            reachable.insert(version.clone(), found.into_iter().collect());
        }
        reachable
    }

    /// Neighbouring versions with no upgrade step between them
    pub fn missing_links(&self) -> Vec<(SchemaVersion, SchemaVersion)> {
        let versions = self.registry.get_supported_versions();
        versions
            .windows(2)
            .filter(|pair| !self.steps.contains_key(&(pair[0].clone(), pair[1].clone())))
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }
}

/// Required paths not known to be present
fn uncovered(required: &BTreeSet<String>, present: &BTreeSet<String>) -> Vec<String> {
    required.difference(present).cloned().collect()
}
