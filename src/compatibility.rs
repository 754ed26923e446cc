//! Version compatibility
//!
//! Classifies a version a plan was written against relative to the
//! registry's current version, and says what an importer should do with it.

use std::fmt;

use serde::Serialize;

use crate::registry::SchemaRegistry;
use crate::version::SchemaVersion;

/// How a version relates to the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionCompatibility {
    /// The current version
    Native,
    /// Same major, newer minor or patch than current
    ForwardMinor,
    /// Same major, older, registered
    BackwardCompatible,
    /// Older major, registered
    Deprecated,
    Unsupported,
}

impl VersionCompatibility {
    pub fn classify(version: &SchemaVersion, registry: &SchemaRegistry) -> Self {
        let current = registry.get_current_version();
        if version == current {
            VersionCompatibility::Native
        } else if version.same_major(current) && version > current {
            VersionCompatibility::ForwardMinor
        } else if !registry.is_version_supported(version) {
            VersionCompatibility::Unsupported
        } else if version.same_major(current) {
            VersionCompatibility::BackwardCompatible
        } else {
            // Registered versions are never above current
            VersionCompatibility::Deprecated
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionCompatibility::Native => "native",
            VersionCompatibility::ForwardMinor => "forward_minor",
            VersionCompatibility::BackwardCompatible => "backward_compatible",
            VersionCompatibility::Deprecated => "deprecated",
            VersionCompatibility::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for VersionCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a plan on import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    Downgrade,
    Upgrade,
    Migrate,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecommendation {
    pub version: SchemaVersion,
    pub compatibility: VersionCompatibility,
    pub action: RecommendedAction,
    pub message: String,
    pub can_import: bool,
    pub should_upgrade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl MigrationRecommendation {
    pub fn new(version: &SchemaVersion, current: &SchemaVersion, compatibility: VersionCompatibility) -> Self {
        let (action, message, can_import, should_upgrade, warning) = match compatibility {
            VersionCompatibility::Native => (
                RecommendedAction::None,
                format!("Schema version {version} is natively supported"),
                true,
                false,
                None,
            ),
            VersionCompatibility::ForwardMinor => (
                RecommendedAction::Downgrade,
                format!("Schema version {version} will be downgraded to {current} during import"),
                true,
                false,
                Some("Some newer fields may be preserved but inactive".to_string()),
            ),
            VersionCompatibility::BackwardCompatible => (
                RecommendedAction::Upgrade,
                format!("Schema version {version} will be upgraded to {current} during import"),
                true,
                true,
                None,
            ),
            VersionCompatibility::Deprecated => (
                RecommendedAction::Migrate,
                format!("Schema version {version} is deprecated and will be migrated to {current}"),
                true,
                true,
                Some(format!("Plans should be saved as {current} after import")),
            ),
            VersionCompatibility::Unsupported => (
                RecommendedAction::Reject,
                format!("Schema version {version} is not supported (current version is {current})"),
                false,
                false,
                None,
            ),
        };

        Self {
            version: version.clone(),
            compatibility,
            action,
            message,
            can_import,
            should_upgrade,
            warning,
        }
    }

    /// Turn an importable recommendation into a rejection
    pub(crate) fn reject(mut self, reason: impl Into<String>) -> Self {
        self.action = RecommendedAction::Reject;
        self.can_import = false;
        self.should_upgrade = false;
        self.message = format!("{}: {}", self.message, reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SchemaDefinition;
    use serde_json::json;

    fn registry(versions: &[(u64, u64, u64)]) -> SchemaRegistry {
        SchemaRegistry::from_definitions(versions.iter().map(|&(major, minor, patch)| {
            SchemaDefinition::from_value(SchemaVersion::new(major, minor, patch), json!({ "type": "object" }))
                .unwrap()
        }))
        .unwrap()
    }

    #[test]
    fn test_classification() {
        let registry = registry(&[(0, 0, 0), (1, 0, 0), (1, 1, 0)]);
        let classify = |major, minor, patch| {
            VersionCompatibility::classify(&SchemaVersion::new(major, minor, patch), &registry)
        };

        assert_eq!(classify(1, 1, 0), VersionCompatibility::Native);
        assert_eq!(classify(1, 2, 0), VersionCompatibility::ForwardMinor);
        assert_eq!(classify(1, 1, 3), VersionCompatibility::ForwardMinor);
        assert_eq!(classify(1, 0, 0), VersionCompatibility::BackwardCompatible);
        assert_eq!(classify(0, 0, 0), VersionCompatibility::Deprecated);
        assert_eq!(classify(0, 5, 0), VersionCompatibility::Unsupported);
        assert_eq!(classify(2, 0, 0), VersionCompatibility::Unsupported);
        assert_eq!(classify(1, 0, 5), VersionCompatibility::Unsupported);
    }

    #[test]
    fn test_recommendations() {
        let current = SchemaVersion::new(1, 0, 0);
        let old = SchemaVersion::new(0, 0, 0);

        let native = MigrationRecommendation::new(&current, &current, VersionCompatibility::Native);
        assert_eq!(native.action, RecommendedAction::None);
        assert!(native.can_import && !native.should_upgrade);

        let deprecated = MigrationRecommendation::new(&old, &current, VersionCompatibility::Deprecated);
        assert_eq!(deprecated.action, RecommendedAction::Migrate);
        assert!(deprecated.should_upgrade);
        assert!(deprecated.message.contains("v0.0.0"));

        let rejected = deprecated.reject("no migration path");
        assert_eq!(rejected.action, RecommendedAction::Reject);
        assert!(!rejected.can_import);
        assert!(rejected.message.ends_with("no migration path"));

        let json = serde_json::to_value(&native).unwrap();
        assert_eq!(json["action"], json!("none"));
        assert!(json.get("warning").is_none());
    }
}
