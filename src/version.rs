//! Schema version identifiers
//!
//! Versions are written `v<major>.<minor>.<patch>` and ordered numerically by
//! component, never by string comparison (`v10.0.0 > v2.0.0`).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SchemaError;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)$").expect("version pattern is valid")
});

/// An immutable schema version identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaVersion {
    version: Version,
}

impl SchemaVersion {
    /// Create a version from its numeric components
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            version: Version::new(major, minor, patch),
        }
    }

    /// Parse `v1.2.3` (the leading `v` is optional on input)
    ///
    /// Pre-release and build suffixes are rejected so the order stays a plain
    /// (major, minor, patch) comparison.
    pub fn parse(version_str: &str) -> Result<Self, SchemaError> {
        let trimmed = version_str.trim();
        if !VERSION_PATTERN.is_match(trimmed) {
            return Err(SchemaError::InvalidVersion(version_str.to_string()));
        }
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let version =
            Version::parse(bare).map_err(|_| SchemaError::InvalidVersion(version_str.to_string()))?;
        Ok(Self { version })
    }

    pub fn major(&self) -> u64 {
        self.version.major
    }

    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    pub fn patch(&self) -> u64 {
        self.version.patch
    }

    /// Get the bare version string (e.g., "1.2.3")
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }

    /// Get the tag string (e.g., "v1.2.3"), which is also the directory name
    pub fn tag_string(&self) -> String {
        format!("v{}", self.version)
    }

    /// Check if this is a major version bump from another version
    pub fn is_major_bump_from(&self, other: &SchemaVersion) -> bool {
        self.version.major > other.version.major
    }

    /// Same major version as `other`
    pub fn same_major(&self, other: &SchemaVersion) -> bool {
        self.version.major == other.version.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.version)
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag_string())
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = SchemaVersion::parse("v1.2.3").unwrap();
        assert_eq!(v.version_string(), "1.2.3");
        assert_eq!(v.tag_string(), "v1.2.3");
        assert_eq!(v.to_string(), "v1.2.3");
        assert_eq!((v.major(), v.minor(), v.patch()), (1, 2, 3));
    }

    #[test]
    fn test_version_without_v_prefix() {
        let v = SchemaVersion::parse("1.2.3").unwrap();
        assert_eq!(v, SchemaVersion::new(1, 2, 3));
    }

    #[test]
    fn test_numeric_ordering() {
        let v2 = SchemaVersion::parse("v2.0.0").unwrap();
        let v10 = SchemaVersion::parse("v10.0.0").unwrap();
        assert!(v10 > v2);

        let v1_9 = SchemaVersion::parse("v1.9.0").unwrap();
        let v1_10 = SchemaVersion::parse("v1.10.0").unwrap();
        assert!(v1_10 > v1_9);
    }

    #[test]
    fn test_rejects_malformed_versions() {
        for bad in ["", "v1", "v1.0", "1.0", "vx.y.z", "v1.0.0-beta", "v1.0.0+build", "v01.0.0"] {
            let err = SchemaVersion::parse(bad).unwrap_err();
            assert!(err.is_version_error(), "expected version error for {bad:?}");
        }
    }

    #[test]
    fn test_serde_uses_tag_form() {
        let v = SchemaVersion::new(1, 0, 0);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!("v1.0.0"));
        let back: SchemaVersion = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
