//! Collection versioning configuration
//!
//! Persisted per collection and read once at open time. The `versioning`
//! field decides which document variant every document in the collection
//! uses.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{RevError, RevResult};
use crate::observability::{log_event, Event};

/// Revision model used by a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Versioning {
    /// Ancestor trees of digest-identified revisions
    RevisionTrees,
    /// One version vector per known remote
    VersionVectors,
}

impl Versioning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Versioning::RevisionTrees => "revision_trees",
            Versioning::VersionVectors => "version_vectors",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningConfig {
    #[serde(default = "default_versioning")]
    pub versioning: Versioning,

    /// Depth tree documents are pruned to on save
    #[serde(default = "default_max_rev_tree_depth")]
    pub max_rev_tree_depth: u32,

    /// Tracker entries kept before idle entries are trimmed
    #[serde(default = "default_min_changes_to_keep")]
    pub min_changes_to_keep: usize,

    /// Maximum distance a remote timestamp may be ahead of the local clock
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
}

fn default_versioning() -> Versioning {
    Versioning::RevisionTrees
}
fn default_max_rev_tree_depth() -> u32 {
    20
}
fn default_min_changes_to_keep() -> usize {
    100
}
fn default_max_clock_skew_secs() -> u64 {
    60
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            versioning: default_versioning(),
            max_rev_tree_depth: default_max_rev_tree_depth(),
            min_changes_to_keep: default_min_changes_to_keep(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
        }
    }
}

impl VersioningConfig {
    /// Defaults for a version-vector collection
    pub fn version_vectors() -> Self {
        Self {
            versioning: Versioning::VersionVectors,
            ..Self::default()
        }
    }

    /// Load from a JSON file and validate
    pub fn load(path: &Path) -> RevResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RevError::Config(format!("Failed to read config: {}", e)))?;

        let config: VersioningConfig = serde_json::from_str(&content)
            .map_err(|e| RevError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        log_event(
            Event::ConfigLoaded,
            &[
                ("path", &path.display().to_string()),
                ("versioning", config.versioning.as_str()),
            ],
        );
        Ok(config)
    }

    pub fn validate(&self) -> RevResult<()> {
        if self.max_rev_tree_depth == 0 {
            return Err(RevError::Config(
                "max_rev_tree_depth must be greater than 0".to_string(),
            ));
        }
        if self.max_clock_skew_secs == 0 {
            return Err(RevError::Config(
                "max_clock_skew_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = VersioningConfig::default();
        assert_eq!(config.versioning, Versioning::RevisionTrees);
        assert_eq!(config.max_rev_tree_depth, 20);
        assert_eq!(config.min_changes_to_keep, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_fills_missing_fields() {
        let file = write_config(r#"{"versioning": "version_vectors"}"#);
        let config = VersioningConfig::load(file.path()).unwrap();
        assert_eq!(config, VersioningConfig::version_vectors());
    }

    #[test]
    fn test_load_rejects_zero_depth() {
        let file = write_config(r#"{"max_rev_tree_depth": 0}"#);
        let err = VersioningConfig::load(file.path()).unwrap_err();
        assert_eq!(err.code(), "AERO_REV_CONFIG");
    }

    #[test]
    fn test_load_rejects_unknown_versioning() {
        let file = write_config(r#"{"versioning": "git"}"#);
        assert!(VersioningConfig::load(file.path()).is_err());
    }
}
