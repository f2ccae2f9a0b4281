//! Engine configuration and its file loader.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Default item-count ceiling for the cubic closure pass.
pub const DEFAULT_CLOSURE_MAX_ITEMS: usize = 120;

/// Which side wins when a person answers "equal".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TiePolicy {
    /// Equal is treated as "left is not less": the left element is emitted first.
    #[default]
    LeftFirst,
    RightFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tie_policy: TiePolicy,
    /// Run transitive inference after every committed answer.
    pub closure_after_commit: bool,
    /// Skip inference for sessions with more items than this.
    pub closure_max_items: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tie_policy: TiePolicy::LeftFirst,
            closure_after_commit: true,
            closure_max_items: DEFAULT_CLOSURE_MAX_ITEMS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.closure_after_commit && self.closure_max_items < 2 {
            return Err(ConfigError::Invalid(
                "closure_max_items must be >= 2 when closure_after_commit is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether inference should run for a session over `item_count` items.
    pub fn closure_enabled_for(&self, item_count: usize) -> bool {
        self.closure_after_commit && item_count <= self.closure_max_items
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Load an `EngineConfig` from a `.toml` or `.json` file. Missing keys fall
/// back to defaults.
pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let config: EngineConfig = if is_toml {
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
    } else {
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rankwise.toml");
        std::fs::write(&path, "tie_policy = \"right-first\"\n").unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert_eq!(config.tie_policy, TiePolicy::RightFirst);
        assert!(config.closure_after_commit);
        assert_eq!(config.closure_max_items, DEFAULT_CLOSURE_MAX_ITEMS);
    }

    #[test]
    fn json_config_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rankwise.json");
        std::fs::write(&path, r#"{"closure_after_commit": false}"#).unwrap();

        let config = load_config_from_path(&path).unwrap();
        assert!(!config.closure_after_commit);
        assert!(!config.closure_enabled_for(3));
    }

    #[test]
    fn tiny_closure_limit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rankwise.toml");
        std::fs::write(&path, "closure_max_items = 1\n").unwrap();

        assert!(matches!(
            load_config_from_path(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
