/// Engine configuration, loadable from RON. Every field has a default, so an
/// empty `()` file is a valid config.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::draw::DrawDefaults;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How deep `|$template|` expansion may nest before it is treated as a
    /// self-referencing template and dropped.
    pub max_template_depth: usize,
    pub default_weight: f64,
    /// Percent, 0–100.
    pub default_chance: f64,
    /// CSS class of the span a `[code]` block renders to.
    pub code_class: String,
    /// Install the built-in conditions, actions and placeholders.
    pub builtins: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_template_depth: 16,
            default_weight: 1.0,
            default_chance: 50.0,
            code_class: "code".to_string(),
            builtins: true,
        }
    }
}

impl EngineConfig {
    pub fn load_from_ron(path: &Path) -> Result<EngineConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<EngineConfig, ConfigError> {
        Ok(ron::from_str(input)?)
    }

    pub fn draw_defaults(&self) -> DrawDefaults {
        DrawDefaults {
            weight: self.default_weight,
            chance: self.default_chance,
        }
    }
}
