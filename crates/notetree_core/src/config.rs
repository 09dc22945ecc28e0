//! Engine configuration.
//!
//! # Responsibility
//! - Hold undo depth and exporter options.
//! - Parse and validate JSON handed over by the caller.
//!
//! # Invariants
//! - `limit_undoable_steps >= 1` after validation.
//! - Missing fields take their defaults.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::history::DEFAULT_UNDO_LIMIT;

const DEFAULT_HORIZONTAL_RULE: &str = "~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~";

/// Configuration parse and validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    InvalidUndoLimit(usize),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid config json: {err}"),
            Self::InvalidUndoLimit(limit) => {
                write!(f, "limit_undoable_steps must be at least 1, got {limit}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidUndoLimit(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlOptions {
    /// Show the tree link list beside every page.
    pub include_tree_index: bool,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            include_tree_index: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlainTextOptions {
    /// Upper-cased node name as the first line.
    pub include_node_name: bool,
    /// Line framing tables.
    pub horizontal_rule: String,
}

impl Default for PlainTextOptions {
    fn default() -> Self {
        Self {
            include_node_name: true,
            horizontal_rule: DEFAULT_HORIZONTAL_RULE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    pub include_node_name: bool,
    pub new_page_per_node: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            include_node_name: true,
            new_page_per_node: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-node undo depth.
    pub limit_undoable_steps: usize,
    pub html: HtmlOptions,
    pub plain_text: PlainTextOptions,
    pub print: PrintOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limit_undoable_steps: DEFAULT_UNDO_LIMIT,
            html: HtmlOptions::default(),
            plain_text: PlainTextOptions::default(),
            print: PrintOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit_undoable_steps == 0 {
            return Err(ConfigError::InvalidUndoLimit(self.limit_undoable_steps));
        }
        Ok(())
    }
}
