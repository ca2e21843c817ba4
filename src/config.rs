//! Tokenizer configuration
//!
//! Everything here has a default, so an empty JSON object is a valid config.

use std::path::Path;

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::primitives::resolver::DEFAULT_INCLUDE_DEPTH_LIMIT;

/// Where the end pattern of a begin/end region sits among candidates that
/// match at the same offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndPatternPriority {
    /// Before the nested patterns, unless the rule sets `applyEndPatternLast`
    #[default]
    Declared,
    /// Always before the nested patterns
    AlwaysFirst,
    /// Always after the nested patterns
    AlwaysLast,
}

impl EndPatternPriority {
    /// Whether the end pattern is tried after the nested patterns
    pub fn end_last(self, apply_end_pattern_last: bool) -> bool {
        match self {
            EndPatternPriority::Declared => apply_end_pattern_last,
            EndPatternPriority::AlwaysFirst => false,
            EndPatternPriority::AlwaysLast => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Maximum number of nested includes followed when expanding one rule
    pub include_depth_limit: usize,

    /// Tie-break between a region's end pattern and its nested patterns
    pub end_pattern_priority: EndPatternPriority,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            include_depth_limit: DEFAULT_INCLUDE_DEPTH_LIMIT,
            end_pattern_priority: EndPatternPriority::default(),
        }
    }
}

impl TokenizerConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}
