//! Grammar descriptors as they are exchanged on disk.
//!
//! This is the TextMate JSON shape, kept deliberately loose: every rule field
//! is optional and the compiler in [`super::rule`] decides what a given
//! combination of fields means.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// Capture index (as a decimal string) to the rule applied to that capture
pub type RawCaptures = BTreeMap<String, RawRule>;

/// A grammar as authored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrammarDescriptor {
    /// Globally unique scope name, e.g. `source.dogma`
    pub scope_name: String,

    /// Display names that select this grammar, e.g. `dogma`
    #[serde(default)]
    pub names: Vec<String>,

    /// File extensions including the dot, e.g. `.dogma`
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Extensions that themselves contain a dot, e.g. `.tar.gz`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions_with_dot: Vec<String>,

    /// Scopes this grammar needs; merged with the scopes its includes reference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Pattern recognising the first line of a document in this language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_line_match: Option<String>,

    /// Entry rule set, tried top to bottom
    #[serde(default)]
    pub patterns: Vec<RawRule>,

    /// Named rules reachable through `#name` includes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repository: BTreeMap<String, RawRule>,

    /// Scope selector to rule injected where the selector matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub injections: BTreeMap<String, RawRule>,

    /// Makes this whole grammar an injection into other grammars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injection_selector: Option<String>,
}

impl GrammarDescriptor {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// A single rule as authored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawRule {
    /// `#name`, `$self`, `$base`, `scope.name` or `scope.name#name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_name: Option<String>,

    #[serde(
        rename = "match",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub match_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captures: Option<RawCaptures>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_captures: Option<RawCaptures>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_captures: Option<RawCaptures>,

    #[serde(
        rename = "while",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub while_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub while_captures: Option<RawCaptures>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<RawRule>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<BTreeMap<String, RawRule>>,

    /// Test the end pattern after the nested patterns on equal start offsets.
    /// Some grammars write this as `1`/`0`.
    #[serde(
        default,
        skip_serializing_if = "std::ops::Not::not",
        deserialize_with = "bool_or_int"
    )]
    #[schemars(with = "bool")]
    pub apply_end_pattern_last: bool,
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}
