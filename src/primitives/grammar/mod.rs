//! Grammar registry module with separated pure types and I/O operations.
//!
//! This module is split into:
//! - `descriptor`: the JSON shape grammars are authored in
//! - `rule`: the compiled rule arena, checked and built at registration
//! - `selector`: scope selectors used by injections
//! - `types`: the registry snapshot and its lookup methods (no filesystem access)
//! - `loader`: I/O operations with `GrammarLoader` trait abstraction (runtime only)
//!
//! # Example
//!
//! ```ignore
//! use fresh_textmate::primitives::grammar::{GrammarRegistry, LocalGrammarLoader};
//!
//! // Built-in grammars only, no I/O
//! let registry = GrammarRegistry::builtin()?;
//! assert_eq!(registry.resolve_flag("FOO.DOGMA"), Some("source.dogma"));
//!
//! // Add grammars from a directory (runtime only)
//! #[cfg(feature = "runtime")]
//! let registry = registry.load(&LocalGrammarLoader::new("grammars"))?;
//! ```

mod descriptor;
mod error;
// Loader requires filesystem access - runtime only
#[cfg(feature = "runtime")]
mod loader;
pub mod rule;
pub mod selector;
mod types;

pub use descriptor::*;
pub use error::*;
#[cfg(feature = "runtime")]
pub use loader::*;
pub use rule::{Grammar, GrammarId, RuleId, RuleRef};
pub use types::*;

/// Grammars compiled into the binary, as (file name, JSON)
pub const BUILTIN_GRAMMARS: &[(&str, &str)] = &[(
    "source.dogma.json",
    include_str!("../../../grammars/source.dogma.json"),
)];

/// Parse the built-in grammars
pub fn builtin_descriptors() -> Result<Vec<GrammarDescriptor>, GrammarError> {
    BUILTIN_GRAMMARS
        .iter()
        .map(|(_, json)| GrammarDescriptor::from_json(json).map_err(GrammarError::from))
        .collect()
}

impl GrammarRegistry {
    /// A registry holding the built-in grammars
    pub fn builtin() -> Result<Self, GrammarError> {
        GrammarRegistry::default().register(builtin_descriptors()?)
    }
}
