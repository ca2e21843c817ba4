use thiserror::Error;

use crate::primitives::matcher::PatternError;

/// Errors raised while registering grammars or starting a tokenization.
///
/// Unresolved includes are not errors: they resolve to nothing and show up in
/// [`super::GrammarRegistry::missing_dependencies`].
#[derive(Debug, Error)]
pub enum GrammarError {
    /// A rule's regex failed to compile
    #[error("invalid pattern in `{scope}` at {rule}: {source}")]
    InvalidPattern {
        scope: String,
        /// Path of the offending rule inside the descriptor
        rule: String,
        #[source]
        source: PatternError,
    },

    /// A scope name that was never registered
    #[error("unknown scope `{0}`")]
    UnknownScope(String),

    /// A structurally invalid rule, e.g. `begin` without `end` or `while`
    #[error("malformed grammar `{scope}` at {rule}: {reason}")]
    MalformedGrammar {
        scope: String,
        rule: String,
        reason: String,
    },

    #[error("failed to parse grammar descriptor: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
