//! Grammar registry
//!
//! A registry is an immutable snapshot. Registering grammars produces a new
//! snapshot with a higher version and leaves the old one untouched, so
//! documents being tokenized against it keep a consistent view.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::descriptor::GrammarDescriptor;
use super::error::GrammarError;
use super::rule::{Grammar, GrammarId};
use crate::config::TokenizerConfig;
use crate::lines_iter::lines_iter;
use crate::primitives::tokenizer::{TokenSpan, Tokenizer};

#[derive(Debug, Default)]
struct Snapshot {
    version: u64,
    grammars: Vec<Arc<Grammar>>,
    by_scope: HashMap<String, GrammarId>,
    /// Lowercased display names
    names: HashMap<String, GrammarId>,
    /// Lowercased extensions, dot included
    extensions: HashMap<String, GrammarId>,
    extensions_with_dot: HashMap<String, GrammarId>,
    config: TokenizerConfig,
}

/// Registered grammars, cheap to clone and shareable across threads
#[derive(Debug, Clone, Default)]
pub struct GrammarRegistry {
    inner: Arc<Snapshot>,
}

impl GrammarRegistry {
    /// An empty registry whose tokenizers use `config`
    pub fn with_config(config: TokenizerConfig) -> Self {
        Self {
            inner: Arc::new(Snapshot {
                config,
                ..Snapshot::default()
            }),
        }
    }

    /// Compile `descriptors` and return a new snapshot containing them.
    ///
    /// Every pattern is compiled here; one bad rule fails the whole call and
    /// leaves `self` unchanged. A descriptor whose scope is already registered
    /// replaces the earlier grammar in the new snapshot. Name and extension
    /// lookups go to the grammar registered last.
    pub fn register<I>(&self, descriptors: I) -> Result<Self, GrammarError>
    where
        I: IntoIterator<Item = GrammarDescriptor>,
    {
        let mut grammars = self.inner.grammars.clone();
        let mut by_scope = self.inner.by_scope.clone();
        let mut names = self.inner.names.clone();
        let mut extensions = self.inner.extensions.clone();
        let mut extensions_with_dot = self.inner.extensions_with_dot.clone();

        for descriptor in descriptors {
            let grammar = Grammar::compile(&descriptor)?;
            tracing::debug!(
                "compiled grammar `{}` ({} rules, {} dependencies)",
                grammar.scope_name(),
                grammar.rule_count(),
                grammar.dependencies().len()
            );

            let id = match by_scope.get(grammar.scope_name()) {
                Some(&id) => {
                    grammars[id.0] = Arc::new(grammar);
                    id
                }
                None => {
                    let id = GrammarId(grammars.len());
                    by_scope.insert(grammar.scope_name().to_string(), id);
                    grammars.push(Arc::new(grammar));
                    id
                }
            };

            let grammar = &grammars[id.0];
            for name in grammar.names() {
                names.insert(normalize_flag(name), id);
            }
            for extension in grammar.extensions() {
                extensions.insert(normalize_flag(extension), id);
            }
            for extension in grammar.extensions_with_dot() {
                extensions_with_dot.insert(normalize_flag(extension), id);
            }
        }

        let version = self.inner.version + 1;
        tracing::debug!(
            "registry version {} with {} grammars",
            version,
            grammars.len()
        );

        Ok(Self {
            inner: Arc::new(Snapshot {
                version,
                grammars,
                by_scope,
                names,
                extensions,
                extensions_with_dot,
                config: self.inner.config.clone(),
            }),
        })
    }

    /// Incremented by every [`register`](Self::register)
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.inner.config
    }

    pub fn grammar_id(&self, scope: &str) -> Option<GrammarId> {
        self.inner.by_scope.get(scope).copied()
    }

    /// Panics if `id` does not come from this registry
    pub fn grammar(&self, id: GrammarId) -> &Grammar {
        &self.inner.grammars[id.0]
    }

    pub fn get(&self, scope: &str) -> Option<&Grammar> {
        self.grammar_id(scope).map(|id| self.grammar(id))
    }

    pub fn grammars(&self) -> impl Iterator<Item = (GrammarId, &Grammar)> {
        self.inner
            .grammars
            .iter()
            .enumerate()
            .map(|(i, g)| (GrammarId(i), g.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.inner.grammars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.grammars.is_empty()
    }

    /// Scope for a grammar name (`dogma`), an extension (`.dogma`) or a path
    /// ending in one (`dir/file.dogma`), case-insensitively
    pub fn resolve_flag(&self, flag: &str) -> Option<&str> {
        let normal = normalize_flag(flag);

        let id = self.inner.names.get(&normal).copied().or_else(|| {
            match normal.rfind('.') {
                Some(dot) => {
                    let extension = &normal[dot..];
                    self.inner
                        .extensions
                        .get(extension)
                        .or_else(|| self.inner.extensions_with_dot.get(extension))
                        .copied()
                }
                None => self.inner.extensions.get(&format!(".{normal}")).copied(),
            }
        })?;

        Some(self.grammar(id).scope_name())
    }

    /// Registered scope names, sorted
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes: Vec<&str> = self.inner.by_scope.keys().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes
    }

    /// Scopes some grammar depends on that are not registered, sorted
    pub fn missing_dependencies(&self) -> Vec<&str> {
        let needed: BTreeSet<&str> = self
            .inner
            .grammars
            .iter()
            .flat_map(|g| g.dependencies().iter().map(String::as_str))
            .collect();
        needed
            .into_iter()
            .filter(|scope| !self.inner.by_scope.contains_key(*scope))
            .collect()
    }

    /// First registered grammar whose `firstLineMatch` accepts `line`
    pub fn scope_for_first_line(&self, line: &str) -> Option<&str> {
        self.inner
            .grammars
            .iter()
            .find(|g| g.matches_first_line(line))
            .map(|g| g.scope_name())
    }

    pub fn tokenizer(&self, scope: &str) -> Result<Tokenizer<'_>, GrammarError> {
        Tokenizer::with_config(self, scope, self.inner.config.clone())
    }

    /// Tokenize a whole document; spans are in document byte offsets and
    /// cover `text` exactly
    pub fn tokenize(&self, text: &str, scope: &str) -> Result<Vec<TokenSpan>, GrammarError> {
        let mut tokenizer = self.tokenizer(scope)?;
        let mut state = tokenizer.initial_state();
        let mut spans = Vec::new();

        for (index, line) in lines_iter(text).enumerate() {
            let (tokens, next) = tokenizer.tokenize_line(line.text, &state, index == 0)?;
            spans.extend(tokens.into_iter().map(|mut token| {
                token.range = token.range.start + line.offset..token.range.end + line.offset;
                token
            }));
            state = next;
        }

        Ok(spans)
    }

    /// Tokenize a whole document, one token list per line with line-relative ranges
    pub fn tokenize_lines(
        &self,
        text: &str,
        scope: &str,
    ) -> Result<Vec<Vec<TokenSpan>>, GrammarError> {
        let mut tokenizer = self.tokenizer(scope)?;
        let mut state = tokenizer.initial_state();
        let mut lines = Vec::new();

        for (index, line) in lines_iter(text).enumerate() {
            let (tokens, next) = tokenizer.tokenize_line(line.text, &state, index == 0)?;
            lines.push(tokens);
            state = next;
        }

        Ok(lines)
    }
}

/// Lowercase, drop leading blanks, drop trailing slashes and blanks.
/// Applied to indexed names and extensions as well as to looked up flags.
fn normalize_flag(flag: &str) -> String {
    flag.to_lowercase()
        .trim_start_matches([' ', '\t'])
        .trim_end_matches(['/', ' ', '\t'])
        .to_string()
}
