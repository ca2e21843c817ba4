//! Document-level TextMate highlighting engine
//!
//! Wraps a [`crate::primitives::tokenizer::Tokenizer`] with a per-line
//! cache. Each cached line remembers its text, the state it started in and
//! the state it ended in. On the next
//! pass a line is reused as long as both its text and its start state are
//! unchanged, so an edit only re-tokenizes from the edited line until the
//! state converges again.
//!
//! # Features
//!
//! - Document spans with the full scope path of every token
//! - Line cache keyed on text and start state
//! - `\n` and `\r\n` line endings

use std::path::Path;

use crate::lines_iter::lines_iter;
use crate::primitives::grammar::{GrammarError, GrammarRegistry};
use crate::primitives::tokenizer::{StateStack, TokenSpan};

/// TextMate highlighting engine for one document
pub struct TextMateEngine {
    registry: GrammarRegistry,
    scope: String,
    lines: Vec<CachedLine>,
    retokenized: usize,
}

#[derive(Debug, Clone)]
struct CachedLine {
    text: String,
    start: StateStack,
    end: StateStack,
    tokens: Vec<TokenSpan>,
}

impl TextMateEngine {
    /// Create a new engine for documents in `scope`
    pub fn new(registry: GrammarRegistry, scope: &str) -> Result<Self, GrammarError> {
        if registry.grammar_id(scope).is_none() {
            return Err(GrammarError::UnknownScope(scope.to_string()));
        }
        Ok(Self {
            registry,
            scope: scope.to_string(),
            lines: Vec::new(),
            retokenized: 0,
        })
    }

    /// Create an engine for a file path, picking the grammar by file name
    /// and then by extension
    pub fn for_file(path: &Path, registry: &GrammarRegistry) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let scope = registry.resolve_flag(name)?.to_string();
        Self::new(registry.clone(), &scope).ok()
    }

    /// Tokenize `text`, reusing every cached line whose text and start state
    /// are unchanged. Spans are in document byte offsets.
    pub fn highlight(&mut self, text: &str) -> Result<Vec<TokenSpan>, GrammarError> {
        let Self {
            registry,
            scope,
            lines,
            retokenized,
        } = self;

        let mut tokenizer = registry.tokenizer(scope)?;
        let mut state = tokenizer.initial_state();
        let mut spans = Vec::new();
        let mut count = 0;
        *retokenized = 0;

        for (index, line) in lines_iter(text).enumerate() {
            let reusable = lines
                .get(index)
                .is_some_and(|cached| cached.text == line.text && cached.start == state);

            if !reusable {
                let (tokens, end) = tokenizer.tokenize_line(line.text, &state, index == 0)?;
                let fresh = CachedLine {
                    text: line.text.to_string(),
                    start: state,
                    end,
                    tokens,
                };
                if index < lines.len() {
                    lines[index] = fresh;
                } else {
                    lines.push(fresh);
                }
                *retokenized += 1;
            }

            let cached = &lines[index];
            spans.extend(cached.tokens.iter().map(|token| TokenSpan {
                scopes: token.scopes.clone(),
                range: token.range.start + line.offset..token.range.end + line.offset,
            }));
            state = cached.end.clone();
            count = index + 1;
        }

        lines.truncate(count);
        if *retokenized > 0 {
            tracing::trace!("re-tokenized {} of {} lines", retokenized, count);
        }
        Ok(spans)
    }

    /// Lines tokenized (rather than reused) by the last [`highlight`](Self::highlight)
    pub fn retokenized_lines(&self) -> usize {
        self.retokenized
    }

    /// Drop cached lines from `line` on
    pub fn invalidate_from_line(&mut self, line: usize) {
        if line < self.lines.len() {
            tracing::debug!("invalidating {} cached lines", self.lines.len() - line);
            self.lines.truncate(line);
        }
    }

    /// Invalidate all cache
    pub fn invalidate_all(&mut self) {
        tracing::debug!("invalidating all cached lines");
        self.lines.clear();
    }

    /// Switch to another registry snapshot. Cached states belong to the old
    /// snapshot, so the cache is dropped.
    pub fn set_registry(&mut self, registry: GrammarRegistry) -> Result<(), GrammarError> {
        if registry.grammar_id(&self.scope).is_none() {
            return Err(GrammarError::UnknownScope(self.scope.clone()));
        }
        self.registry = registry;
        self.invalidate_all();
        Ok(())
    }

    /// Get the grammar's scope name
    pub fn scope_name(&self) -> &str {
        &self.scope
    }

    /// Merge adjacent spans with the same scopes
    pub fn merge_adjacent_spans(spans: &mut Vec<TokenSpan>) {
        if spans.len() < 2 {
            return;
        }

        let mut write_idx = 0;
        for read_idx in 1..spans.len() {
            if spans[write_idx].scopes == spans[read_idx].scopes
                && spans[write_idx].range.end == spans[read_idx].range.start
            {
                spans[write_idx].range.end = spans[read_idx].range.end;
            } else {
                write_idx += 1;
                if write_idx != read_idx {
                    spans[write_idx] = spans[read_idx].clone();
                }
            }
        }
        spans.truncate(write_idx + 1);
    }
}
