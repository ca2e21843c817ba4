//! Regex adapter over Oniguruma
//!
//! TextMate grammars are written against Oniguruma's dialect: lookbehind,
//! backreferences, POSIX bracket classes, inline `(?x)`/`(?i)` flags and the
//! `\G` anchor all show up in real grammars, so a non-backtracking engine is
//! not an option.
//!
//! # Anchors
//!
//! Lines are matched one at a time, which gives two anchors a meaning that
//! depends on the tokenizer state rather than on the text:
//!
//! - `\A` may only match on the first line of a document.
//! - `\G` may only match where the previous match of the enclosing rule ended.
//!
//! Patterns containing these anchors are compiled in up to four variants, with
//! the anchors that cannot match replaced by a character that never occurs in
//! source text. [`Anchors`] picks the variant at search time.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use onig::{Regex, RegexOptions, Region, SearchOptions, Syntax};
use thiserror::Error;

/// Replacement for an anchor that cannot match at the current position
const DEAD_ANCHOR: &str = "\u{FFFF}";

/// A pattern that failed to compile
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid pattern `{pattern}`: {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// Which position-dependent anchors are live for a search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Anchors {
    /// `\A` may match (first line of the document)
    pub document_start: bool,
    /// Offset at which `\G` may match
    pub anchor: Option<usize>,
}

impl Anchors {
    pub fn new(document_start: bool, anchor: Option<usize>) -> Self {
        Self {
            document_start,
            anchor,
        }
    }

    /// Index into the variant table: bit 0 kills `\A`, bit 1 kills `\G`
    fn variant(&self, from: usize) -> usize {
        let kill_a = !self.document_start;
        let kill_g = self.anchor != Some(from);
        (kill_a as usize) | ((kill_g as usize) << 1)
    }
}

/// Byte ranges of every group of a successful match; group 0 is the whole match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<Range<usize>>>,
}

impl Captures {
    fn from_region(region: &Region) -> Self {
        let groups = (0..region.len())
            .map(|i| region.pos(i).map(|(start, end)| start..end))
            .collect();
        Self { groups }
    }

    pub fn start(&self) -> usize {
        self.groups[0].as_ref().map_or(0, |r| r.start)
    }

    pub fn end(&self) -> usize {
        self.groups[0].as_ref().map_or(0, |r| r.end)
    }

    pub fn get(&self, group: usize) -> Option<Range<usize>> {
        self.groups.get(group).cloned().flatten()
    }

    /// Text captured by `group`, if the group participated in the match
    pub fn text<'t>(&self, line: &'t str, group: usize) -> Option<&'t str> {
        self.get(group).and_then(|r| line.get(r))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

struct Compiled {
    source: String,
    /// One regex when the pattern has no position-dependent anchors,
    /// otherwise four, indexed by [`Anchors::variant`]
    variants: Vec<Regex>,
}

/// A compiled pattern, cheap to clone and safe to share between threads
#[derive(Clone)]
pub struct Matcher {
    inner: Arc<Compiled>,
}

impl Matcher {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let has_a = contains_escape(pattern, 'A');
        let has_g = contains_escape(pattern, 'G');

        let variants = if has_a || has_g {
            let mut variants = Vec::with_capacity(4);
            for variant in 0..4 {
                let mut source = pattern.to_string();
                if variant & 1 != 0 {
                    source = replace_escape(&source, 'A', DEAD_ANCHOR);
                }
                if variant & 2 != 0 {
                    source = replace_escape(&source, 'G', DEAD_ANCHOR);
                }
                variants.push(build(pattern, &source)?);
            }
            variants
        } else {
            vec![build(pattern, pattern)?]
        };

        Ok(Self {
            inner: Arc::new(Compiled {
                source: pattern.to_string(),
                variants,
            }),
        })
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Find the leftmost match starting at or after `from`.
    ///
    /// The whole of `text` stays visible to lookbehind, `^` and `\A`.
    pub fn search(&self, text: &str, from: usize, anchors: Anchors) -> Option<Captures> {
        if from > text.len() {
            return None;
        }
        let regex = if self.inner.variants.len() == 1 {
            &self.inner.variants[0]
        } else {
            &self.inner.variants[anchors.variant(from)]
        };

        let mut region = Region::new();
        regex.search_with_options(
            text,
            from,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        Some(Captures::from_region(&region))
    }

    /// Match only if the match starts exactly at `at`
    pub fn match_at(&self, text: &str, at: usize, anchors: Anchors) -> Option<Captures> {
        self.search(text, at, anchors)
            .filter(|captures| captures.start() == at)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Matcher").field(&self.inner.source).finish()
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.source == other.inner.source
    }
}

impl Eq for Matcher {}

fn build(original: &str, source: &str) -> Result<Regex, PatternError> {
    // Capture plain groups even when the pattern also has named groups
    Regex::with_options(
        source,
        RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
        Syntax::default(),
    )
    .map_err(|e| PatternError {
        pattern: original.to_string(),
        message: e.to_string(),
    })
}

/// Whether `pattern` contains the escape `\<which>` (an escaped backslash
/// followed by `which` does not count)
fn contains_escape(pattern: &str, which: char) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n) if n == which => return true,
                _ => {}
            }
        }
    }
    false
}

fn replace_escape(pattern: &str, which: char, replacement: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(n) if n == which => out.push_str(replacement),
            Some(n) => {
                out.push('\\');
                out.push(n);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Escape `text` so it matches literally inside an Oniguruma pattern
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_rejects_malformed_pattern() {
        let err = Matcher::compile("(unclosed").unwrap_err();
        assert_eq!(err.pattern, "(unclosed");
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_search_reports_group_ranges() {
        let m = Matcher::compile(r"(\w+)\s*(=)").unwrap();
        let caps = m.search("  name = 1", 0, Anchors::default()).unwrap();
        assert_eq!(caps.get(0), Some(2..8));
        assert_eq!(caps.get(1), Some(2..6));
        assert_eq!(caps.get(2), Some(7..8));
        assert_eq!(caps.text("  name = 1", 1), Some("name"));
    }

    #[test]
    fn test_lookbehind_sees_text_before_from() {
        let m = Matcher::compile(r"(?<=:\s*)x").unwrap();
        let caps = m.search("a:  x", 4, Anchors::default()).unwrap();
        assert_eq!(caps.start(), 4);
    }

    #[test]
    fn test_g_anchor_only_matches_at_anchor_position() {
        let m = Matcher::compile(r"(?!\G)").unwrap();
        // Anchor at the search position: the negative lookahead fails there
        let caps = m.search("abc", 1, Anchors::new(false, Some(1))).unwrap();
        assert_eq!(caps.start(), 2);
        // Anchor elsewhere: matches immediately
        let caps = m.search("abc", 1, Anchors::new(false, Some(0))).unwrap();
        assert_eq!(caps.start(), 1);
    }

    #[test]
    fn test_a_anchor_only_on_first_line() {
        let m = Matcher::compile(r"\Afoo").unwrap();
        assert!(m.search("foo", 0, Anchors::new(true, None)).is_some());
        assert!(m.search("foo", 0, Anchors::new(false, None)).is_none());
    }

    #[test]
    fn test_escaped_backslash_is_not_an_anchor() {
        assert!(!contains_escape(r"\\G", 'G'));
        assert!(contains_escape(r"a\G", 'G'));
        assert_eq!(replace_escape(r"\\G\G", 'G', "X"), r"\\GX");
    }

    #[test]
    fn test_match_at_requires_exact_start() {
        let m = Matcher::compile(">").unwrap();
        assert!(m.match_at("> a", 0, Anchors::default()).is_some());
        assert!(m.match_at(" > a", 0, Anchors::default()).is_none());
    }

    #[test]
    fn test_escape_literal_round_trips_through_onig() {
        let literal = "a.b(c)*[d] #e";
        let m = Matcher::compile(&escape_literal(literal)).unwrap();
        let caps = m.search("xx a.b(c)*[d] #e", 0, Anchors::default()).unwrap();
        assert_eq!(caps.get(0), Some(3..16));
    }
}
