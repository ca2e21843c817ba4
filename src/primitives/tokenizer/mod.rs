//! Line tokenizer
//!
//! Turns one line plus a [`StateStack`] into scoped tokens plus the stack for
//! the next line. Matching follows TextMate semantics: at every step the
//! candidate that matches earliest wins, ties go to the candidate declared
//! first, and the innermost region's end pattern competes with its nested
//! patterns.
//!
//! Each line is matched with a trailing `\n` whether or not it has one, since
//! grammars routinely anchor on it (`$`, `\n`, `(?=\n)`). Tokens are mapped
//! back onto the real terminator before they are returned.

mod stack;

pub use stack::StateStack;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;

use crate::config::TokenizerConfig;
use crate::lines_iter::strip_line_ending;
use crate::primitives::grammar::rule::{CaptureRules, Rule, RuleRef};
use crate::primitives::grammar::selector::{InjectionPrecedence, ScopeSelector};
use crate::primitives::grammar::{GrammarError, GrammarId, GrammarRegistry};
use crate::primitives::matcher::{Anchors, Captures, Matcher};
use crate::primitives::resolver::Resolver;
use stack::Frame;

/// A run of text and the full scope path that applies to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSpan {
    /// Outermost first, starting with the grammar's scope name
    pub scopes: Vec<String>,
    /// Byte range, relative to the line for [`Tokenizer::tokenize_line`] and
    /// to the document for [`GrammarRegistry::tokenize`]
    pub range: Range<usize>,
}

/// Collects contiguous tokens, dropping empty ones
#[derive(Debug)]
struct TokenAccumulator {
    tokens: Vec<TokenSpan>,
    last_end: usize,
}

impl TokenAccumulator {
    fn new(start: usize) -> Self {
        Self {
            tokens: Vec::new(),
            last_end: start,
        }
    }

    fn produce(&mut self, end: usize, scopes: &[String]) {
        if self.last_end >= end {
            return;
        }
        self.tokens.push(TokenSpan {
            scopes: scopes.to_vec(),
            range: self.last_end..end,
        });
        self.last_end = end;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// End pattern of the innermost region
    End,
    Rule(RuleRef),
}

#[derive(Debug)]
struct Found {
    candidate: Candidate,
    captures: Captures,
}

/// Tokenizer for documents in one grammar.
///
/// Holds a memo of expanded pattern lists, so reuse it across the lines of a
/// document. It borrows the registry snapshot it was created from.
pub struct Tokenizer<'r> {
    registry: &'r GrammarRegistry,
    base: GrammarId,
    config: TokenizerConfig,
    resolved: HashMap<RuleRef, Arc<[RuleRef]>>,
    injections: Vec<(ScopeSelector, Arc<[RuleRef]>)>,
}

impl<'r> Tokenizer<'r> {
    pub fn new(registry: &'r GrammarRegistry, scope: &str) -> Result<Self, GrammarError> {
        Self::with_config(registry, scope, TokenizerConfig::default())
    }

    pub fn with_config(
        registry: &'r GrammarRegistry,
        scope: &str,
        config: TokenizerConfig,
    ) -> Result<Self, GrammarError> {
        let base = registry
            .grammar_id(scope)
            .ok_or_else(|| GrammarError::UnknownScope(scope.to_string()))?;

        let resolver = Resolver::new(registry, base, config.include_depth_limit);
        let grammar = registry.grammar(base);
        let mut injections: Vec<(ScopeSelector, Arc<[RuleRef]>)> = grammar
            .injections()
            .iter()
            .map(|injection| {
                let rules = resolver.resolve_rule(RuleRef {
                    grammar: base,
                    rule: injection.rule,
                });
                (injection.selector.clone(), rules.into())
            })
            .collect();
        for (id, other) in registry.grammars() {
            if id == base {
                continue;
            }
            if let Some(selector) = other.injection_selector() {
                let rules = resolver.resolve(RuleRef {
                    grammar: id,
                    rule: other.root(),
                });
                injections.push((selector.clone(), rules.into()));
            }
        }

        Ok(Self {
            registry,
            base,
            config,
            resolved: HashMap::new(),
            injections,
        })
    }

    pub fn scope_name(&self) -> &str {
        self.registry.grammar(self.base).scope_name()
    }

    /// State for the first line of a document
    pub fn initial_state(&self) -> StateStack {
        let grammar = self.registry.grammar(self.base);
        StateStack::new(
            RuleRef {
                grammar: self.base,
                rule: grammar.root(),
            },
            grammar.scope_name(),
        )
    }

    /// Tokenize one line, terminator included.
    ///
    /// The returned tokens cover `line` exactly, left to right; the returned
    /// state is the one to pass with the next line.
    pub fn tokenize_line(
        &mut self,
        line: &str,
        state: &StateStack,
        is_first_line: bool,
    ) -> Result<(Vec<TokenSpan>, StateStack), GrammarError> {
        let content = strip_line_ending(line);
        let mut scan = String::with_capacity(content.len() + 1);
        scan.push_str(content);
        scan.push('\n');

        let (acc, mut next) = self.tokenize_from(state.clone(), &scan, 0, is_first_line, true)?;
        next.reset_positions();

        // Offsets past the content belong to the synthetic `\n`, which stands
        // for whatever terminator the line really has
        let remap = |offset: usize| {
            if offset <= content.len() {
                offset
            } else {
                line.len()
            }
        };
        let tokens = acc
            .tokens
            .into_iter()
            .filter_map(|mut token| {
                token.range = remap(token.range.start)..remap(token.range.end);
                (!token.range.is_empty()).then_some(token)
            })
            .collect();

        Ok((tokens, next))
    }

    fn tokenize_from(
        &mut self,
        mut stack: StateStack,
        line: &str,
        start: usize,
        is_first_line: bool,
        check_while: bool,
    ) -> Result<(TokenAccumulator, StateStack), GrammarError> {
        let registry = self.registry;
        let mut acc = TokenAccumulator::new(start);
        let mut search_from = start;
        let mut first_line = is_first_line;
        let mut anchor = None;

        if check_while {
            if stack.top().begin_captured_eol {
                anchor = Some(0);
            }
            self.check_while_conditions(
                &mut stack,
                line,
                &mut search_from,
                &mut anchor,
                &mut first_line,
                &mut acc,
            )?;
        }

        loop {
            let anchors = Anchors::new(first_line, anchor);
            let Some(found) = self.find_next(&stack, line, search_from, anchors) else {
                acc.produce(line.len(), stack.scopes());
                break;
            };

            let match_start = found.captures.start();
            let match_end = found.captures.end();
            let zero_width = match_start == match_end;
            tracing::trace!(
                candidate = ?found.candidate,
                match_start,
                match_end,
                depth = stack.depth(),
                "matched"
            );

            match found.candidate {
                Candidate::End => {
                    acc.produce(match_start, stack.scopes());
                    let top = stack.top_mut();
                    top.content_scopes = top.name_scopes.clone();
                    let name_scopes = top.name_scopes.clone();
                    let rule_ref = top.rule;
                    if let Rule::BeginEnd(rule) = registry.grammar(rule_ref.grammar).rule(rule_ref.rule) {
                        self.emit_captures(
                            &stack,
                            line,
                            rule_ref.grammar,
                            &rule.end_captures,
                            &found.captures,
                            first_line,
                            &mut acc,
                        )?;
                    }
                    acc.produce(match_end, &name_scopes);

                    search_from = match_end;
                    if let Some(popped) = stack.pop() {
                        anchor = popped.anchor_position;
                        if zero_width && popped.enter_position == Some(match_start) {
                            search_from = next_char_boundary(line, match_start);
                        }
                    }
                    if !zero_width {
                        first_line = false;
                    }
                }
                Candidate::Rule(rule_ref) => {
                    let rule = registry.grammar(rule_ref.grammar).rule(rule_ref.rule);
                    let is_region = matches!(rule, Rule::BeginEnd(_) | Rule::BeginWhile(_));

                    // Re-entering a region where it was just entered would never end
                    if zero_width && is_region && stack.entered_at(rule_ref, match_start) {
                        search_from = next_char_boundary(line, match_start);
                        continue;
                    }

                    acc.produce(match_start, stack.scopes());
                    let mut name_scopes = stack.scopes().to_vec();
                    if let Some(name) = rule.name() {
                        name_scopes.extend(name.expand(line, &found.captures));
                    }
                    stack.push(Frame {
                        rule: rule_ref,
                        name_scopes: name_scopes.clone(),
                        content_scopes: name_scopes.clone(),
                        end: None,
                        begin_captured_eol: match_end == line.len(),
                        anchor_position: anchor,
                        enter_position: Some(match_start),
                    });

                    let region = match rule {
                        Rule::BeginEnd(r) => Some((&r.end, &r.begin_captures)),
                        Rule::BeginWhile(r) => Some((&r.while_, &r.begin_captures)),
                        _ => None,
                    };

                    if let Rule::Match(rule) = rule {
                        self.emit_captures(
                            &stack,
                            line,
                            rule_ref.grammar,
                            &rule.captures,
                            &found.captures,
                            first_line,
                            &mut acc,
                        )?;
                        acc.produce(match_end, &name_scopes);
                        stack.pop();
                    } else if let Some((template, begin_captures)) = region {
                        self.emit_captures(
                            &stack,
                            line,
                            rule_ref.grammar,
                            begin_captures,
                            &found.captures,
                            first_line,
                            &mut acc,
                        )?;
                        acc.produce(match_end, &name_scopes);
                        anchor = Some(match_end);

                        let end = template.instantiate(line, &found.captures).map_err(|source| {
                            GrammarError::InvalidPattern {
                                scope: registry.grammar(rule_ref.grammar).scope_name().to_string(),
                                rule: format!("rule {} end", rule_ref.rule.0),
                                source,
                            }
                        })?;
                        let mut content_scopes = name_scopes;
                        if let Some(content_name) = rule.content_name() {
                            content_scopes.extend(content_name.expand(line, &found.captures));
                        }
                        let top = stack.top_mut();
                        top.content_scopes = content_scopes;
                        top.end = Some(end);
                    } else {
                        // Resolution only ever yields rules with a scan pattern
                        stack.pop();
                    }

                    if zero_width {
                        search_from = match_start;
                        if !is_region {
                            search_from = next_char_boundary(line, match_start);
                        }
                    } else {
                        search_from = match_end;
                        first_line = false;
                    }
                }
            }
        }

        Ok((acc, stack))
    }

    /// Pop every begin/while region whose while pattern no longer matches at
    /// the start of this line. The failing line stays with the shallower stack.
    fn check_while_conditions(
        &mut self,
        stack: &mut StateStack,
        line: &str,
        pos: &mut usize,
        anchor: &mut Option<usize>,
        first_line: &mut bool,
        acc: &mut TokenAccumulator,
    ) -> Result<(), GrammarError> {
        let registry = self.registry;
        let mut index = 1;
        while index < stack.frames.len() {
            let frame = &stack.frames[index];
            let Rule::BeginWhile(rule) = registry.grammar(frame.rule.grammar).rule(frame.rule.rule)
            else {
                index += 1;
                continue;
            };
            let Some(matcher) = frame.end.clone() else {
                index += 1;
                continue;
            };

            match matcher.match_at(line, *pos, Anchors::new(*first_line, *anchor)) {
                Some(captures) => {
                    let scopes = frame.content_scopes.clone();
                    let grammar = frame.rule.grammar;
                    acc.produce(captures.start(), &scopes);

                    let mut while_stack = stack.clone();
                    while_stack.frames.truncate(index + 1);
                    self.emit_captures(
                        &while_stack,
                        line,
                        grammar,
                        &rule.while_captures,
                        &captures,
                        *first_line,
                        acc,
                    )?;
                    acc.produce(captures.end(), &scopes);

                    if captures.end() > *pos {
                        *pos = captures.end();
                        *anchor = Some(*pos);
                        *first_line = false;
                    }
                    index += 1;
                }
                None => {
                    tracing::trace!(depth = index, "while condition failed");
                    stack.truncate_at(index);
                    break;
                }
            }
        }
        Ok(())
    }

    fn find_next(
        &mut self,
        stack: &StateStack,
        line: &str,
        from: usize,
        anchors: Anchors,
    ) -> Option<Found> {
        let registry = self.registry;
        let top = stack.top();
        let rule = registry.grammar(top.rule.grammar).rule(top.rule.rule);
        let end = match rule {
            Rule::BeginEnd(_) => top.end.as_ref(),
            _ => None,
        };
        let end_last = self
            .config
            .end_pattern_priority
            .end_last(rule.apply_end_pattern_last());
        let patterns = self.patterns_for(top.rule);

        let mut best: Option<Found> = None;
        let mut consider = |candidate: Candidate, matcher: &Matcher| {
            if best.as_ref().is_some_and(|b| b.captures.start() == from) {
                return;
            }
            if let Some(captures) = matcher.search(line, from, anchors) {
                if best
                    .as_ref()
                    .map_or(true, |b| captures.start() < b.captures.start())
                {
                    best = Some(Found {
                        candidate,
                        captures,
                    });
                }
            }
        };

        if !end_last {
            if let Some(end) = end {
                consider(Candidate::End, end);
            }
        }
        for rule_ref in patterns.iter() {
            let rule = registry.grammar(rule_ref.grammar).rule(rule_ref.rule);
            if let Some(matcher) = rule.scan_matcher() {
                consider(Candidate::Rule(*rule_ref), matcher);
            }
        }
        if end_last {
            if let Some(end) = end {
                consider(Candidate::End, end);
            }
        }

        let injected = self.find_injection(&top.content_scopes, line, from, anchors);
        match (best, injected) {
            (best, None) => best,
            (None, Some((_, injected))) => Some(injected),
            (Some(best), Some((precedence, injected))) => {
                let injected_start = injected.captures.start();
                let best_start = best.captures.start();
                if injected_start < best_start
                    || (injected_start == best_start && precedence == InjectionPrecedence::Left)
                {
                    Some(injected)
                } else {
                    Some(best)
                }
            }
        }
    }

    fn find_injection(
        &self,
        scopes: &[String],
        line: &str,
        from: usize,
        anchors: Anchors,
    ) -> Option<(InjectionPrecedence, Found)> {
        let registry = self.registry;
        let mut best: Option<(InjectionPrecedence, Found)> = None;
        for (selector, rules) in &self.injections {
            let Some(precedence) = selector.matches(scopes) else {
                continue;
            };
            for rule_ref in rules.iter() {
                let rule = registry.grammar(rule_ref.grammar).rule(rule_ref.rule);
                let Some(captures) = rule
                    .scan_matcher()
                    .and_then(|m| m.search(line, from, anchors))
                else {
                    continue;
                };
                if best
                    .as_ref()
                    .map_or(true, |(_, b)| captures.start() < b.captures.start())
                {
                    best = Some((
                        precedence,
                        Found {
                            candidate: Candidate::Rule(*rule_ref),
                            captures,
                        },
                    ));
                }
            }
        }
        best
    }

    /// Concrete rules nested in `owner`, expanded on first use
    fn patterns_for(&mut self, owner: RuleRef) -> Arc<[RuleRef]> {
        if let Some(rules) = self.resolved.get(&owner) {
            return rules.clone();
        }
        let resolver = Resolver::new(self.registry, self.base, self.config.include_depth_limit);
        let rules: Arc<[RuleRef]> = resolver.resolve(owner).into();
        self.resolved.insert(owner, rules.clone());
        rules
    }

    /// Emit tokens for the captures of a match whose scopes are the top of `stack`
    #[allow(clippy::too_many_arguments)]
    fn emit_captures(
        &mut self,
        stack: &StateStack,
        line: &str,
        grammar: GrammarId,
        rules: &CaptureRules,
        captures: &Captures,
        first_line: bool,
        acc: &mut TokenAccumulator,
    ) -> Result<(), GrammarError> {
        if rules.is_empty() {
            return Ok(());
        }

        // (scopes, end) of captures that are still open
        let mut open: Vec<(Vec<String>, usize)> = Vec::with_capacity(2);

        for (index, rule) in rules.iter().enumerate() {
            let Some(rule) = rule else {
                continue;
            };
            let Some(range) = captures.get(index) else {
                continue;
            };
            if range.is_empty() {
                continue;
            }

            while let Some((scopes, end)) = open.last() {
                if *end > range.start {
                    break;
                }
                acc.produce(*end, scopes);
                open.pop();
            }

            let base = open
                .last()
                .map(|(scopes, _)| scopes.clone())
                .unwrap_or_else(|| stack.scopes().to_vec());
            acc.produce(range.start, &base);

            if let Some(patterns) = rule.patterns {
                // Tokenize the captured text with the capture's own patterns
                let mut name_scopes = base;
                if let Some(name) = &rule.name {
                    name_scopes.extend(name.expand(line, captures));
                }
                let mut content_scopes = name_scopes.clone();
                if let Some(content_name) = &rule.content_name {
                    content_scopes.extend(content_name.expand(line, captures));
                }
                let mut nested = stack.clone();
                nested.push(Frame {
                    rule: RuleRef {
                        grammar,
                        rule: patterns,
                    },
                    name_scopes,
                    content_scopes,
                    end: None,
                    begin_captured_eol: false,
                    anchor_position: None,
                    enter_position: Some(range.start),
                });
                let (inner, _) = self.tokenize_from(
                    nested,
                    &line[..range.end],
                    range.start,
                    first_line && range.start == 0,
                    false,
                )?;
                for token in inner.tokens {
                    acc.produce(token.range.end, &token.scopes);
                }
                continue;
            }

            if let Some(name) = &rule.name {
                let expanded = name.expand(line, captures);
                if !expanded.is_empty() {
                    let mut scopes = base;
                    scopes.extend(expanded);
                    open.push((scopes, range.end));
                }
            }
        }

        while let Some((scopes, end)) = open.pop() {
            acc.produce(end, &scopes);
        }
        Ok(())
    }
}

fn next_char_boundary(text: &str, at: usize) -> usize {
    text[at..]
        .chars()
        .next()
        .map_or(at + 1, |c| at + c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::grammar::GrammarDescriptor;

    fn registry(json: &str) -> GrammarRegistry {
        GrammarRegistry::default()
            .register(vec![GrammarDescriptor::from_json(json).unwrap()])
            .unwrap()
    }

    fn texts<'a>(line: &'a str, tokens: &[TokenSpan]) -> Vec<(&'a str, String)> {
        tokens
            .iter()
            .map(|t| (&line[t.range.clone()], t.scopes.join(" ")))
            .collect()
    }

    #[test]
    fn test_match_with_captures() {
        let reg = registry(
            r#"{"scopeName": "source.t", "patterns": [{
                "match": "(\\w+)\\s*(=)",
                "name": "meta.assign",
                "captures": {"1": {"name": "variable"}, "2": {"name": "keyword.operator"}}
            }]}"#,
        );
        let mut tokenizer = Tokenizer::new(&reg, "source.t").unwrap();
        let state = tokenizer.initial_state();
        let line = "x = 1\n";
        let (tokens, _) = tokenizer.tokenize_line(line, &state, true).unwrap();
        assert_eq!(
            texts(line, &tokens),
            vec![
                ("x", "source.t meta.assign variable".to_string()),
                (" ", "source.t meta.assign".to_string()),
                ("=", "source.t meta.assign keyword.operator".to_string()),
                (" 1\n", "source.t".to_string()),
            ]
        );
    }

    #[test]
    fn test_region_spans_lines() {
        let reg = registry(
            r#"{"scopeName": "source.t", "patterns": [{
                "begin": "/\\*", "end": "\\*/", "name": "comment.block",
                "contentName": "comment.content"
            }]}"#,
        );
        let mut tokenizer = Tokenizer::new(&reg, "source.t").unwrap();
        let state = tokenizer.initial_state();

        let (tokens, state) = tokenizer.tokenize_line("a /* b\n", &state, true).unwrap();
        assert_eq!(state.depth(), 1);
        assert_eq!(
            texts("a /* b\n", &tokens),
            vec![
                ("a ", "source.t".to_string()),
                ("/*", "source.t comment.block".to_string()),
                (" b\n", "source.t comment.block comment.content".to_string()),
            ]
        );

        let (tokens, state) = tokenizer.tokenize_line("c */ d", &state, false).unwrap();
        assert_eq!(state.depth(), 0);
        assert_eq!(
            texts("c */ d", &tokens),
            vec![
                ("c ", "source.t comment.block comment.content".to_string()),
                ("*/", "source.t comment.block".to_string()),
                (" d", "source.t".to_string()),
            ]
        );
    }

    #[test]
    fn test_crlf_terminator_is_covered() {
        let reg = registry(
            r##"{"scopeName": "source.t", "patterns": [{"match": "#.*$", "name": "comment"}]}"##,
        );
        let mut tokenizer = Tokenizer::new(&reg, "source.t").unwrap();
        let state = tokenizer.initial_state();
        let line = "x # c\r\n";
        let (tokens, _) = tokenizer.tokenize_line(line, &state, true).unwrap();
        assert_eq!(
            texts(line, &tokens),
            vec![
                ("x ", "source.t".to_string()),
                ("# c", "source.t comment".to_string()),
                ("\r\n", "source.t".to_string()),
            ]
        );
    }

    #[test]
    fn test_zero_width_match_makes_progress() {
        let reg = registry(
            r#"{"scopeName": "source.t", "patterns": [
                {"match": "(?=b)", "name": "meta.lookahead"},
                {"begin": "(?=a)", "end": "(?=a)|$", "name": "meta.region"}
            ]}"#,
        );
        let mut tokenizer = Tokenizer::new(&reg, "source.t").unwrap();
        let state = tokenizer.initial_state();
        let line = "abab\n";
        let (tokens, _) = tokenizer.tokenize_line(line, &state, true).unwrap();
        let covered: String = tokens.iter().map(|t| &line[t.range.clone()]).collect();
        assert_eq!(covered, line);
    }

    #[test]
    fn test_unknown_scope() {
        let reg = registry(r#"{"scopeName": "source.t", "patterns": []}"#);
        assert!(matches!(
            Tokenizer::new(&reg, "source.nope"),
            Err(GrammarError::UnknownScope(scope)) if scope == "source.nope"
        ));
    }

    #[test]
    fn test_capture_patterns_retokenize_captured_text() {
        let reg = registry(
            r#"{"scopeName": "source.t", "patterns": [{
                "match": "\\[([^\\]]*)\\]",
                "name": "meta.list",
                "captures": {"1": {"patterns": [{"match": "\\d+", "name": "constant.numeric"}]}}
            }]}"#,
        );
        let mut tokenizer = Tokenizer::new(&reg, "source.t").unwrap();
        let state = tokenizer.initial_state();
        let line = "[1,22]";
        let (tokens, _) = tokenizer.tokenize_line(line, &state, true).unwrap();
        assert_eq!(
            texts(line, &tokens),
            vec![
                ("[", "source.t meta.list".to_string()),
                ("1", "source.t meta.list constant.numeric".to_string()),
                (",", "source.t meta.list".to_string()),
                ("22", "source.t meta.list constant.numeric".to_string()),
                ("]", "source.t meta.list".to_string()),
            ]
        );
    }

    #[test]
    fn test_zero_width_begin_ahead_of_cursor() {
        // The region opens at `#`, not at the cursor, so its `\G` end only
        // holds from the comment's end onwards
        let reg = registry(
            r##"{"scopeName": "source.t", "patterns": [{
                "begin": "(?=#)", "end": "(?!\\G)", "name": "region",
                "patterns": [{"match": "#[^\\n]*", "name": "comment"}]
            }]}"##,
        );
        let mut tokenizer = Tokenizer::new(&reg, "source.t").unwrap();
        let state = tokenizer.initial_state();
        let line = "a # c\n";
        let (tokens, end_state) = tokenizer.tokenize_line(line, &state, true).unwrap();
        assert_eq!(
            texts(line, &tokens),
            vec![
                ("a ", "source.t".to_string()),
                ("# c", "source.t region comment".to_string()),
                ("\n", "source.t".to_string()),
            ]
        );
        assert_eq!(end_state.depth(), state.depth());
    }
}
