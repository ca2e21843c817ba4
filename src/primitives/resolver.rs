//! Include expansion.
//!
//! A rule's nested patterns are expanded into the flat, ordered list of
//! rules that can actually match (Match, BeginEnd, BeginWhile). Expansion is
//! done for one frame at a time, when the tokenizer first scans inside it,
//! so grammars that include themselves never need to be flattened.

use std::collections::HashSet;

use crate::primitives::grammar::rule::{IncludeRule, IncludeTarget, Rule, RuleRef};
use crate::primitives::grammar::{GrammarId, GrammarRegistry};

/// Default bound on nested includes followed by a single expansion
pub const DEFAULT_INCLUDE_DEPTH_LIMIT: usize = 64;

pub struct Resolver<'r> {
    registry: &'r GrammarRegistry,
    /// Grammar `$base` refers to
    base: GrammarId,
    depth_limit: usize,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r GrammarRegistry, base: GrammarId, depth_limit: usize) -> Self {
        Self {
            registry,
            base,
            depth_limit,
        }
    }

    /// Concrete rules tried while inside `owner`, in priority order
    pub fn resolve(&self, owner: RuleRef) -> Vec<RuleRef> {
        let grammar = self.registry.grammar(owner.grammar);
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        for id in grammar.rule(owner.rule).nested() {
            self.expand(
                RuleRef {
                    grammar: owner.grammar,
                    rule: *id,
                },
                0,
                &mut visited,
                &mut out,
            );
        }
        out
    }

    /// Concrete rules `rule` stands for, including `rule` itself when it
    /// can match on its own
    pub fn resolve_rule(&self, rule: RuleRef) -> Vec<RuleRef> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.expand(rule, 0, &mut visited, &mut out);
        out
    }

    fn expand(
        &self,
        rule_ref: RuleRef,
        depth: usize,
        visited: &mut HashSet<RuleRef>,
        out: &mut Vec<RuleRef>,
    ) {
        if depth > self.depth_limit {
            tracing::warn!(
                "include depth limit {} reached in `{}`",
                self.depth_limit,
                self.registry.grammar(rule_ref.grammar).scope_name()
            );
            return;
        }

        let grammar = self.registry.grammar(rule_ref.grammar);
        match grammar.rule(rule_ref.rule) {
            Rule::Include(include) => {
                let Some(target) = self.target(rule_ref.grammar, include) else {
                    return;
                };
                match self.registry.grammar(target.grammar).rule(target.rule) {
                    // Cuts cycles, and a rule set spliced in twice could never win the second time
                    Rule::Include(_) | Rule::Patterns(_) => {
                        if visited.insert(target) {
                            self.expand(target, depth + 1, visited, out);
                        }
                    }
                    _ => self.expand(target, depth + 1, visited, out),
                }
            }
            Rule::Patterns(patterns) => {
                for id in &patterns.patterns {
                    self.expand(
                        RuleRef {
                            grammar: rule_ref.grammar,
                            rule: *id,
                        },
                        depth + 1,
                        visited,
                        out,
                    );
                }
            }
            Rule::Match(_) | Rule::BeginEnd(_) | Rule::BeginWhile(_) => {
                if visited.insert(rule_ref) {
                    out.push(rule_ref);
                }
            }
        }
    }

    fn target(&self, owner: GrammarId, include: &IncludeRule) -> Option<RuleRef> {
        let grammar = self.registry.grammar(owner);
        let target = match &include.target {
            IncludeTarget::Local(name) => grammar.lookup(include.repository, name).map(|rule| {
                RuleRef {
                    grammar: owner,
                    rule,
                }
            }),
            IncludeTarget::SelfGrammar => Some(RuleRef {
                grammar: owner,
                rule: grammar.root(),
            }),
            IncludeTarget::Base => Some(RuleRef {
                grammar: self.base,
                rule: self.registry.grammar(self.base).root(),
            }),
            IncludeTarget::Scope(scope) => self.registry.grammar_id(scope).map(|id| RuleRef {
                grammar: id,
                rule: self.registry.grammar(id).root(),
            }),
            IncludeTarget::ScopeRule { scope, name } => {
                self.registry.grammar_id(scope).and_then(|id| {
                    self.registry
                        .grammar(id)
                        .repository_rule(name)
                        .map(|rule| RuleRef { grammar: id, rule })
                })
            }
        };

        if target.is_none() {
            tracing::warn!(
                "unresolved include {:?} in `{}`",
                include.target,
                grammar.scope_name()
            );
        }
        target
    }
}
