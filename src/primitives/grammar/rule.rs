//! Compiled grammar model.
//!
//! Rules live in a per-grammar arena and reference each other by [`RuleId`];
//! includes stay symbolic (`#name`, `$self`, a scope name) and are looked up
//! by name when the tokenizer needs them, so self-referential grammars need
//! no cycle handling at compile time.
//!
//! Every regex is compiled here, which is what makes a bad pattern fail
//! registration instead of tokenizing incorrectly later.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;

use super::descriptor::{GrammarDescriptor, RawCaptures, RawRule};
use super::error::GrammarError;
use super::selector::ScopeSelector;
use crate::primitives::matcher::{escape_literal, Anchors, Captures, Matcher, PatternError};

/// `\1`, `\2`, ... inside an end or while pattern
static BACKREFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(\d+)").expect("backreference regex is valid"));

/// `$1` or `${1:/downcase}` inside a scope name
static CAPTURE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(\d+)|\$\{(\d+):/(downcase|upcase)\}").expect("placeholder regex is valid")
});

/// Stand-in for a backreference when validating a pattern at registration
const BACKREFERENCE_PLACEHOLDER: &str = "\u{FFFF}";

/// Index of a grammar inside a registry snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrammarId(pub(crate) usize);

/// Index of a rule inside its grammar's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) usize);

/// A rule anywhere in a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

/// Index of a lexical repository inside its grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepoId(usize);

#[derive(Debug)]
struct Repository {
    parent: Option<RepoId>,
    entries: HashMap<String, RuleId>,
}

/// What an `include` points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeTarget {
    /// `#name`, looked up in the enclosing repositories
    Local(String),
    /// `$self`: the owning grammar's top-level patterns
    SelfGrammar,
    /// `$base`: the top-level patterns of the grammar the document started in
    Base,
    /// `scope.name`: another grammar's top-level patterns
    Scope(String),
    /// `scope.name#name`: a repository entry of another grammar
    ScopeRule { scope: String, name: String },
}

impl IncludeTarget {
    pub fn parse(reference: &str) -> Self {
        match reference {
            "$self" => IncludeTarget::SelfGrammar,
            "$base" => IncludeTarget::Base,
            _ => {
                if let Some(name) = reference.strip_prefix('#') {
                    IncludeTarget::Local(name.to_string())
                } else if let Some((scope, name)) = reference.split_once('#') {
                    IncludeTarget::ScopeRule {
                        scope: scope.to_string(),
                        name: name.to_string(),
                    }
                } else {
                    IncludeTarget::Scope(reference.to_string())
                }
            }
        }
    }

    /// Foreign scope this target depends on, if any
    fn foreign_scope(&self) -> Option<&str> {
        match self {
            IncludeTarget::Scope(scope) | IncludeTarget::ScopeRule { scope, .. } => Some(scope),
            _ => None,
        }
    }
}

/// A scope name, possibly with `$n` placeholders filled from the match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeName {
    template: String,
    dynamic: bool,
}

impl ScopeName {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            dynamic: CAPTURE_PLACEHOLDER.is_match(template),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Scopes this name contributes for a match; a name with spaces yields several
    pub fn expand(&self, line: &str, captures: &Captures) -> Vec<String> {
        if !self.dynamic {
            return self
                .template
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }

        let expanded = CAPTURE_PLACEHOLDER.replace_all(&self.template, |c: &regex::Captures| {
            let index = c
                .get(1)
                .or_else(|| c.get(2))
                .and_then(|m| m.as_str().parse::<usize>().ok());
            let Some(text) = index.and_then(|i| captures.text(line, i)) else {
                return c[0].to_string();
            };
            let text = text.trim_start_matches('.');
            match c.get(3).map(|m| m.as_str()) {
                Some("downcase") => text.to_lowercase(),
                Some("upcase") => text.to_uppercase(),
                _ => text.to_string(),
            }
        });
        expanded.split_whitespace().map(str::to_string).collect()
    }
}

/// An end or while pattern. When it backreferences begin captures it is
/// compiled per region, once the captured text is known.
#[derive(Debug, Clone)]
pub struct EndTemplate {
    source: String,
    compiled: Option<Matcher>,
}

impl EndTemplate {
    fn compile(source: &str) -> Result<Self, PatternError> {
        if BACKREFERENCE.is_match(source) {
            // Validate the shape now; the real pattern is built when a region opens
            let probe = BACKREFERENCE.replace_all(source, BACKREFERENCE_PLACEHOLDER);
            Matcher::compile(&probe).map_err(|e| PatternError {
                pattern: source.to_string(),
                message: e.message,
            })?;
            Ok(Self {
                source: source.to_string(),
                compiled: None,
            })
        } else {
            Ok(Self {
                source: source.to_string(),
                compiled: Some(Matcher::compile(source)?),
            })
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_backreferences(&self) -> bool {
        self.compiled.is_none()
    }

    /// Matcher for a region opened by `begin` on `line`
    pub fn instantiate(&self, line: &str, begin: &Captures) -> Result<Matcher, PatternError> {
        if let Some(compiled) = &self.compiled {
            return Ok(compiled.clone());
        }
        let resolved = BACKREFERENCE.replace_all(&self.source, |c: &regex::Captures| {
            c[1].parse::<usize>()
                .ok()
                .and_then(|i| begin.text(line, i))
                .map(escape_literal)
                .unwrap_or_default()
        });
        Matcher::compile(&resolved)
    }
}

/// Rule applied to one capture group
#[derive(Debug, Clone)]
pub struct CaptureRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    /// Patterns re-tokenizing the captured text, as a [`Rule::Patterns`] rule
    pub patterns: Option<RuleId>,
}

/// Capture rules indexed by group number; gaps keep the parent scope
pub type CaptureRules = Vec<Option<CaptureRule>>;

#[derive(Debug, Clone)]
pub struct MatchRule {
    pub name: Option<ScopeName>,
    pub matcher: Matcher,
    pub captures: CaptureRules,
}

#[derive(Debug, Clone)]
pub struct BeginEndRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: Matcher,
    pub end: EndTemplate,
    pub begin_captures: CaptureRules,
    pub end_captures: CaptureRules,
    pub patterns: Vec<RuleId>,
    pub apply_end_pattern_last: bool,
}

#[derive(Debug, Clone)]
pub struct BeginWhileRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: Matcher,
    pub while_: EndTemplate,
    pub begin_captures: CaptureRules,
    pub while_captures: CaptureRules,
    pub patterns: Vec<RuleId>,
}

#[derive(Debug, Clone)]
pub struct IncludeRule {
    pub target: IncludeTarget,
    /// Repository `#name` lookups start from
    pub repository: RepoId,
}

/// A rule that only groups other rules, e.g. `{"patterns": [...]}`
#[derive(Debug, Clone)]
pub struct PatternsRule {
    pub patterns: Vec<RuleId>,
}

#[derive(Debug, Clone)]
pub enum Rule {
    Include(IncludeRule),
    Match(MatchRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Patterns(PatternsRule),
}

impl Rule {
    /// The pattern that selects this rule while scanning: `match` or `begin`
    pub fn scan_matcher(&self) -> Option<&Matcher> {
        match self {
            Rule::Match(r) => Some(&r.matcher),
            Rule::BeginEnd(r) => Some(&r.begin),
            Rule::BeginWhile(r) => Some(&r.begin),
            Rule::Include(_) | Rule::Patterns(_) => None,
        }
    }

    pub fn name(&self) -> Option<&ScopeName> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Include(_) | Rule::Patterns(_) => None,
        }
    }

    pub fn content_name(&self) -> Option<&ScopeName> {
        match self {
            Rule::BeginEnd(r) => r.content_name.as_ref(),
            Rule::BeginWhile(r) => r.content_name.as_ref(),
            _ => None,
        }
    }

    /// Rules tried while inside this rule
    pub fn nested(&self) -> &[RuleId] {
        match self {
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            Rule::Patterns(r) => &r.patterns,
            Rule::Include(_) | Rule::Match(_) => &[],
        }
    }

    pub fn apply_end_pattern_last(&self) -> bool {
        matches!(self, Rule::BeginEnd(r) if r.apply_end_pattern_last)
    }
}

/// A rule set injected where its selector matches the scope path
#[derive(Debug, Clone)]
pub struct Injection {
    pub selector: ScopeSelector,
    pub rule: RuleId,
}

/// A compiled, immutable grammar
#[derive(Debug)]
pub struct Grammar {
    scope_name: String,
    names: Vec<String>,
    extensions: Vec<String>,
    extensions_with_dot: Vec<String>,
    first_line_match: Option<Matcher>,
    rules: Vec<Rule>,
    repositories: Vec<Repository>,
    root: RuleId,
    root_repository: RepoId,
    injections: Vec<Injection>,
    injection_selector: Option<ScopeSelector>,
    dependencies: BTreeSet<String>,
}

impl Grammar {
    pub fn compile(descriptor: &GrammarDescriptor) -> Result<Self, GrammarError> {
        let scope = descriptor.scope_name.trim();
        if scope.is_empty() {
            return Err(GrammarError::MalformedGrammar {
                scope: String::new(),
                rule: "scopeName".to_string(),
                reason: "missing scope name".to_string(),
            });
        }

        let mut compiler = Compiler::new(scope);
        let root_repository = compiler.repository(None, &descriptor.repository, "repository")?;
        let patterns = compiler.patterns(Some(&descriptor.patterns), root_repository, "")?;
        let root = compiler.alloc(Rule::Patterns(PatternsRule { patterns }));

        let mut injections = Vec::with_capacity(descriptor.injections.len());
        for (selector, raw) in &descriptor.injections {
            let rule = compiler.rule(raw, root_repository, &child("injections", selector))?;
            injections.push(Injection {
                selector: ScopeSelector::parse(selector),
                rule,
            });
        }

        let first_line_match = descriptor
            .first_line_match
            .as_deref()
            .map(|p| compiler.matcher(p, "firstLineMatch"))
            .transpose()?;

        let mut dependencies = compiler.dependencies;
        dependencies.extend(
            descriptor
                .dependencies
                .iter()
                .filter(|d| d.as_str() != scope)
                .cloned(),
        );

        Ok(Self {
            scope_name: scope.to_string(),
            names: descriptor.names.clone(),
            extensions: descriptor.extensions.clone(),
            extensions_with_dot: descriptor.extensions_with_dot.clone(),
            first_line_match,
            rules: compiler.rules,
            repositories: compiler.repositories,
            root,
            root_repository,
            injections,
            injection_selector: descriptor
                .injection_selector
                .as_deref()
                .map(ScopeSelector::parse),
            dependencies,
        })
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn extensions_with_dot(&self) -> &[String] {
        &self.extensions_with_dot
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    /// Rule holding the top-level patterns
    pub fn root(&self) -> RuleId {
        self.root
    }

    /// Look `name` up starting at `repository` and walking outwards
    pub fn lookup(&self, repository: RepoId, name: &str) -> Option<RuleId> {
        let mut current = Some(repository);
        while let Some(id) = current {
            let repo = &self.repositories[id.0];
            if let Some(rule) = repo.entries.get(name) {
                return Some(*rule);
            }
            current = repo.parent;
        }
        None
    }

    /// Top-level repository entry, used by `scope#name` includes
    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.repositories[self.root_repository.0]
            .entries
            .get(name)
            .copied()
    }

    /// Foreign scopes referenced by includes, plus declared dependencies
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    pub fn injection_selector(&self) -> Option<&ScopeSelector> {
        self.injection_selector.as_ref()
    }

    pub fn matches_first_line(&self, line: &str) -> bool {
        self.first_line_match
            .as_ref()
            .is_some_and(|m| m.search(line, 0, Anchors::new(true, Some(0))).is_some())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

struct Compiler<'s> {
    scope: &'s str,
    rules: Vec<Rule>,
    repositories: Vec<Repository>,
    dependencies: BTreeSet<String>,
}

impl<'s> Compiler<'s> {
    fn new(scope: &'s str) -> Self {
        Self {
            scope,
            rules: Vec::new(),
            repositories: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    fn alloc(&mut self, rule: Rule) -> RuleId {
        self.rules.push(rule);
        RuleId(self.rules.len() - 1)
    }

    fn repository(
        &mut self,
        parent: Option<RepoId>,
        entries: &BTreeMap<String, RawRule>,
        path: &str,
    ) -> Result<RepoId, GrammarError> {
        let id = RepoId(self.repositories.len());
        self.repositories.push(Repository {
            parent,
            entries: HashMap::with_capacity(entries.len()),
        });
        for (name, raw) in entries {
            let rule = self.rule(raw, id, &child(path, name))?;
            self.repositories[id.0].entries.insert(name.clone(), rule);
        }
        Ok(id)
    }

    fn rule(&mut self, raw: &RawRule, repo: RepoId, path: &str) -> Result<RuleId, GrammarError> {
        let repo = match &raw.repository {
            Some(entries) if !entries.is_empty() => {
                self.repository(Some(repo), entries, &child(path, "repository"))?
            }
            _ => repo,
        };

        if let Some(reference) = &raw.include {
            let target = IncludeTarget::parse(reference);
            if let Some(scope) = target.foreign_scope() {
                if scope != self.scope {
                    self.dependencies.insert(scope.to_string());
                }
            }
            return Ok(self.alloc(Rule::Include(IncludeRule {
                target,
                repository: repo,
            })));
        }

        let name = raw.name.as_deref().map(ScopeName::new);
        let content_name = raw.content_name.as_deref().map(ScopeName::new);

        if let Some(pattern) = &raw.match_ {
            if raw.begin.is_some() {
                return Err(self.malformed(path, "rule has both `match` and `begin`"));
            }
            let matcher = self.matcher(pattern, &child(path, "match"))?;
            let captures = self.captures(raw.captures.as_ref(), repo, &child(path, "captures"))?;
            return Ok(self.alloc(Rule::Match(MatchRule {
                name,
                matcher,
                captures,
            })));
        }

        if let Some(begin) = &raw.begin {
            let begin = self.matcher(begin, &child(path, "begin"))?;
            let begin_captures = self.captures(
                raw.begin_captures.as_ref().or(raw.captures.as_ref()),
                repo,
                &child(path, "beginCaptures"),
            )?;
            let patterns = self.patterns(raw.patterns.as_ref(), repo, path)?;

            return match (&raw.end, &raw.while_) {
                (Some(end), None) => {
                    let end = self.template(end, &child(path, "end"))?;
                    let end_captures = self.captures(
                        raw.end_captures.as_ref().or(raw.captures.as_ref()),
                        repo,
                        &child(path, "endCaptures"),
                    )?;
                    Ok(self.alloc(Rule::BeginEnd(BeginEndRule {
                        name,
                        content_name,
                        begin,
                        end,
                        begin_captures,
                        end_captures,
                        patterns,
                        apply_end_pattern_last: raw.apply_end_pattern_last,
                    })))
                }
                (None, Some(while_)) => {
                    let while_ = self.template(while_, &child(path, "while"))?;
                    let while_captures = self.captures(
                        raw.while_captures.as_ref().or(raw.captures.as_ref()),
                        repo,
                        &child(path, "whileCaptures"),
                    )?;
                    Ok(self.alloc(Rule::BeginWhile(BeginWhileRule {
                        name,
                        content_name,
                        begin,
                        while_,
                        begin_captures,
                        while_captures,
                        patterns,
                    })))
                }
                (Some(_), Some(_)) => Err(self.malformed(path, "rule has both `end` and `while`")),
                (None, None) => Err(self.malformed(path, "`begin` without `end` or `while`")),
            };
        }

        if raw.end.is_some() || raw.while_.is_some() {
            return Err(self.malformed(path, "`end` or `while` without `begin`"));
        }

        let patterns = self.patterns(raw.patterns.as_ref(), repo, path)?;
        Ok(self.alloc(Rule::Patterns(PatternsRule { patterns })))
    }

    fn patterns(
        &mut self,
        raw: Option<&Vec<RawRule>>,
        repo: RepoId,
        path: &str,
    ) -> Result<Vec<RuleId>, GrammarError> {
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        raw.iter()
            .enumerate()
            .map(|(i, r)| self.rule(r, repo, &child(path, &format!("patterns[{i}]"))))
            .collect()
    }

    fn captures(
        &mut self,
        raw: Option<&RawCaptures>,
        repo: RepoId,
        path: &str,
    ) -> Result<CaptureRules, GrammarError> {
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };

        let mut captures: CaptureRules = Vec::new();
        for (key, rule) in raw {
            let index: usize = key.trim().parse().map_err(|_| {
                self.malformed(path, &format!("capture key `{key}` is not a group number"))
            })?;
            let rule_path = child(path, key);

            let patterns = match &rule.patterns {
                Some(p) if !p.is_empty() => {
                    let ids = self.patterns(Some(p), repo, &rule_path)?;
                    Some(self.alloc(Rule::Patterns(PatternsRule { patterns: ids })))
                }
                _ => None,
            };

            if captures.len() <= index {
                captures.resize(index + 1, None);
            }
            captures[index] = Some(CaptureRule {
                name: rule.name.as_deref().map(ScopeName::new),
                content_name: rule.content_name.as_deref().map(ScopeName::new),
                patterns,
            });
        }
        Ok(captures)
    }

    fn matcher(&self, pattern: &str, path: &str) -> Result<Matcher, GrammarError> {
        Matcher::compile(pattern).map_err(|source| GrammarError::InvalidPattern {
            scope: self.scope.to_string(),
            rule: path.to_string(),
            source,
        })
    }

    fn template(&self, pattern: &str, path: &str) -> Result<EndTemplate, GrammarError> {
        EndTemplate::compile(pattern).map_err(|source| GrammarError::InvalidPattern {
            scope: self.scope.to_string(),
            rule: path.to_string(),
            source,
        })
    }

    fn malformed(&self, path: &str, reason: &str) -> GrammarError {
        GrammarError::MalformedGrammar {
            scope: self.scope.to_string(),
            rule: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
            reason: reason.to_string(),
        }
    }
}

fn child(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}
