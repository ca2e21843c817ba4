//! Scope selectors for injections.
//!
//! Supports the subset grammars use in practice: comma separated
//! alternatives, each a space separated list of scope prefixes that must
//! appear in order in the scope path, optional `-scope` exclusions, and an
//! `L:`/`R:` prefix deciding who wins a tie against the regular patterns.

/// Who wins when an injection and a regular pattern match at the same offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionPrecedence {
    /// The injection wins ties
    Left,
    /// The regular pattern wins ties
    #[default]
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Alternative {
    precedence: InjectionPrecedence,
    include: Vec<String>,
    exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSelector {
    alternatives: Vec<Alternative>,
}

impl ScopeSelector {
    pub fn parse(selector: &str) -> Self {
        let alternatives = selector
            .split(',')
            .filter_map(|alt| {
                let mut alt = alt.trim();
                let mut precedence = InjectionPrecedence::Right;
                if let Some(rest) = alt.strip_prefix("L:") {
                    precedence = InjectionPrecedence::Left;
                    alt = rest;
                } else if let Some(rest) = alt.strip_prefix("R:") {
                    alt = rest;
                }

                let mut include = Vec::new();
                let mut exclude = Vec::new();
                for token in alt.split_whitespace() {
                    let token = token.trim_matches(|c| c == '(' || c == ')');
                    if let Some(excluded) = token.strip_prefix('-') {
                        if !excluded.is_empty() {
                            exclude.push(excluded.to_string());
                        }
                    } else if !token.is_empty() {
                        include.push(token.to_string());
                    }
                }

                (!include.is_empty()).then_some(Alternative {
                    precedence,
                    include,
                    exclude,
                })
            })
            .collect();

        Self { alternatives }
    }

    /// Precedence of the first alternative matching `scopes`, if any
    pub fn matches(&self, scopes: &[String]) -> Option<InjectionPrecedence> {
        self.alternatives
            .iter()
            .find(|alt| alt.matches(scopes))
            .map(|alt| alt.precedence)
    }
}

impl Alternative {
    fn matches(&self, scopes: &[String]) -> bool {
        if self
            .exclude
            .iter()
            .any(|ex| scopes.iter().any(|s| scope_has_prefix(s, ex)))
        {
            return false;
        }

        let mut wanted = self.include.iter().peekable();
        for scope in scopes {
            match wanted.peek() {
                Some(prefix) if scope_has_prefix(scope, prefix) => {
                    wanted.next();
                }
                Some(_) => {}
                None => break,
            }
        }
        wanted.peek().is_none()
    }
}

/// `string.quoted` is a prefix of `string.quoted.double` but not of `string.quotedx`
fn scope_has_prefix(scope: &str, prefix: &str) -> bool {
    scope == prefix
        || (scope.starts_with(prefix) && scope.as_bytes().get(prefix.len()) == Some(&b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(scopes: &[&str]) -> Vec<String> {
        scopes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefix_matching_respects_dot_boundaries() {
        assert!(scope_has_prefix("string.quoted.double", "string.quoted"));
        assert!(scope_has_prefix("string", "string"));
        assert!(!scope_has_prefix("string.quotedx", "string.quoted"));
    }

    #[test]
    fn test_descendant_selector() {
        let sel = ScopeSelector::parse("source.x string");
        assert_eq!(
            sel.matches(&path(&["source.x", "meta.block", "string.quoted"])),
            Some(InjectionPrecedence::Right)
        );
        assert_eq!(sel.matches(&path(&["source.x", "comment.line"])), None);
    }

    #[test]
    fn test_left_precedence_and_exclusions() {
        let sel = ScopeSelector::parse("L:source.x -comment, text.y");
        assert_eq!(
            sel.matches(&path(&["source.x"])),
            Some(InjectionPrecedence::Left)
        );
        assert_eq!(sel.matches(&path(&["source.x", "comment.line"])), None);
        assert_eq!(
            sel.matches(&path(&["text.y"])),
            Some(InjectionPrecedence::Right)
        );
    }
}
