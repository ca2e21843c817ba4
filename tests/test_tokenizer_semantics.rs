//! Matching rules of the tokenizer: priority, backreferences, while regions,
//! end pattern ordering and injections

use fresh_textmate::{
    EndPatternPriority, GrammarDescriptor, GrammarRegistry, TokenSpan, TokenizerConfig,
};

fn registry_with(config: TokenizerConfig, grammars: &[&str]) -> GrammarRegistry {
    GrammarRegistry::with_config(config)
        .register(
            grammars
                .iter()
                .map(|json| GrammarDescriptor::from_json(json).unwrap()),
        )
        .unwrap()
}

fn registry(grammars: &[&str]) -> GrammarRegistry {
    registry_with(TokenizerConfig::default(), grammars)
}

/// (text, innermost scope) per span
fn flatten<'a>(text: &'a str, spans: &[TokenSpan]) -> Vec<(&'a str, String)> {
    spans
        .iter()
        .map(|s| {
            (
                &text[s.range.clone()],
                s.scopes.last().cloned().unwrap_or_default(),
            )
        })
        .collect()
}

#[test]
fn test_earliest_match_then_declaration_order() {
    let reg = registry(&[r#"{
        "scopeName": "source.t",
        "patterns": [
            {"match": "b", "name": "late"},
            {"match": "a", "name": "first"},
            {"match": "ab", "name": "second"}
        ]
    }"#]);
    let text = "ab";
    let spans = reg.tokenize(text, "source.t").unwrap();
    assert_eq!(
        flatten(text, &spans),
        vec![("a", "first".to_string()), ("b", "late".to_string())]
    );
}

#[test]
fn test_backreference_end_matches_captured_text_only() {
    let reg = registry(&[r#"{
        "scopeName": "source.t",
        "patterns": [
            {"begin": "(['\"])", "end": "\\1", "name": "string"}
        ]
    }"#]);

    let text = "'a\"b' c\n";
    let spans = reg.tokenize(text, "source.t").unwrap();
    assert_eq!(
        flatten(text, &spans),
        vec![
            ("'", "string".to_string()),
            ("a\"b", "string".to_string()),
            ("'", "string".to_string()),
            (" c\n", "source.t".to_string()),
        ]
    );

    let text = "\"a'b\" c\n";
    let spans = reg.tokenize(text, "source.t").unwrap();
    assert_eq!(flatten(text, &spans)[1], ("a'b", "string".to_string()));
    assert_eq!(flatten(text, &spans)[3], (" c\n", "source.t".to_string()));
}

#[test]
fn test_backreference_with_regex_metacharacters() {
    let reg = registry(&[r#"{
        "scopeName": "source.t",
        "patterns": [
            {"begin": "<<(\\S+)", "end": "^\\1$", "name": "heredoc"}
        ]
    }"#]);

    // `.*` must match literally, not as a wildcard
    let text = "<<.*\nabc\n.*\nrest\n";
    let lines = reg.tokenize_lines(text, "source.t").unwrap();
    assert!(lines[1].iter().all(|s| s.scopes.contains(&"heredoc".to_string())));

    // The terminator closes the region and the line break after it is outside
    assert_eq!(lines[2][0].range, 0..2);
    assert_eq!(lines[2][0].scopes, vec!["source.t", "heredoc"]);
    assert_eq!(lines[2].last().unwrap().scopes, vec!["source.t"]);
    assert_eq!(lines[3][0].scopes, vec!["source.t"]);
}

#[test]
fn test_while_region_ends_and_line_is_reoffered() {
    let reg = registry(&[r#"{
        "scopeName": "source.t",
        "patterns": [
            {
                "begin": "^>",
                "while": "^>",
                "name": "quote",
                "whileCaptures": {"0": {"name": "marker"}}
            },
            {"match": "c", "name": "letter.c"}
        ]
    }"#]);

    let text = ">a\n>b\nc\n";
    let lines = reg.tokenize_lines(text, "source.t").unwrap();
    assert_eq!(lines.len(), 3);

    assert!(lines[0].iter().all(|s| s.scopes[1] == "quote"));

    let marker = &lines[1][0];
    assert_eq!(marker.range, 0..1);
    assert_eq!(marker.scopes, vec!["source.t", "quote", "marker"]);
    assert!(lines[1][1..].iter().all(|s| s.scopes[1] == "quote"));

    // The failing line belongs to the enclosing context
    assert_eq!(lines[2][0].range, 0..1);
    assert_eq!(lines[2][0].scopes, vec!["source.t", "letter.c"]);
}

const PAREN_GRAMMAR: &str = r#"{
    "scopeName": "source.paren",
    "patterns": [
        {
            "begin": "\\(",
            "end": "\\)",
            "name": "group",
            "patterns": [{"match": "\\)\\)", "name": "double"}]
        }
    ]
}"#;

const PAREN_LAST_GRAMMAR: &str = r#"{
    "scopeName": "source.paren-last",
    "patterns": [
        {
            "begin": "\\(",
            "end": "\\)",
            "name": "group",
            "applyEndPatternLast": 1,
            "patterns": [{"match": "\\)\\)", "name": "double"}]
        }
    ]
}"#;

fn has_double(reg: &GrammarRegistry, scope: &str) -> bool {
    reg.tokenize("())", scope)
        .unwrap()
        .iter()
        .any(|s| s.scopes.last().map(String::as_str) == Some("double"))
}

#[test]
fn test_apply_end_pattern_last() {
    let reg = registry(&[PAREN_GRAMMAR, PAREN_LAST_GRAMMAR]);
    assert!(!has_double(&reg, "source.paren"));
    assert!(has_double(&reg, "source.paren-last"));
}

#[test]
fn test_end_pattern_priority_overrides() {
    let always_last = registry_with(
        TokenizerConfig {
            end_pattern_priority: EndPatternPriority::AlwaysLast,
            ..TokenizerConfig::default()
        },
        &[PAREN_GRAMMAR, PAREN_LAST_GRAMMAR],
    );
    assert!(has_double(&always_last, "source.paren"));
    assert!(has_double(&always_last, "source.paren-last"));

    let always_first = registry_with(
        TokenizerConfig {
            end_pattern_priority: EndPatternPriority::AlwaysFirst,
            ..TokenizerConfig::default()
        },
        &[PAREN_GRAMMAR, PAREN_LAST_GRAMMAR],
    );
    assert!(!has_double(&always_first, "source.paren"));
    assert!(!has_double(&always_first, "source.paren-last"));
}

#[test]
fn test_injection_into_matching_scope() {
    let reg = registry(&[r#"{
        "scopeName": "source.t",
        "patterns": [{"begin": "\"", "end": "\"", "name": "string.quoted"}],
        "injections": {
            "L:string": {"patterns": [{"match": "TODO", "name": "keyword.todo"}]}
        }
    }"#]);

    let text = "TODO \"a TODO\"";
    let spans = reg.tokenize(text, "source.t").unwrap();

    // Outside the string the selector does not apply
    assert_eq!(&text[spans[0].range.clone()], "TODO ");
    assert_eq!(spans[0].scopes, vec!["source.t"]);

    let todos: Vec<&TokenSpan> = spans
        .iter()
        .filter(|s| &text[s.range.clone()] == "TODO")
        .collect();
    assert_eq!(todos.len(), 1);
    assert_eq!(
        todos[0].scopes,
        vec!["source.t", "string.quoted", "keyword.todo"]
    );
}

#[test]
fn test_injection_precedence_on_ties() {
    let grammar = |selector: &str| {
        format!(
            r#"{{
                "scopeName": "source.t",
                "patterns": [{{"match": "ab", "name": "regular"}}],
                "injections": {{
                    "{selector}": {{"patterns": [{{"match": "ab", "name": "injected"}}]}}
                }}
            }}"#
        )
    };

    let left = registry(&[grammar("L:source.t").as_str()]);
    let spans = left.tokenize("ab", "source.t").unwrap();
    assert_eq!(spans[0].scopes, vec!["source.t", "injected"]);

    let right = registry(&[grammar("R:source.t").as_str()]);
    let spans = right.tokenize("ab", "source.t").unwrap();
    assert_eq!(spans[0].scopes, vec!["source.t", "regular"]);
}

#[test]
fn test_cross_grammar_include() {
    let reg = registry(&[
        r#"{
            "scopeName": "source.host",
            "patterns": [
                {"begin": "<%", "end": "%>", "name": "embedded", "patterns": [{"include": "source.guest"}]}
            ]
        }"#,
        r#"{
            "scopeName": "source.guest",
            "patterns": [{"match": "\\d+", "name": "constant.numeric"}]
        }"#,
    ]);

    let text = "1 <% 2 %> 3";
    let spans = reg.tokenize(text, "source.host").unwrap();
    let two = spans
        .iter()
        .find(|s| &text[s.range.clone()] == "2")
        .unwrap();
    assert_eq!(
        two.scopes,
        vec!["source.host", "embedded", "constant.numeric"]
    );
    // Outside the region the guest grammar is not active
    let one = spans.iter().find(|s| s.range.start == 0).unwrap();
    assert_eq!(one.scopes, vec!["source.host"]);
}

#[test]
fn test_deterministic_output() {
    let reg = GrammarRegistry::builtin().unwrap();
    let text = "dogma_v1 utf-8\nx = [a > 1: \"x\"; : 'y';];\n";
    let first = reg.tokenize(text, "source.dogma").unwrap();
    for _ in 0..5 {
        assert_eq!(reg.tokenize(text, "source.dogma").unwrap(), first);
    }

    // A fresh registry yields the same tokens
    let other = GrammarRegistry::builtin().unwrap();
    assert_eq!(other.tokenize(text, "source.dogma").unwrap(), first);
}
