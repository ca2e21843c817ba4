//! End-to-end tokenization of a document in the built-in dogma grammar

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use fresh_textmate::{GrammarRegistry, TextMateEngine, TokenSpan};

const DOCUMENT: &str = "dogma_v1 utf-8\n- name=\"value\"\nrule = -42 # note\n;\n";

fn span_for<'a>(spans: &'a [TokenSpan], text: &str, needle: &str) -> &'a TokenSpan {
    spans
        .iter()
        .find(|span| &text[span.range.clone()] == needle)
        .unwrap_or_else(|| panic!("no span for {:?} in {:#?}", needle, spans))
}

fn has_scope(span: &TokenSpan, scope: &str) -> bool {
    span.scopes.iter().any(|s| s == scope)
}

#[test]
fn test_dogma_document_tokens() {
    let registry = GrammarRegistry::builtin().unwrap();
    let spans = registry.tokenize(DOCUMENT, "source.dogma").unwrap();

    for span in &spans {
        println!(
            "{:?} -> {}",
            &DOCUMENT[span.range.clone()],
            span.scopes.join(" ")
        );
    }

    let signature = span_for(&spans, DOCUMENT, "dogma_v1");
    assert_eq!(
        signature.scopes,
        vec!["source.dogma", "entity.name.signature.dogma"]
    );

    let charset = span_for(&spans, DOCUMENT, "utf-8");
    assert!(has_scope(charset, "entity.name.charset.dogma"));

    let name = span_for(&spans, DOCUMENT, "name");
    assert_eq!(
        name.scopes,
        vec!["source.dogma", "variable.other.header-name.dogma"]
    );
    let value = span_for(&spans, DOCUMENT, "\"value\"");
    assert_eq!(
        value.scopes,
        vec!["source.dogma", "entity.name.header-value.dogma"]
    );

    let rule = span_for(&spans, DOCUMENT, "rule");
    assert!(has_scope(rule, "entity.name.function.symbol.dogma"));

    let number = span_for(&spans, DOCUMENT, "-42");
    assert_eq!(
        number.scopes,
        vec![
            "source.dogma",
            "entity.name.rule.dogma",
            "constant.numeric.dogma"
        ]
    );

    let hash = span_for(&spans, DOCUMENT, "#");
    assert!(has_scope(hash, "comment.line.number-sign.dogma"));
    assert!(has_scope(hash, "punctuation.definition.comment.dogma"));
    let note = span_for(&spans, DOCUMENT, " note");
    assert!(has_scope(note, "comment.line.number-sign.dogma"));
    assert!(has_scope(note, "entity.name.rule.dogma"));

    // The comment runs through the end of its line, newline included
    let comment_end = DOCUMENT.find(" note").unwrap() + " note".len();
    let newline = spans
        .iter()
        .find(|s| s.range.start == comment_end)
        .unwrap();
    assert_eq!(newline.range.end, comment_end + 1);
    assert!(has_scope(newline, "comment.line.number-sign.dogma"));

    // The rule stays open across the line break and closes on `;`
    let terminator = span_for(&spans, DOCUMENT, ";");
    assert!(has_scope(terminator, "punctuation.terminator.dogma"));
    assert!(has_scope(terminator, "entity.name.rule.dogma"));

    // Required order of the interesting tokens
    let order: Vec<usize> = [signature, name, value, number, hash, note]
        .iter()
        .map(|s| s.range.start)
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "{:?}", order);
}

#[test]
fn test_dogma_spans_cover_document() {
    let registry = GrammarRegistry::builtin().unwrap();
    let spans = registry.tokenize(DOCUMENT, "source.dogma").unwrap();

    let mut offset = 0;
    for span in &spans {
        assert_eq!(span.range.start, offset);
        assert!(span.range.end > span.range.start);
        assert_eq!(span.scopes[0], "source.dogma");
        offset = span.range.end;
    }
    assert_eq!(offset, DOCUMENT.len());
}

#[test]
fn test_comment_after_rule_value_terminates() {
    let registry = GrammarRegistry::builtin().unwrap();
    for text in ["rule = -42 # note\n;\n", "r = a # note\n;\n", DOCUMENT] {
        let (tx, rx) = mpsc::channel();
        let worker = registry.clone();
        thread::spawn(move || {
            let _ = tx.send(worker.tokenize(text, "source.dogma"));
        });
        let spans = rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| panic!("tokenizing {:?} did not finish", text))
            .unwrap();

        let mut offset = 0;
        for span in &spans {
            assert_eq!(span.range.start, offset);
            offset = span.range.end;
        }
        assert_eq!(offset, text.len());

        let comment = span_for(&spans, text, " note");
        assert!(has_scope(comment, "comment.line.number-sign.dogma"));
    }
}

#[test]
fn test_dogma_grammar_detection() {
    let registry = GrammarRegistry::builtin().unwrap();
    assert_eq!(
        registry.scope_for_first_line("dogma_v1 utf-8"),
        Some("source.dogma")
    );
    assert_eq!(registry.scope_for_first_line("#!/bin/sh"), None);

    let engine = TextMateEngine::for_file(std::path::Path::new("rules/x.dogma"), &registry);
    assert_eq!(engine.map(|e| e.scope_name().to_string()).as_deref(), Some("source.dogma"));
}

#[test]
fn test_dogma_strings_and_escapes() {
    let registry = GrammarRegistry::builtin().unwrap();
    let text = "s = \"a\\\"b\" & 'c';\n";
    let spans = registry.tokenize(text, "source.dogma").unwrap();

    let escape = span_for(&spans, text, "\\\"");
    assert!(has_scope(escape, "string.quoted.double.dogma"));
    assert!(has_scope(escape, "constant.character.escape.dogma"));

    let single = span_for(&spans, text, "c");
    assert!(has_scope(single, "string.quoted.single.dogma"));

    let and = span_for(&spans, text, "&");
    assert!(has_scope(and, "keyword.operator.logical.dogma"));
    assert!(!has_scope(and, "string.quoted.double.dogma"));
}
