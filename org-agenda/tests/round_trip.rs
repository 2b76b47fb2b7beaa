//! Property tests: formatting a parsed document and parsing it again keeps its
//! structure, and formatting is idempotent.

use org_agenda::core::{Document, Element, Heading};
use org_agenda::{format_document, parse_document};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn headline_strategy() -> impl Strategy<Value = String> {
    (
        1..=6usize,
        prop::option::of(prop_oneof![
            Just("TODO".to_string()),
            Just("NEXT".to_string()),
            Just("DONE".to_string()),
        ]),
        prop::option::of(prop_oneof![Just('A'), Just('B'), Just('C')]),
        "[a-z][a-zA-Z0-9 ]{0,40}",
        prop::option::of(prop::collection::vec("[a-z0-9_]{1,12}", 1..=3)),
    )
        .prop_map(|(level, todo, priority, title, tags)| {
            let mut line = "*".repeat(level);
            line.push(' ');
            if let Some(todo) = todo {
                line.push_str(&todo);
                line.push(' ');
            }
            if let Some(p) = priority {
                line.push_str(&format!("[#{p}] "));
            }
            line.push_str(&title);
            if let Some(tags) = tags {
                line.push_str(" :");
                line.push_str(&tags.join(":"));
                line.push(':');
            }
            line.push('\n');
            line
        })
}

fn body_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-zA-Z0-9 ,]{4,60}".prop_map(|s: String| format!("{s}\n")),
        prop::collection::vec("[a-z][a-z0-9 ]{2,30}", 1..=4).prop_map(|items: Vec<String>| {
            items
                .into_iter()
                .map(|item| format!("- {item}\n"))
                .collect::<String>()
        }),
        "[a-z][a-z0-9 ]{0,30}".prop_map(|s: String| format!("#+BEGIN_SRC sh\n{s}\n#+END_SRC\n")),
        Just("SCHEDULED: <2024-03-04 Mon>\n".to_string()),
        Just("| a | bb |\n|---+----|\n| 1 | 2 |\n".to_string()),
    ]
}

fn document_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![headline_strategy(), body_strategy()],
        1..=20,
    )
    .prop_map(|parts: Vec<String>| parts.join("\n"))
}

#[derive(Debug, PartialEq)]
struct Shape {
    level: usize,
    keyword: Option<String>,
    priority: Option<char>,
    title: String,
    tags: Vec<String>,
    scheduled: bool,
    elements: Vec<&'static str>,
    children: usize,
}

fn element_kind(e: &Element) -> &'static str {
    match e {
        Element::Paragraph(_) => "paragraph",
        Element::SrcBlock(_) => "src",
        Element::List(_) => "list",
        Element::Table(_) => "table",
        Element::Planning(_) => "planning",
        _ => "other",
    }
}

fn shape(h: &Heading) -> Shape {
    Shape {
        level: h.level,
        keyword: h.keyword.as_ref().map(|k| k.text.clone()),
        priority: h.priority.map(|p| p.0),
        title: h.title.plain_text().trim().to_string(),
        tags: h.tags.iter().map(|t| t.0.clone()).collect(),
        scheduled: h.planning.as_ref().is_some_and(|p| p.scheduled.is_some()),
        elements: h
            .section
            .iter()
            .flat_map(|s| s.elements.iter().map(|n| element_kind(&n.element)))
            .collect(),
        children: h.children.len(),
    }
}

fn shapes(doc: &Document) -> (Vec<&'static str>, Vec<Shape>) {
    let preamble = doc
        .preamble
        .elements
        .iter()
        .map(|n| element_kind(&n.element))
        .collect();
    (preamble, doc.headings.iter().map(shape).collect())
}

fn check_tree(doc: &Document) {
    for h in &doc.headings {
        let mut lines = Vec::new();
        for child in doc.children(h) {
            assert!(child.level > h.level, "child deeper than parent");
            assert_eq!(child.parent, Some(h.id));
            lines.push(child.line);
        }
        let count = lines.len();
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), count, "sibling lines are distinct");
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn reparse_keeps_structure(text in document_strategy()) {
        let first = parse_document(&text);
        let formatted = format_document(&first);
        let second = parse_document(&formatted);
        prop_assert_eq!(shapes(&first), shapes(&second));
    }

    #[test]
    fn formatting_is_idempotent(text in document_strategy()) {
        let once = format_document(&parse_document(&text));
        let twice = format_document(&parse_document(&once));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn tree_invariant_holds(text in document_strategy()) {
        check_tree(&parse_document(&text));
    }
}

#[test]
fn fixed_document_round_trips() {
    let text = "#+TITLE: Plan\n\n* TODO [#B] Draft :work:\nSCHEDULED: <2024-03-04 Mon>\n- one\n- two\n** NEXT Review\n* DONE Ship\n";
    let doc = parse_document(text);
    check_tree(&doc);
    let formatted = format_document(&doc);
    assert_eq!(formatted, text);
}
