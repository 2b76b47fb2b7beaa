//! Outline parser built on `nom`.
//!
//! Parsing strategy:
//! - A pre-pass splits lines and marks `#+BEGIN_...` blocks as opaque so
//!   headline-looking lines inside them are ignored.
//! - The headline lines found by that pass partition the text into sections.
//! - Each *headline* is parsed with `nom` combinators (TODO, priority, title, tags);
//!   planning lines and a property drawer directly below it attach to the heading.
//! - The rest of each section goes through the element recognizers in [`elements`].
//! - Headings are linked into the document arena with a level stack, so depth never
//!   costs recursion.
//!
//! Parsing is total: malformed constructs degrade to paragraphs or plain text.

pub mod elements;
pub mod inline;
pub mod timestamp;

pub use inline::parse_inlines;
pub use timestamp::parse_timestamp_str;

use crate::core::*;
use crate::scan::{self, Line};
use elements::Ctx;
use nom::{
    IResult,
    bytes::complete::{tag, take_while1},
    character::complete::{char, not_line_ending, space0},
    combinator::{map, opt},
    error::VerboseError,
    sequence::tuple,
};

pub(crate) type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Headlines with this many stars or more are inline tasks, not headings.
pub const INLINE_TASK_LEVEL: usize = 15;

/// Parser options.
#[derive(Debug, Clone, Default)]
pub struct ParseConfig {
    /// Keyword vocabulary to use as is. When `None`, `#+TODO:` lines before the
    /// first heading are merged with [`TodoKeywords::default`].
    pub todo_keywords: Option<TodoKeywords>,
}

/* ------------------------ Public entry points ------------------------ */

/// Parse a document with the default configuration.
pub fn parse_document(text: &str) -> Document {
    parse_document_with(text, &ParseConfig::default())
}

pub fn parse_document_with(text: &str, config: &ParseConfig) -> Document {
    let lines = scan::lines(text);
    let masked = scan::mask_comments(text);
    let regions = scan::opaque_regions(&masked);

    let heading_lines: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            headline_level(line.text).is_some_and(|n| n < INLINE_TASK_LEVEL)
                && !scan::in_regions(&regions, line.start)
        })
        .map(|(idx, _)| idx)
        .collect();
    let first_heading = heading_lines.first().copied().unwrap_or(lines.len());

    // An explicit vocabulary is used as given; otherwise declarations extend the defaults.
    let todo_keywords = match &config.todo_keywords {
        Some(explicit) => explicit.clone(),
        None => {
            let mut set = declared_todo_keywords(&lines[..first_heading]).unwrap_or_default();
            set.merge(&TodoKeywords::default());
            set
        }
    };

    let mut doc = Document::new(todo_keywords);
    let ctx = Ctx::new(&doc.todo_keywords);

    // Preamble and file-level metadata.
    let preamble = elements::parse_section(&lines[..first_heading], &ctx);
    let (keywords, properties) = file_metadata(&preamble);
    doc.preamble = preamble;
    doc.keywords = keywords;
    doc.properties = properties;

    // Headings, linked through a level stack.
    let mut headings = Vec::with_capacity(heading_lines.len());
    let mut roots = Vec::new();
    let mut stack: Vec<(usize, HeadingId)> = Vec::new();
    for (n, &line_idx) in heading_lines.iter().enumerate() {
        let body_end = heading_lines.get(n + 1).copied().unwrap_or(lines.len());
        let mut heading = parse_heading(&lines[line_idx], &lines[line_idx + 1..body_end], &ctx);
        let id = HeadingId(n);
        heading.id = id;

        while stack.last().is_some_and(|(level, _)| *level >= heading.level) {
            stack.pop();
        }
        match stack.last() {
            Some((_, parent)) => {
                heading.parent = Some(*parent);
                let parent: &mut Heading = &mut headings[parent.0];
                parent.children.push(id);
            }
            None => roots.push(id),
        }
        stack.push((heading.level, id));
        headings.push(heading);
    }
    doc.headings = headings;
    doc.roots = roots;

    tracing::debug!(
        headings = doc.headings.len(),
        roots = doc.roots.len(),
        "parsed document"
    );
    doc
}

/* ------------------------------- Utils ------------------------------- */

/// Number of leading stars when `s` is a headline (`*` run followed by a space or EOL).
pub(crate) fn headline_level(s: &str) -> Option<usize> {
    let stars = s.bytes().take_while(|b| *b == b'*').count();
    if stars == 0 {
        return None;
    }
    match s.as_bytes().get(stars) {
        None | Some(b' ') | Some(b'\t') => Some(stars),
        _ => None,
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '%')
}

fn rt_text(s: &str) -> RichText {
    RichText {
        inlines: parse_inlines(s),
    }
}

/// Keyword sets declared with `#+TODO:`, `#+SEQ_TODO:` or `#+TYP_TODO:`.
fn declared_todo_keywords(lines: &[Line<'_>]) -> Option<TodoKeywords> {
    let mut found: Option<TodoKeywords> = None;
    for line in lines {
        let Ok((_, (key, value))) = parse_hash_key_value(line.text.trim_start()) else {
            continue;
        };
        if !["TODO", "SEQ_TODO", "TYP_TODO"]
            .iter()
            .any(|k| key.eq_ignore_ascii_case(k))
        {
            continue;
        }
        let declared = TodoKeywords::from_declaration(value);
        match found.as_mut() {
            Some(set) => set.merge(&declared),
            None => found = Some(declared),
        }
    }
    found
}

/// `#+KEY: value`.
pub(crate) fn parse_hash_key_value(i: &str) -> PResult<'_, (&str, &str)> {
    map(
        tuple((
            tag("#+"),
            take_while1(|c: char| !c.is_whitespace() && c != ':'),
            char(':'),
            space0,
            not_line_ending,
        )),
        |(_, key, _, _, value): (_, &str, _, _, &str)| (key, value.trim_end()),
    )(i)
}

fn file_metadata(preamble: &Section) -> (indexmap::IndexMap<String, String>, Properties) {
    let mut keywords = indexmap::IndexMap::new();
    let mut properties = Properties::default();
    let mut leading = true;
    for node in &preamble.elements {
        match &node.element {
            Element::PropertyDrawer(drawer) if leading => {
                for (k, v) in drawer.iter() {
                    properties.insert(k.clone(), v.clone());
                }
            }
            Element::Keyword { key, value } => {
                let key = key.to_ascii_uppercase();
                if key == "PROPERTY" {
                    let (name, val) = value
                        .split_once(char::is_whitespace)
                        .unwrap_or((value.as_str(), ""));
                    properties.insert(name.to_string(), val.trim().to_string());
                }
                keywords.insert(key, value.clone());
            }
            _ => {}
        }
        if !matches!(node.element, Element::Comment(_) | Element::Keyword { .. }) {
            leading = false;
        }
    }
    (keywords, properties)
}

/* --------------------------- Headings --------------------------- */

/// Headline components shared by headings and inline tasks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Headline {
    pub level: usize,
    pub keyword: Option<TodoKeyword>,
    pub priority: Option<Priority>,
    pub raw_title: String,
    pub tags: Vec<Tag>,
}

fn parse_heading(line: &Line<'_>, body: &[Line<'_>], ctx: &Ctx<'_>) -> Heading {
    let headline = parse_headline(line.text, ctx.keywords);

    let mut heading = Heading::new(headline.level, headline.raw_title.clone());
    heading.keyword = headline.keyword;
    heading.priority = headline.priority;
    heading.title = rt_text(&headline.raw_title);
    heading.tags = headline.tags;
    heading.line = line.number;
    heading.range = SourceRange::new(line.start, line.end());

    // Planning and the property drawer may come in either order.
    let mut idx = 0;
    let mut planning = Planning::default();
    let mut seen_properties = false;
    while idx < body.len() {
        if let Some(p) = parse_planning_line(body[idx].text) {
            planning.merge(p);
            idx += 1;
            continue;
        }
        if !seen_properties {
            if let Some((props, used)) = elements::property_drawer(&body[idx..]) {
                heading.properties = props;
                seen_properties = true;
                idx += used;
                continue;
            }
        }
        break;
    }
    if !planning.is_empty() {
        heading.planning = Some(planning);
    }

    let rest = &body[idx..];
    if !rest.is_empty() {
        heading.section = Some(elements::parse_section(rest, ctx));
    }
    heading
}

/// Parse a headline. Any line accepted by [`headline_level`] succeeds.
pub(crate) fn parse_headline(line: &str, keywords: &TodoKeywords) -> Headline {
    let level = line.bytes().take_while(|b| *b == b'*').count();
    let mut rest = line[level..].trim_start();

    let mut keyword = None;
    let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    if let Some(kw) = keywords.classify(&rest[..word_len]) {
        keyword = Some(kw);
        rest = rest[word_len..].trim_start();
    }

    let mut priority = None;
    if let Ok((after, p)) = parse_priority(rest) {
        if after.is_empty() || after.starts_with(char::is_whitespace) {
            priority = Some(p);
            rest = after.trim_start();
        }
    }

    let rest = rest.trim_end();
    let (title, tags) = split_tags(rest);
    Headline {
        level,
        keyword,
        priority,
        raw_title: title.to_string(),
        tags,
    }
}

fn parse_priority(i: &str) -> PResult<'_, Priority> {
    map(
        tuple((tag("[#"), nom::character::complete::anychar, char(']'))),
        |(_, c, _)| Priority(c),
    )(i)
}

/// Split trailing `:a:b:` tags off a headline remainder.
fn split_tags(rest: &str) -> (&str, Vec<Tag>) {
    let start = rest.rfind(char::is_whitespace).map_or(0, |p| p + 1);
    let trail = &rest[start..];
    if trail.len() < 3 || !trail.starts_with(':') || !trail.ends_with(':') {
        return (rest, vec![]);
    }
    let names: Vec<&str> = trail[1..trail.len() - 1].split(':').collect();
    if names.iter().any(|n| n.is_empty() || !n.chars().all(is_tag_char)) {
        return (rest, vec![]);
    }
    (
        rest[..start].trim_end(),
        names.into_iter().map(Tag::from).collect(),
    )
}

/* --------------------------- Planning --------------------------- */

/// `SCHEDULED: <...> DEADLINE: <...> CLOSED: [...]` in any order.
pub(crate) fn parse_planning_line(line: &str) -> Option<Planning> {
    let mut rest = line.trim();
    if rest.is_empty() {
        return None;
    }
    let mut planning = Planning::default();
    while !rest.is_empty() {
        if let Ok((r, ts)) = planning_field("SCHEDULED:")(rest) {
            planning.scheduled = Some(ts);
            rest = r.trim_start();
        } else if let Ok((r, ts)) = planning_field("DEADLINE:")(rest) {
            planning.deadline = Some(ts);
            rest = r.trim_start();
        } else if let Ok((r, ts)) = planning_field("CLOSED:")(rest) {
            planning.closed = Some(ts);
            rest = r.trim_start();
        } else {
            return None;
        }
    }
    Some(planning)
}

fn planning_field(label: &'static str) -> impl Fn(&str) -> PResult<'_, Timestamp> {
    move |i: &str| {
        let (i, _) = tag(label)(i)?;
        let (i, _) = space0(i)?;
        timestamp::parse_timestamp(i)
    }
}

/// `:KEY: value` inside a property drawer. `KEY+` appends are kept as separate keys.
pub(crate) fn parse_property_line(i: &str) -> PResult<'_, (&str, &str)> {
    map(
        tuple((
            space0,
            char(':'),
            take_while1(|c: char| !c.is_whitespace() && c != ':'),
            char(':'),
            opt(tuple((space0, not_line_ending))),
        )),
        |(_, _, key, _, value): (_, _, &str, _, Option<(&str, &str)>)| {
            (key, value.map_or("", |(_, v)| v.trim_end()))
        },
    )(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn headline_with_keyword_priority_and_tags() {
        let h = parse_headline("** TODO [#A] Write report :work:urgent:", &TodoKeywords::default());
        assert_eq!(h.level, 2);
        assert_eq!(h.keyword.unwrap().text, "TODO");
        assert_eq!(h.priority, Some(Priority('A')));
        assert_eq!(h.raw_title, "Write report");
        assert_eq!(h.tags, vec![Tag::from("work"), Tag::from("urgent")]);
    }

    #[test]
    fn unknown_keyword_stays_in_title() {
        let h = parse_headline("* LATER think", &TodoKeywords::default());
        assert!(h.keyword.is_none());
        assert_eq!(h.raw_title, "LATER think");
    }

    #[test]
    fn colon_words_are_not_always_tags() {
        let h = parse_headline("* Ratio 1:2:", &TodoKeywords::default());
        assert!(h.tags.is_empty());
        assert_eq!(h.raw_title, "Ratio 1:2:");
        let h = parse_headline("* :solo:", &TodoKeywords::default());
        assert_eq!(h.raw_title, "");
        assert_eq!(h.tags, vec![Tag::from("solo")]);
    }

    #[test]
    fn headline_level_requires_space() {
        assert_eq!(headline_level("*** x"), Some(3));
        assert_eq!(headline_level("*"), Some(1));
        assert_eq!(headline_level("*bold*"), None);
        assert_eq!(headline_level(" * item"), None);
    }

    #[test]
    fn planning_fields_any_order() {
        let p = parse_planning_line("  DEADLINE: <2024-05-02 Thu> SCHEDULED: <2024-05-01 Wed>")
            .unwrap();
        assert_eq!(p.deadline.unwrap().date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(p.scheduled.unwrap().date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(parse_planning_line("SCHEDULED: tomorrow").is_none());
        assert!(parse_planning_line("Some text").is_none());
    }

    #[test]
    fn builds_tree_from_levels() {
        let doc = parse_document("* A\n** B\n*** C\n** D\n* E\n");
        assert_eq!(doc.roots.len(), 2);
        let a = doc.heading(doc.roots[0]).unwrap();
        let kids: Vec<&str> = doc.children(a).map(|h| h.raw_title.as_str()).collect();
        assert_eq!(kids, vec!["B", "D"]);
        let c = &doc.headings[2];
        assert_eq!(c.raw_title, "C");
        let path: Vec<&str> = doc.ancestors(c.id).map(|h| h.raw_title.as_str()).collect();
        assert_eq!(path, vec!["B", "A"]);
        assert_eq!(doc.descendants(a.id).len(), 3);
    }

    #[test]
    fn skipped_levels_attach_to_nearest_shallower() {
        let doc = parse_document("* A\n*** deep\n** mid\n");
        let a = doc.heading(doc.roots[0]).unwrap();
        assert_eq!(a.children.len(), 2);
    }

    #[test]
    fn headlines_inside_blocks_are_ignored() {
        let doc = parse_document("* A\n#+BEGIN_SRC org\n* not a heading\n#+END_SRC\n* B\n");
        assert_eq!(doc.headings.len(), 2);
        let doc = parse_document("* A\n#+BEGIN_EXAMPLE\n* swallowed\n");
        assert_eq!(doc.headings.len(), 1);
    }

    #[test]
    fn planning_and_properties_attach_in_either_order() {
        let text = "* TODO Task\n:PROPERTIES:\n:ID: abc\n:END:\nSCHEDULED: <2024-01-20 Sat>\nBody\n";
        let doc = parse_document(text);
        let h = &doc.headings[0];
        assert_eq!(h.properties.get("id"), Some("abc"));
        assert!(h.planning.as_ref().unwrap().scheduled.is_some());
        let section = h.section.as_ref().unwrap();
        assert_eq!(section.elements.len(), 1);
        assert!(matches!(section.elements[0].element, Element::Paragraph(_)));
    }

    #[test]
    fn todo_declarations_extend_defaults() {
        let text = "#+TODO: OPEN | CLOSED\n* OPEN one\n* TODO two\n* CLOSED three\n* DONE four\n";
        let doc = parse_document(text);
        assert_eq!(doc.headings[0].keyword.as_ref().unwrap().text, "OPEN");
        assert!(!doc.headings[1].is_done());
        assert_eq!(doc.headings[1].keyword.as_ref().unwrap().text, "TODO");
        assert!(doc.headings[2].is_done());
        assert!(doc.headings[3].is_done());
        assert_eq!(doc.todo_keywords.active[..2], ["OPEN".to_string(), "TODO".to_string()]);
    }

    #[test]
    fn explicit_keywords_ignore_declarations() {
        let config = ParseConfig {
            todo_keywords: Some(TodoKeywords::new(["TASK"], ["FINISHED"])),
        };
        let doc = parse_document_with("#+TODO: OPEN | SHUT\n* OPEN x\n", &config);
        assert!(doc.headings[0].keyword.is_none());
    }

    #[test]
    fn config_keywords_apply_without_declaration() {
        let config = ParseConfig {
            todo_keywords: Some(TodoKeywords::new(["TASK"], ["FINISHED"])),
        };
        let doc = parse_document_with("* TASK x\n* FINISHED y\n", &config);
        assert!(!doc.headings[0].is_done());
        assert!(doc.headings[1].is_done());
    }

    #[test]
    fn file_keywords_and_properties() {
        let text = ":PROPERTIES:\n:CATEGORY: home\n:END:\n#+title: Notes\n#+FILETAGS: :a:b:\n#+PROPERTY: Effort 0:30\n* H\n";
        let doc = parse_document(text);
        assert_eq!(doc.title(), Some("Notes"));
        assert_eq!(doc.category(), Some("home"));
        assert_eq!(doc.file_tags(), vec![Tag::from("a"), Tag::from("b")]);
        assert_eq!(doc.properties.get("EFFORT"), Some("0:30"));
    }

    #[test]
    fn lines_are_one_based() {
        let doc = parse_document("intro\n\n* one\ntext\n** two\n");
        assert_eq!(doc.headings[0].line, 3);
        assert_eq!(doc.headings[1].line, 5);
    }
}
