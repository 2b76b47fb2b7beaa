//! Section content: blocks, drawers, lists, tables, keywords and the rest.
//!
//! Recognizers are tried in a fixed order on each non-blank line; a line that no
//! recognizer claims starts a paragraph, which runs until a blank line or until a
//! later line is claimed by a recognizer.

use super::inline::parse_inlines;
use super::timestamp::{parse_duration, parse_timestamp};
use super::{
    INLINE_TASK_LEVEL, headline_level, parse_hash_key_value, parse_headline, parse_planning_line,
    parse_property_line,
};
use crate::core::*;
use crate::scan::{self, Line};
use indexmap::IndexMap;

/// Shared parse state for one document.
pub(crate) struct Ctx<'a> {
    pub keywords: &'a TodoKeywords,
    /// Inside a list item, where `*` at column 0 is a bullet.
    pub nested: bool,
}

impl<'a> Ctx<'a> {
    pub fn new(keywords: &'a TodoKeywords) -> Self {
        Self {
            keywords,
            nested: false,
        }
    }

    fn nested(&self) -> Ctx<'a> {
        Ctx {
            keywords: self.keywords,
            nested: true,
        }
    }
}

pub(crate) fn parse_section(lines: &[Line<'_>], ctx: &Ctx<'_>) -> Section {
    let (leading_blank, elements) = parse_elements(lines, ctx);
    Section {
        leading_blank,
        elements,
    }
}

/// Elements of `lines`, plus the count of blank lines before the first one.
pub(crate) fn parse_elements(lines: &[Line<'_>], ctx: &Ctx<'_>) -> (usize, Vec<ElementNode>) {
    let mut leading = 0;
    let mut out: Vec<ElementNode> = Vec::new();
    let mut idx = 0;
    // Element that ended the previous paragraph, already parsed at `idx`.
    let mut pending: Option<(Element, usize)> = None;
    while idx < lines.len() {
        let line = lines[idx];
        if line.is_blank() {
            match out.last_mut() {
                Some(node) => node.post_blank += 1,
                None => leading += 1,
            }
            idx += 1;
            continue;
        }
        let (element, used) = match pending.take().or_else(|| recognize(lines, idx, ctx)) {
            Some(hit) => hit,
            None => {
                let (para, next) = paragraph(lines, idx, ctx);
                pending = next;
                para
            }
        };
        let used = used.max(1);
        let last = lines[idx + used - 1];
        out.push(ElementNode {
            element,
            range: SourceRange::new(line.start, last.end()),
            line: line.number,
            post_blank: 0,
        });
        idx += used;
    }
    (leading, out)
}

fn recognize(lines: &[Line<'_>], idx: usize, ctx: &Ctx<'_>) -> Option<(Element, usize)> {
    let text = lines[idx].text;
    let t = text.trim_start();

    if let Some(name) = scan::block_begin(text) {
        return Some(block(lines, idx, name, ctx));
    }
    if t.starts_with(':') {
        if let Some(hit) = drawer(lines, idx, ctx) {
            return Some(hit);
        }
        if is_fixed_width(t) {
            return Some(fixed_width(lines, idx));
        }
    }
    if headline_level(text).is_some_and(|n| n >= INLINE_TASK_LEVEL) {
        return Some(inline_task(lines, idx, ctx));
    }
    if let Some(sexp) = diary_sexp(text) {
        return Some((sexp, 1));
    }
    if let Some(planning) = parse_planning_line(text) {
        return Some((Element::Planning(planning), 1));
    }
    if let Some(clock) = clock_line(text) {
        return Some((Element::Clock(clock), 1));
    }
    if t.starts_with('|') {
        return Some(table(lines, idx));
    }
    let trimmed = t.trim_end();
    if trimmed.len() >= 5 && trimmed.bytes().all(|b| b == b'-') {
        return Some((Element::HorizontalRule, 1));
    }
    if let Ok((_, (key, value))) = parse_hash_key_value(t) {
        return Some((
            Element::Keyword {
                key: key.to_string(),
                value: value.to_string(),
            },
            1,
        ));
    }
    if scan::is_comment_line(text) {
        return Some(comment(lines, idx));
    }
    if let Some(hit) = footnote_definition(lines, idx, ctx) {
        return Some(hit);
    }
    if item_start(text, ctx).is_some() {
        return Some(list(lines, idx, ctx));
    }
    None
}

/// A paragraph starting at `idx`, and the element that interrupted it, if any.
fn paragraph(
    lines: &[Line<'_>],
    idx: usize,
    ctx: &Ctx<'_>,
) -> ((Element, usize), Option<(Element, usize)>) {
    let mut end = idx + 1;
    let mut next = None;
    while end < lines.len() && !lines[end].is_blank() {
        if let Some(hit) = recognize(lines, end, ctx) {
            next = Some(hit);
            break;
        }
        end += 1;
    }
    let text = join_lines(&lines[idx..end]);
    let para = Element::Paragraph(RichText {
        inlines: parse_inlines(&text),
    });
    ((para, end - idx), next)
}

fn join_lines(lines: &[Line<'_>]) -> String {
    lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n")
}

/* ------------------------------- Blocks ------------------------------- */

fn block(lines: &[Line<'_>], idx: usize, name: &str, ctx: &Ctx<'_>) -> (Element, usize) {
    let end = scan::find_block_end(lines, idx, name);
    if end.is_none() {
        tracing::warn!(line = lines[idx].number, block = name, "unterminated block");
    }
    let inner = &lines[idx + 1..end.unwrap_or(lines.len())];
    let used = end.map_or(lines.len() - idx, |e| e - idx + 1);

    let header = lines[idx].text.trim();
    let params = if name == ":" {
        header.get(8..).unwrap_or("").trim()
    } else {
        header.get(8 + name.len()..).unwrap_or("").trim()
    };
    let parameters = (!params.is_empty()).then(|| params.to_string());

    let element = if name == ":" {
        let (dyn_name, rest) = params
            .split_once(char::is_whitespace)
            .unwrap_or((params, ""));
        Element::DynamicBlock {
            name: dyn_name.to_string(),
            parameters: (!rest.trim().is_empty()).then(|| rest.trim().to_string()),
            contents: parse_elements(inner, ctx).1,
        }
    } else {
        match name.to_ascii_uppercase().as_str() {
            "SRC" => Element::SrcBlock(src_block(params, raw_body(inner))),
            "EXAMPLE" => Element::ExampleBlock {
                parameters,
                raw: raw_body(inner),
            },
            "EXPORT" => Element::ExportBlock {
                backend: params.split_whitespace().next().unwrap_or("").to_string(),
                raw: raw_body(inner),
            },
            "COMMENT" => Element::CommentBlock {
                raw: raw_body(inner),
            },
            "VERSE" => Element::VerseBlock {
                parameters,
                text: RichText {
                    inlines: parse_inlines(&join_lines(inner)),
                },
            },
            upper => Element::GreaterBlock(GreaterBlock {
                kind: match upper {
                    "QUOTE" => BlockKind::Quote,
                    "CENTER" => BlockKind::Center,
                    _ => BlockKind::Special(name.to_string()),
                },
                parameters,
                contents: parse_elements(inner, ctx).1,
            }),
        }
    };
    (element, used)
}

/// Verbatim block contents with comma escapes removed.
fn raw_body(inner: &[Line<'_>]) -> String {
    inner
        .iter()
        .map(|l| {
            let t = l.text.trim_start();
            let indent = &l.text[..l.text.len() - t.len()];
            match t.strip_prefix(',') {
                Some(rest) if scan::needs_comma_escape(rest) => format!("{}{}", indent, rest),
                _ => l.text.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn src_block(params: &str, code: String) -> SrcBlock {
    let mut tokens = params.split_whitespace().peekable();
    let language = tokens
        .next_if(|t| !t.starts_with('-') && !t.starts_with(':'))
        .map(str::to_string);
    let mut switches = Vec::new();
    while let Some(t) = tokens.next_if(|t| !t.starts_with(':')) {
        switches.push(t);
    }

    let mut parameters = IndexMap::new();
    let mut key: Option<&str> = None;
    let mut value: Vec<&str> = Vec::new();
    for t in tokens {
        if let Some(k) = t.strip_prefix(':') {
            if let Some(prev) = key.take() {
                parameters.insert(prev.to_string(), value.join(" "));
            }
            value.clear();
            key = Some(k);
        } else {
            value.push(t);
        }
    }
    if let Some(prev) = key {
        parameters.insert(prev.to_string(), value.join(" "));
    }

    SrcBlock {
        language,
        switches: (!switches.is_empty()).then(|| switches.join(" ")),
        parameters,
        code,
    }
}

/* ------------------------------- Drawers ------------------------------- */

fn drawer_name(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix(':')?.strip_suffix(':')?;
    let valid = !inner.is_empty()
        && !inner.eq_ignore_ascii_case("END")
        && inner
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_');
    valid.then_some(inner)
}

fn drawer_end(lines: &[Line<'_>], idx: usize) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(idx + 1)
        .find(|(_, l)| l.text.trim().eq_ignore_ascii_case(":END:"))
        .map(|(j, _)| j)
}

fn drawer(lines: &[Line<'_>], idx: usize, ctx: &Ctx<'_>) -> Option<(Element, usize)> {
    let name = drawer_name(lines[idx].text)?;
    let end = drawer_end(lines, idx)?;
    let inner = &lines[idx + 1..end];
    let element = if name.eq_ignore_ascii_case("PROPERTIES") {
        Element::PropertyDrawer(properties_from(inner))
    } else {
        Element::Drawer(Drawer {
            name: name.to_string(),
            contents: parse_elements(inner, ctx).1,
        })
    };
    Some((element, end - idx + 1))
}

/// A `:PROPERTIES:` drawer starting at `lines[0]`, and the lines it spans.
pub(crate) fn property_drawer(lines: &[Line<'_>]) -> Option<(Properties, usize)> {
    let first = lines.first()?;
    if !first.text.trim().eq_ignore_ascii_case(":PROPERTIES:") {
        return None;
    }
    let end = drawer_end(lines, 0)?;
    Some((properties_from(&lines[1..end]), end + 1))
}

fn properties_from(lines: &[Line<'_>]) -> Properties {
    let mut props = Properties::default();
    for line in lines {
        match parse_property_line(line.text) {
            Ok((_, (key, value))) => props.insert(key, value),
            Err(_) => tracing::debug!(line = line.number, "skipping malformed property line"),
        }
    }
    props
}

fn is_fixed_width(t: &str) -> bool {
    t.trim_end() == ":" || t.starts_with(": ")
}

fn fixed_width(lines: &[Line<'_>], idx: usize) -> (Element, usize) {
    let mut out = Vec::new();
    let mut end = idx;
    while end < lines.len() {
        let t = lines[end].text.trim_start();
        if !is_fixed_width(t) {
            break;
        }
        out.push(t.get(2..).unwrap_or("").to_string());
        end += 1;
    }
    (Element::FixedWidth(out), end - idx)
}

fn comment(lines: &[Line<'_>], idx: usize) -> (Element, usize) {
    let mut out = Vec::new();
    let mut end = idx;
    while end < lines.len() && scan::is_comment_line(lines[end].text) {
        let t = lines[end].text.trim_start();
        out.push(t.get(2..).unwrap_or("").to_string());
        end += 1;
    }
    (Element::Comment(out), end - idx)
}

/* ------------------------------ Inline tasks ------------------------------ */

fn inline_task(lines: &[Line<'_>], idx: usize, ctx: &Ctx<'_>) -> (Element, usize) {
    let headline = parse_headline(lines[idx].text, ctx.keywords);
    let next_task = lines
        .iter()
        .enumerate()
        .skip(idx + 1)
        .find(|(_, l)| headline_level(l.text).is_some_and(|n| n >= INLINE_TASK_LEVEL))
        .map(|(j, l)| (j, l.text.trim_start_matches('*').trim() == "END"));

    let (contents, used, closed) = match next_task {
        Some((end, true)) => (parse_elements(&lines[idx + 1..end], ctx).1, end - idx + 1, true),
        _ => (vec![], 1, false),
    };
    (
        Element::InlineTask(InlineTask {
            level: headline.level,
            keyword: headline.keyword,
            priority: headline.priority,
            title: RichText {
                inlines: parse_inlines(&headline.raw_title),
            },
            raw_title: headline.raw_title,
            tags: headline.tags,
            contents,
            closed,
        }),
        used,
    )
}

/* ------------------------- Diary sexps and clocks ------------------------- */

fn diary_sexp(text: &str) -> Option<Element> {
    if !text.starts_with("%%(") {
        return None;
    }
    let close = scan::matching_close(text, 2, '(', ')')?;
    Some(Element::DiarySexp {
        sexp: text[2..=close].to_string(),
        title: text[close + 1..].trim().to_string(),
    })
}

fn clock_line(text: &str) -> Option<Clock> {
    let t = text.trim_start().strip_prefix("CLOCK:")?.trim_start();
    let (rest, ts) = parse_timestamp(t).ok()?;
    if ts.active {
        return None;
    }
    let range_end = ts.end.as_ref().and_then(|e| e.date.map(|d| (d, e.time)));
    let (start, end) = match range_end {
        Some((date, time)) => {
            let mut end = Timestamp::new(date).inactive();
            end.time = time;
            let start = Timestamp {
                end: None,
                raw: None,
                ..ts
            };
            (start, Some(end))
        }
        None => (ts, None),
    };

    let rest = rest.trim();
    let minutes = if rest.is_empty() {
        None
    } else {
        let (after, minutes) = parse_duration(rest.strip_prefix("=>")?.trim_start()).ok()?;
        if !after.trim().is_empty() {
            return None;
        }
        Some(minutes)
    };
    Some(Clock {
        start,
        end,
        minutes,
    })
}

/* ------------------------------- Tables ------------------------------- */

fn table(lines: &[Line<'_>], idx: usize) -> (Element, usize) {
    let mut rows = Vec::new();
    let mut end = idx;
    while end < lines.len() && lines[end].text.trim_start().starts_with('|') {
        rows.push(table_row(lines[end].text.trim()));
        end += 1;
    }
    let mut formulas = Vec::new();
    while end < lines.len() {
        match parse_hash_key_value(lines[end].text.trim_start()) {
            Ok((_, (key, value))) if key.eq_ignore_ascii_case("TBLFM") => {
                formulas.push(value.to_string());
                end += 1;
            }
            _ => break,
        }
    }
    (Element::Table(Table { rows, formulas }), end - idx)
}

fn table_row(t: &str) -> TableRow {
    if t.starts_with("|-") {
        return TableRow::Rule;
    }
    let inner = &t[1..];
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    TableRow::Cells(
        inner
            .split('|')
            .map(|cell| RichText {
                inlines: parse_inlines(cell.trim()),
            })
            .collect(),
    )
}

/* ------------------------------ Footnotes ------------------------------ */

fn footnote_definition(
    lines: &[Line<'_>],
    idx: usize,
    ctx: &Ctx<'_>,
) -> Option<(Element, usize)> {
    let text = lines[idx].text;
    let after = text.strip_prefix("[fn:")?;
    let close = after.find(']')?;
    let label = &after[..close];
    if label.is_empty()
        || !label
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }

    let mut last = idx;
    let mut blanks = 0;
    for (j, line) in lines.iter().enumerate().skip(idx + 1) {
        if line.is_blank() {
            blanks += 1;
            if blanks >= 2 {
                break;
            }
            continue;
        }
        if line.text.starts_with("[fn:") {
            break;
        }
        blanks = 0;
        last = j;
    }

    let head = lines[idx].skip(4 + close + 1);
    let head = head.skip(head.text.len() - head.text.trim_start().len());
    let mut body = vec![head];
    body.extend_from_slice(&lines[idx + 1..=last]);
    Some((
        Element::FootnoteDefinition {
            label: label.to_string(),
            contents: parse_elements(&body, ctx).1,
        },
        last - idx + 1,
    ))
}

/* -------------------------------- Lists -------------------------------- */

struct ItemStart<'a> {
    indent: usize,
    bullet: &'a str,
    ordered: bool,
    counter: Option<u64>,
    checkbox: Option<Checkbox>,
    tag: Option<&'a str>,
    /// Byte offset of the item text within the line.
    content: usize,
}

fn item_start<'a>(text: &'a str, ctx: &Ctx<'_>) -> Option<ItemStart<'a>> {
    let body = text.trim_start_matches([' ', '\t']);
    let indent_bytes = text.len() - body.len();
    let indent = scan::indentation(text);

    let (bullet_len, ordered) = if body.starts_with(['-', '+'])
        || (body.starts_with('*') && (indent > 0 || ctx.nested))
    {
        (1, false)
    } else {
        let digits = body.bytes().take_while(u8::is_ascii_digit).count();
        match body.as_bytes().get(digits) {
            Some(b'.') | Some(b')') if (1..=9).contains(&digits) => (digits + 1, true),
            _ => return None,
        }
    };
    let after = &body[bullet_len..];
    if !(after.is_empty() || after.starts_with([' ', '\t'])) {
        return None;
    }

    let skip_ws = |p: usize| p + (text[p..].len() - text[p..].trim_start_matches([' ', '\t']).len());
    let mut pos = skip_ws(indent_bytes + bullet_len);

    let mut counter = None;
    if let Some(r) = text[pos..].strip_prefix("[@") {
        if let Some(end) = r.find(']') {
            if let Ok(n) = r[..end].parse::<u64>() {
                counter = Some(n);
                pos = skip_ws(pos + 2 + end + 1);
            }
        }
    }

    let mut checkbox = None;
    let cb = text[pos..].as_bytes();
    if cb.len() >= 3 && cb[0] == b'[' && cb[2] == b']' && matches!(cb.get(3), None | Some(b' ') | Some(b'\t')) {
        checkbox = match cb[1] {
            b' ' => Some(Checkbox::Empty),
            b'-' => Some(Checkbox::Partial),
            b'X' | b'x' => Some(Checkbox::Checked),
            _ => None,
        };
        if checkbox.is_some() {
            pos = skip_ws(pos + 3);
        }
    }

    let mut tag = None;
    if !ordered {
        let rest = &text[pos..];
        if let Some(sep) = rest.find(" :: ") {
            tag = Some(&rest[..sep]);
            pos += sep + 4;
        } else if let Some(term) = rest.trim_end().strip_suffix(" ::") {
            tag = Some(term);
            pos = text.len();
        }
    }

    Some(ItemStart {
        indent,
        bullet: &body[..bullet_len],
        ordered,
        counter,
        checkbox,
        tag,
        content: pos,
    })
}

fn list(lines: &[Line<'_>], idx: usize, ctx: &Ctx<'_>) -> (Element, usize) {
    let nested = ctx.nested();
    let mut items: Vec<ListItem> = Vec::new();
    let mut kind = ListKind::Unordered;
    let mut indent = 0;
    let mut j = idx;

    while let Some(start) = item_start(lines[j].text, ctx) {
        if items.is_empty() {
            indent = start.indent;
            kind = if start.ordered {
                ListKind::Ordered
            } else if start.tag.is_some() {
                ListKind::Description
            } else {
                ListKind::Unordered
            };
        }

        let mut last = j;
        let mut blanks = 0;
        for (k, line) in lines.iter().enumerate().skip(j + 1) {
            if line.is_blank() {
                blanks += 1;
                if blanks >= 2 {
                    break;
                }
                continue;
            }
            if scan::indentation(line.text) <= indent {
                break;
            }
            blanks = 0;
            last = k;
        }

        let body = item_body(lines, j, last, start.content);
        items.push(ListItem {
            bullet: start.bullet.to_string(),
            counter: start.counter,
            checkbox: start.checkbox,
            tag: start.tag.map(|t| RichText {
                inlines: parse_inlines(t.trim()),
            }),
            contents: parse_elements(&body, &nested).1,
            post_blank: 0,
        });

        let mut next = last + 1;
        while next < lines.len() && lines[next].is_blank() {
            next += 1;
        }
        let gap = next - last - 1;
        let sibling = next < lines.len()
            && gap < 2
            && item_start(lines[next].text, ctx).is_some_and(|s| s.indent == indent);
        if sibling {
            if let Some(item) = items.last_mut() {
                item.post_blank = gap;
            }
            j = next;
        } else {
            j = last + 1;
            break;
        }
    }

    (Element::List(List { kind, items }), j - idx)
}

/// Item text on the bullet line followed by its dedented continuation lines.
fn item_body<'a>(lines: &[Line<'a>], first: usize, last: usize, content: usize) -> Vec<Line<'a>> {
    let mut body = Vec::new();
    let head = lines[first].skip(content);
    if !head.is_blank() {
        body.push(head);
    }
    let rest = &lines[first + 1..=last];
    let dedent = rest
        .iter()
        .filter(|l| !l.is_blank())
        .map(|l| scan::indentation(l.text))
        .min()
        .unwrap_or(0);
    body.extend(rest.iter().map(|l| l.skip(scan::dedent_offset(l.text, dedent))));
    body
}
