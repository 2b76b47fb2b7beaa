//! Inline objects inside paragraphs, headlines and table cells.
//!
//! Text is scanned left to right. At each position the recognizers run in a fixed
//! order (links, then footnotes/cookies/macros/targets, then emphasis, timestamps,
//! entities and the rest); the first match wins and everything in between is text.

use super::PResult;
use super::timestamp::parse_timestamp;
use crate::core::{Emphasis, Inline, Link, LinkFormat, LinkKind};
use crate::scan::matching_close;
use nom::{
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit0, one_of},
    combinator::{opt, recognize},
    error::VerboseError,
    sequence::{delimited, tuple},
};

const PLAIN_LINK_SCHEMES: &[&str] = &[
    "https", "http", "ftp", "mailto", "file", "id", "doi", "news", "shell",
];

/// Parse `s` into inline objects. Never fails; unrecognized input is text.
pub fn parse_inlines(s: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;
    while pos < s.len() {
        let rest = &s[pos..];
        let prev = s[..pos].chars().next_back();
        match object_at(rest, prev) {
            Some((consumed, inline)) if consumed > 0 => {
                if text_start < pos {
                    out.push(Inline::Text(s[text_start..pos].to_string()));
                }
                out.push(inline);
                pos += consumed;
                text_start = pos;
            }
            _ => pos += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    if text_start < s.len() {
        out.push(Inline::Text(s[text_start..].to_string()));
    }
    out
}

fn object_at(rest: &str, prev: Option<char>) -> Option<(usize, Inline)> {
    let first = rest.chars().next()?;
    let word_start = prev.is_none_or(|p| !p.is_alphanumeric());
    let consumed = |r: &str| rest.len() - r.len();

    // links
    match first {
        '[' => {
            if let Ok((r, link)) = parse_bracket_link(rest) {
                return Some((consumed(r), link));
            }
        }
        '<' => {
            if let Ok((r, link)) = parse_angle_link(rest) {
                return Some((consumed(r), link));
            }
        }
        _ if word_start && first.is_ascii_alphabetic() => {
            if let Some((len, link)) = plain_link(rest) {
                return Some((len, link));
            }
        }
        _ => {}
    }

    // footnote references, statistics cookies, macros, targets
    let found = match first {
        '[' => parse_footnote_ref(rest)
            .or_else(|_| parse_statistics_cookie(rest))
            .ok(),
        '{' => parse_macro(rest).ok(),
        '<' => parse_target(rest).ok(),
        _ => None,
    };
    if let Some((r, inline)) = found {
        return Some((consumed(r), inline));
    }

    // emphasis, code, verbatim
    if let Some(hit) = emphasis(rest, prev) {
        return Some(hit);
    }

    // timestamps
    if matches!(first, '<' | '[') && rest[1..].starts_with(|c: char| c.is_ascii_digit()) {
        if let Ok((r, ts)) = parse_timestamp(rest) {
            return Some((consumed(r), Inline::Timestamp(ts)));
        }
    }

    // entities and line breaks
    if first == '\\' {
        if let Some(hit) = line_break(rest).or_else(|| entity(rest)) {
            return Some(hit);
        }
    }

    // remaining objects
    let found = match first {
        '@' => parse_export_snippet(rest).ok(),
        's' if word_start => parse_inline_src(rest).ok(),
        'c' if word_start => parse_inline_call(rest).ok(),
        '_' | '^' if prev.is_some_and(|p| !p.is_whitespace()) => script(rest),
        _ => None,
    };
    found.map(|(r, inline)| (consumed(r), inline))
}

/* ------------------------------- Links ------------------------------- */

fn parse_bracket_link(i: &str) -> PResult<'_, Inline> {
    let (i, _) = tag("[[")(i)?;
    let (i, target) = take_while1(|c: char| c != ']' && c != '[' && c != '\n')(i)?;
    let (i, _) = char(']')(i)?;
    let (i, description) = opt(delimited(char('['), take_until("]]"), char(']')))(i)?;
    let (i, _) = char(']')(i)?;
    Ok((
        i,
        Inline::Link(Link {
            kind: link_kind_from_target(target),
            description: description.map(parse_inlines),
            format: LinkFormat::Bracket,
        }),
    ))
}

fn parse_angle_link(i: &str) -> PResult<'_, Inline> {
    let (i, _) = char('<')(i)?;
    let (i, target) = recognize(tuple((
        take_while1(|c: char| c.is_ascii_alphabetic()),
        char(':'),
        take_while1(|c: char| c != '>' && c != '<' && c != '\n'),
    )))(i)?;
    let (i, _) = char('>')(i)?;
    Ok((
        i,
        Inline::Link(Link {
            kind: link_kind_from_target(target),
            description: None,
            format: LinkFormat::Angle,
        }),
    ))
}

fn plain_link(rest: &str) -> Option<(usize, Inline)> {
    let (scheme, after) = rest.split_once(':')?;
    if !PLAIN_LINK_SCHEMES.contains(&scheme) {
        return None;
    }
    let body_len = after
        .find(|c: char| c.is_whitespace() || "()<>[]".contains(c))
        .unwrap_or(after.len());
    let body = after[..body_len].trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
    if body.is_empty() {
        return None;
    }
    let target = &rest[..scheme.len() + 1 + body.len()];
    Some((
        target.len(),
        Inline::Link(Link {
            kind: link_kind_from_target(target),
            description: None,
            format: LinkFormat::Plain,
        }),
    ))
}

pub(crate) fn link_kind_from_target(t: &str) -> LinkKind {
    let s = t.trim();
    if s.starts_with("http://") || s.starts_with("https://") {
        LinkKind::Http { url: s.to_string() }
    } else if let Some(rem) = s.strip_prefix("id:") {
        LinkKind::Id {
            id: rem.to_string(),
        }
    } else if let Some(rem) = s.strip_prefix("file:") {
        file_link(rem)
    } else if let Some(rem) = s.strip_prefix('#') {
        LinkKind::CustomId {
            id: rem.to_string(),
        }
    } else if let Some(rem) = s.strip_prefix('*') {
        LinkKind::Heading {
            title: rem.to_string(),
        }
    } else if s.starts_with('/') || s.starts_with("./") || s.starts_with("~/") || s.starts_with("../")
    {
        file_link(s)
    } else if let Some((proto, rest)) = s
        .split_once(':')
        .filter(|(p, _)| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    {
        LinkKind::Custom {
            protocol: proto.to_string(),
            target: rest.to_string(),
        }
    } else {
        LinkKind::Fuzzy {
            target: s.to_string(),
        }
    }
}

fn file_link(rem: &str) -> LinkKind {
    match rem.split_once("::") {
        Some((path, search)) => LinkKind::File {
            path: path.to_string(),
            search: Some(search.to_string()),
        },
        None => LinkKind::File {
            path: rem.to_string(),
            search: None,
        },
    }
}

/* -------------------- Footnotes, cookies, macros, targets -------------------- */

fn parse_footnote_ref(i: &str) -> PResult<'_, Inline> {
    let start = i;
    let (i, _) = tag("[fn:")(i)?;
    let (i, label) = take_while(|c: char| c.is_alphanumeric() || c == '-' || c == '_')(i)?;
    if let Ok((r, _)) = char::<_, VerboseError<&str>>(']')(i) {
        if label.is_empty() {
            return Err(nom::Err::Error(VerboseError {
                errors: vec![(start, nom::error::VerboseErrorKind::Context("footnote"))],
            }));
        }
        return Ok((
            r,
            Inline::FootnoteRef {
                label: Some(label.to_string()),
                definition: None,
            },
        ));
    }
    let (i, _) = char(':')(i)?;
    let close = matching_close(start, 0, '[', ']').ok_or_else(|| {
        nom::Err::Error(VerboseError {
            errors: vec![(start, nom::error::VerboseErrorKind::Context("footnote"))],
        })
    })?;
    let offset = start.len() - i.len();
    let definition = &start[offset..close];
    Ok((
        &start[close + 1..],
        Inline::FootnoteRef {
            label: (!label.is_empty()).then(|| label.to_string()),
            definition: Some(parse_inlines(definition)),
        },
    ))
}

fn parse_statistics_cookie(i: &str) -> PResult<'_, Inline> {
    let (rest, inner) = delimited(
        char('['),
        nom::branch::alt((
            recognize(tuple((digit0, char('/'), digit0))),
            recognize(tuple((digit0, char('%')))),
        )),
        char(']'),
    )(i)?;
    Ok((rest, Inline::StatisticsCookie(inner.to_string())))
}

fn parse_macro(i: &str) -> PResult<'_, Inline> {
    let (i, _) = tag("{{{")(i)?;
    let (i, name) = recognize(tuple((
        take_while1(|c: char| c.is_ascii_alphabetic()),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
    )))(i)?;
    if let Ok((r, _)) = tag::<_, _, VerboseError<&str>>("}}}")(i) {
        return Ok((
            r,
            Inline::Macro {
                name: name.to_string(),
                arguments: None,
            },
        ));
    }
    let (i, _) = char('(')(i)?;
    let (i, args) = take_until(")}}}")(i)?;
    let (i, _) = tag(")}}}")(i)?;
    Ok((
        i,
        Inline::Macro {
            name: name.to_string(),
            arguments: Some(args.to_string()),
        },
    ))
}

fn parse_target(i: &str) -> PResult<'_, Inline> {
    let (i, _) = tag("<<")(i)?;
    let (i, name) = take_while1(|c: char| c != '<' && c != '>' && c != '\n')(i)?;
    let (i, _) = tag(">>")(i)?;
    if name.starts_with(char::is_whitespace) || name.ends_with(char::is_whitespace) {
        return Err(nom::Err::Error(VerboseError {
            errors: vec![(i, nom::error::VerboseErrorKind::Context("target"))],
        }));
    }
    Ok((i, Inline::Target(name.to_string())))
}

/* ------------------------------ Emphasis ------------------------------ */

fn emphasis(rest: &str, prev: Option<char>) -> Option<(usize, Inline)> {
    let marker = rest.chars().next()?;
    if !matches!(marker, '*' | '/' | '_' | '+' | '~' | '=') {
        return None;
    }
    if let Some(p) = prev {
        if !(p.is_whitespace() || "-('\"{".contains(p)) {
            return None;
        }
    }
    let body = &rest[1..];
    if body.starts_with(char::is_whitespace) || body.is_empty() {
        return None;
    }
    let mut last = None;
    let mut close = None;
    for (idx, c) in body.char_indices() {
        if c == marker && idx > 0 && last.is_some_and(|l: char| !l.is_whitespace()) {
            let after = body[idx + 1..].chars().next();
            if after.is_none_or(|a| a.is_whitespace() || "-.,;:!?')}\"[\\".contains(a)) {
                close = Some(idx);
                break;
            }
        }
        last = Some(c);
    }
    let close = close?;
    let inner = &body[..close];
    let inline = match marker {
        '~' => Inline::Code(inner.to_string()),
        '=' => Inline::Verbatim(inner.to_string()),
        _ => Inline::Emphasis {
            kind: match marker {
                '*' => Emphasis::Bold,
                '/' => Emphasis::Italic,
                '_' => Emphasis::Underline,
                _ => Emphasis::Strike,
            },
            children: parse_inlines(inner),
        },
    };
    Some((close + 2, inline))
}

pub(crate) fn emphasis_marker(kind: Emphasis) -> char {
    match kind {
        Emphasis::Bold => '*',
        Emphasis::Italic => '/',
        Emphasis::Underline => '_',
        Emphasis::Strike => '+',
    }
}

/* ------------------------ Entities and line breaks ------------------------ */

fn line_break(rest: &str) -> Option<(usize, Inline)> {
    let after = rest.strip_prefix("\\\\")?;
    let tail = after.trim_start_matches([' ', '\t']);
    (tail.is_empty() || tail.starts_with('\n')).then_some((2, Inline::LineBreak))
}

fn entity(rest: &str) -> Option<(usize, Inline)> {
    let body = &rest[1..];
    let len = body
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(body.len());
    if len == 0 {
        return None;
    }
    let name = &body[..len];
    let braces = body[len..].starts_with("{}");
    let consumed = 1 + len + if braces { 2 } else { 0 };
    Some((
        consumed,
        Inline::Entity {
            name: name.to_string(),
            braces,
        },
    ))
}

/* ------------------------------ Other objects ------------------------------ */

fn parse_export_snippet(i: &str) -> PResult<'_, Inline> {
    let (i, _) = tag("@@")(i)?;
    let (i, backend) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')(i)?;
    let (i, _) = char(':')(i)?;
    let (i, value) = take_until("@@")(i)?;
    let (i, _) = tag("@@")(i)?;
    Ok((
        i,
        Inline::ExportSnippet {
            backend: backend.to_string(),
            value: value.to_string(),
        },
    ))
}

fn parse_inline_src(i: &str) -> PResult<'_, Inline> {
    let (i, _) = tag("src_")(i)?;
    let (i, language) = take_while1(|c: char| !c.is_whitespace() && c != '[' && c != '{')(i)?;
    let (i, parameters) = opt(bracketed('[', ']'))(i)?;
    let (i, body) = bracketed('{', '}')(i)?;
    Ok((
        i,
        Inline::InlineSrc {
            language: language.to_string(),
            parameters: parameters.map(str::to_string),
            body: body.to_string(),
        },
    ))
}

fn parse_inline_call(i: &str) -> PResult<'_, Inline> {
    let (i, _) = tag("call_")(i)?;
    let (i, name) =
        take_while1(|c: char| !c.is_whitespace() && c != '[' && c != '(' && c != ']')(i)?;
    let (i, inside_header) = opt(bracketed('[', ']'))(i)?;
    let (i, arguments) = bracketed('(', ')')(i)?;
    let (i, end_header) = opt(bracketed('[', ']'))(i)?;
    Ok((
        i,
        Inline::InlineCall {
            name: name.to_string(),
            inside_header: inside_header.map(str::to_string),
            arguments: arguments.to_string(),
            end_header: end_header.map(str::to_string),
        },
    ))
}

/// Balanced `open ... close` group on one line; yields the text between.
fn bracketed(open: char, close: char) -> impl Fn(&str) -> PResult<'_, &str> {
    move |i: &str| {
        let fail = || {
            nom::Err::Error(VerboseError {
                errors: vec![(i, nom::error::VerboseErrorKind::Char(open))],
            })
        };
        if !i.starts_with(open) {
            return Err(fail());
        }
        let end = matching_close(i, 0, open, close).ok_or_else(fail)?;
        let inner = &i[1..end];
        if inner.contains('\n') {
            return Err(fail());
        }
        Ok((&i[end + 1..], inner))
    }
}

fn script(rest: &str) -> Option<(&str, Inline)> {
    let (r, marker) = one_of::<_, _, VerboseError<&str>>("_^")(rest).ok()?;
    let (r, inner) = bracketed('{', '}')(r).ok()?;
    let children = parse_inlines(inner);
    Some((
        r,
        if marker == '_' {
            Inline::Subscript(children)
        } else {
            Inline::Superscript(children)
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Timestamp;
    use chrono::NaiveDate;

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    #[test]
    fn emphasis_nested() {
        let v = parse_inlines("This is *bold and /italic/* end.");
        assert_eq!(v[0], text("This is "));
        match &v[1] {
            Inline::Emphasis {
                kind: Emphasis::Bold,
                children,
            } => {
                assert_eq!(children[0], text("bold and "));
                assert!(matches!(
                    children[1],
                    Inline::Emphasis {
                        kind: Emphasis::Italic,
                        ..
                    }
                ));
            }
            other => panic!("expected bold, got {:?}", other),
        }
        assert_eq!(v[2], text(" end."));
    }

    #[test]
    fn code_and_verbatim() {
        let v = parse_inlines("Use ~println!()~ with =NO_EXPAND=.");
        assert_eq!(v[1], Inline::Code("println!()".into()));
        assert_eq!(v[3], Inline::Verbatim("NO_EXPAND".into()));
    }

    #[test]
    fn emphasis_needs_word_boundaries() {
        assert_eq!(parse_inlines("a*b*c"), vec![text("a*b*c")]);
        assert_eq!(parse_inlines("2 * 3 * 4"), vec![text("2 * 3 * 4")]);
        assert_eq!(parse_inlines("path/to/file"), vec![text("path/to/file")]);
    }

    #[test]
    fn links_bracketed_plain_and_angle() {
        let v = parse_inlines("See [[https://example.com][the site]]!");
        match &v[1] {
            Inline::Link(Link {
                kind: LinkKind::Http { url },
                description: Some(desc),
                format: LinkFormat::Bracket,
            }) => {
                assert_eq!(url, "https://example.com");
                assert_eq!(desc, &vec![text("the site")]);
            }
            other => panic!("expected bracket link, got {:?}", other),
        }

        let v = parse_inlines("Visit https://example.com/x. Then rest.");
        match &v[1] {
            Inline::Link(Link {
                kind: LinkKind::Http { url },
                format: LinkFormat::Plain,
                ..
            }) => assert_eq!(url, "https://example.com/x"),
            other => panic!("expected plain link, got {:?}", other),
        }
        assert_eq!(v[2], text(". Then rest."));

        let v = parse_inlines("<mailto:me@example.org>");
        assert!(matches!(
            &v[0],
            Inline::Link(Link {
                kind: LinkKind::Custom { protocol, .. },
                format: LinkFormat::Angle,
                ..
            }) if protocol == "mailto"
        ));
    }

    #[test]
    fn link_kinds() {
        assert!(matches!(link_kind_from_target("#intro"), LinkKind::CustomId { .. }));
        assert!(matches!(link_kind_from_target("*Tasks"), LinkKind::Heading { .. }));
        assert!(matches!(link_kind_from_target("id:abc-1"), LinkKind::Id { .. }));
        assert!(matches!(link_kind_from_target("Some target"), LinkKind::Fuzzy { .. }));
        assert_eq!(
            link_kind_from_target("file:notes.org::*Inbox"),
            LinkKind::File {
                path: "notes.org".into(),
                search: Some("*Inbox".into()),
            }
        );
    }

    #[test]
    fn links_take_precedence_over_emphasis() {
        let v = parse_inlines("[[*a heading*]]");
        assert!(matches!(&v[0], Inline::Link(_)));
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn footnotes_cookies_macros_targets() {
        let v = parse_inlines("Jump to <<here>> [fn:1] [fn::inline *note*] [2/3] {{{kbd(C-c)}}}");
        assert!(v.contains(&Inline::Target("here".into())));
        assert!(v.contains(&Inline::FootnoteRef {
            label: Some("1".into()),
            definition: None,
        }));
        assert!(v.iter().any(|i| matches!(
            i,
            Inline::FootnoteRef { label: None, definition: Some(d) } if d.len() == 2
        )));
        assert!(v.contains(&Inline::StatisticsCookie("2/3".into())));
        assert!(v.contains(&Inline::Macro {
            name: "kbd".into(),
            arguments: Some("C-c".into()),
        }));
    }

    #[test]
    fn timestamps_inline() {
        let v = parse_inlines("Meet <2024-03-01 Fri 10:00> then [2024-03-02].");
        let stamps: Vec<&Timestamp> = v
            .iter()
            .filter_map(|i| match i {
                Inline::Timestamp(ts) => Some(ts),
                _ => None,
            })
            .collect();
        assert_eq!(stamps.len(), 2);
        assert!(stamps[0].active);
        assert_eq!(stamps[1].date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert!(!stamps[1].active);
    }

    #[test]
    fn entities_and_line_breaks() {
        let v = parse_inlines("\\alpha{}x \\beta end\\\\");
        assert_eq!(
            v[0],
            Inline::Entity {
                name: "alpha".into(),
                braces: true,
            }
        );
        assert_eq!(
            v[2],
            Inline::Entity {
                name: "beta".into(),
                braces: false,
            }
        );
        assert_eq!(v.last(), Some(&Inline::LineBreak));
    }

    #[test]
    fn scripts_snippets_src_and_calls() {
        let v = parse_inlines("H_{2}O x^{n} @@html:<b>@@ src_python[:results raw]{1 + 1} call_sq(4)");
        assert!(v.contains(&Inline::Subscript(vec![text("2")])));
        assert!(v.contains(&Inline::Superscript(vec![text("n")])));
        assert!(v.contains(&Inline::ExportSnippet {
            backend: "html".into(),
            value: "<b>".into(),
        }));
        assert!(v.contains(&Inline::InlineSrc {
            language: "python".into(),
            parameters: Some(":results raw".into()),
            body: "1 + 1".into(),
        }));
        assert!(v.contains(&Inline::InlineCall {
            name: "sq".into(),
            inside_header: None,
            arguments: "4".into(),
            end_header: None,
        }));
    }

    #[test]
    fn unbraced_subscript_stays_text() {
        assert_eq!(parse_inlines("snake_case"), vec![text("snake_case")]);
    }
}
