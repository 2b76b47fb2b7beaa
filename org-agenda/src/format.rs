//! Canonical serializer. Output depends only on the tree, so formatting is idempotent:
//! `format(parse(format(parse(x)))) == format(parse(x))`.

use crate::core::*;
use crate::parser::inline::emphasis_marker;
use crate::scan::needs_comma_escape;

pub fn format_document(doc: &Document) -> String {
    let mut out = String::new();
    render_section(&mut out, &doc.preamble);

    // Pre-order walk with an explicit stack.
    let mut stack: Vec<HeadingId> = doc.roots.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
        let Some(heading) = doc.heading(id) else {
            continue;
        };
        out.push_str(&format_heading(heading));
        stack.extend(heading.children.iter().rev().copied());
    }
    out
}

/// One heading without its children: headline, planning, properties and section.
pub fn format_heading(heading: &Heading) -> String {
    let mut out = render_headline(
        heading.level,
        heading.keyword.as_ref(),
        heading.priority,
        &heading.title,
        &heading.tags,
    );
    if let Some(planning) = heading.planning.as_ref().filter(|p| !p.is_empty()) {
        out.push_str(&render_planning(planning));
    }
    if !heading.properties.is_empty() {
        out.push_str(&render_properties(&heading.properties));
    }
    if let Some(section) = &heading.section {
        render_section(&mut out, section);
    }
    out
}

pub fn format_element(element: &Element) -> String {
    render_element(element)
}

pub fn format_inlines(inlines: &[Inline]) -> String {
    render_rich_text(inlines)
}

/// Source spelling when the timestamp was parsed, canonical form otherwise.
pub fn format_timestamp(ts: &Timestamp) -> String {
    match &ts.raw {
        Some(raw) => raw.clone(),
        None => render_timestamp(ts),
    }
}

/* ----------------------------- Sections ----------------------------- */

fn render_section(out: &mut String, section: &Section) {
    push_blank(out, section.leading_blank);
    render_nodes(out, &section.elements);
}

fn render_nodes(out: &mut String, nodes: &[ElementNode]) {
    for node in nodes {
        out.push_str(&render_element(&node.element));
        push_blank(out, node.post_blank);
    }
}

fn nodes_to_string(nodes: &[ElementNode]) -> String {
    let mut buf = String::new();
    render_nodes(&mut buf, nodes);
    buf
}

fn push_blank(out: &mut String, n: usize) {
    for _ in 0..n {
        out.push('\n');
    }
}

/* ----------------------------- Elements ----------------------------- */

fn render_element(element: &Element) -> String {
    match element {
        Element::Paragraph(text) => {
            let mut buf = render_rich_text(&text.inlines);
            buf.push('\n');
            buf
        }
        Element::SrcBlock(src) => {
            let mut header = String::from("#+BEGIN_SRC");
            if let Some(lang) = &src.language {
                header.push(' ');
                header.push_str(lang);
            }
            if let Some(switches) = &src.switches {
                header.push(' ');
                header.push_str(switches);
            }
            for (k, v) in &src.parameters {
                header.push_str(" :");
                header.push_str(k);
                if !v.is_empty() {
                    header.push(' ');
                    header.push_str(v);
                }
            }
            render_verbatim_block(&header, &src.code, "#+END_SRC")
        }
        Element::ExampleBlock { parameters, raw } => render_verbatim_block(
            &with_parameters("#+BEGIN_EXAMPLE", parameters.as_deref()),
            raw,
            "#+END_EXAMPLE",
        ),
        Element::ExportBlock { backend, raw } => render_verbatim_block(
            &with_parameters("#+BEGIN_EXPORT", Some(backend)),
            raw,
            "#+END_EXPORT",
        ),
        Element::CommentBlock { raw } => {
            render_verbatim_block("#+BEGIN_COMMENT", raw, "#+END_COMMENT")
        }
        Element::VerseBlock { parameters, text } => {
            let mut buf = with_parameters("#+BEGIN_VERSE", parameters.as_deref());
            buf.push('\n');
            if !text.is_empty() {
                buf.push_str(&render_rich_text(&text.inlines));
                buf.push('\n');
            }
            buf.push_str("#+END_VERSE\n");
            buf
        }
        Element::GreaterBlock(block) => {
            let name = block.kind.name();
            let mut buf = with_parameters(&format!("#+BEGIN_{}", name), block.parameters.as_deref());
            buf.push('\n');
            render_nodes(&mut buf, &block.contents);
            buf.push_str("#+END_");
            buf.push_str(name);
            buf.push('\n');
            buf
        }
        Element::DynamicBlock {
            name,
            parameters,
            contents,
        } => {
            let mut buf = format!("#+BEGIN: {}", name);
            if let Some(p) = parameters {
                buf.push(' ');
                buf.push_str(p);
            }
            buf.push('\n');
            render_nodes(&mut buf, contents);
            buf.push_str("#+END:\n");
            buf
        }
        Element::Drawer(drawer) => {
            let mut buf = String::new();
            buf.push(':');
            buf.push_str(&drawer.name);
            buf.push_str(":\n");
            render_nodes(&mut buf, &drawer.contents);
            buf.push_str(":END:\n");
            buf
        }
        Element::PropertyDrawer(props) => render_properties(props),
        Element::Table(table) => render_table(table),
        Element::List(list) => render_list(list),
        Element::FootnoteDefinition { label, contents } => {
            let head = format!("[fn:{}]", label);
            hang(&head, &nodes_to_string(contents), "")
        }
        Element::HorizontalRule => "-----\n".to_string(),
        Element::FixedWidth(lines) => prefixed_lines(":", lines),
        Element::Keyword { key, value } => {
            if value.is_empty() {
                format!("#+{}:\n", key)
            } else {
                format!("#+{}: {}\n", key, value)
            }
        }
        Element::Comment(lines) => prefixed_lines("#", lines),
        Element::InlineTask(task) => {
            let mut buf = render_headline(
                task.level,
                task.keyword.as_ref(),
                task.priority,
                &task.title,
                &task.tags,
            );
            if task.closed {
                render_nodes(&mut buf, &task.contents);
                buf.push_str(&"*".repeat(task.level));
                buf.push_str(" END\n");
            }
            buf
        }
        Element::DiarySexp { sexp, title } => {
            if title.is_empty() {
                format!("%%{}\n", sexp)
            } else {
                format!("%%{} {}\n", sexp, title)
            }
        }
        Element::Planning(planning) => render_planning(planning),
        Element::Clock(clock) => render_clock(clock),
    }
}

fn with_parameters(head: &str, parameters: Option<&str>) -> String {
    match parameters.filter(|p| !p.is_empty()) {
        Some(p) => format!("{} {}", head, p),
        None => head.to_string(),
    }
}

fn render_verbatim_block(header: &str, body: &str, footer: &str) -> String {
    let mut buf = String::new();
    buf.push_str(header);
    buf.push('\n');
    if !body.is_empty() {
        for line in body.split('\n') {
            let t = line.trim_start();
            if needs_comma_escape(t) {
                buf.push_str(&line[..line.len() - t.len()]);
                buf.push(',');
                buf.push_str(t);
            } else {
                buf.push_str(line);
            }
            buf.push('\n');
        }
    }
    buf.push_str(footer);
    buf.push('\n');
    buf
}

fn prefixed_lines(prefix: &str, lines: &[String]) -> String {
    let mut buf = String::new();
    for line in lines {
        buf.push_str(prefix);
        if !line.is_empty() {
            buf.push(' ');
            buf.push_str(line);
        }
        buf.push('\n');
    }
    buf
}

/// `head` followed by `body`: the first body line on the same line as `head`,
/// the rest prefixed with `indent`. Blank lines stay empty.
fn hang(head: &str, body: &str, indent: &str) -> String {
    let mut buf = String::from(head);
    let mut lines = body.split_inclusive('\n');
    match lines.next() {
        Some(first) if first != "\n" => {
            buf.push(' ');
            buf.push_str(first);
        }
        Some(_) | None => buf.push('\n'),
    }
    for line in lines {
        if line != "\n" {
            buf.push_str(indent);
        }
        buf.push_str(line);
    }
    buf
}

fn render_list(list: &List) -> String {
    let mut buf = String::new();
    for item in &list.items {
        let mut head = item.bullet.clone();
        if let Some(counter) = item.counter {
            head.push_str(&format!(" [@{}]", counter));
        }
        if let Some(cb) = item.checkbox {
            let symbol = match cb {
                Checkbox::Empty => ' ',
                Checkbox::Partial => '-',
                Checkbox::Checked => 'X',
            };
            head.push_str(" [");
            head.push(symbol);
            head.push(']');
        }
        if let Some(label) = &item.tag {
            head.push(' ');
            head.push_str(&render_rich_text(&label.inlines));
            head.push_str(" ::");
        }
        buf.push_str(&hang(&head, &nodes_to_string(&item.contents), "  "));
        push_blank(&mut buf, item.post_blank);
    }
    buf
}

fn render_table(table: &Table) -> String {
    let rows: Vec<Option<Vec<String>>> = table
        .rows
        .iter()
        .map(|row| match row {
            TableRow::Rule => None,
            TableRow::Cells(cells) => Some(
                cells
                    .iter()
                    .map(|c| render_rich_text(&c.inlines))
                    .collect(),
            ),
        })
        .collect();

    let columns = rows.iter().flatten().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for cells in rows.iter().flatten() {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut buf = String::new();
    for row in &rows {
        match row {
            None if widths.is_empty() => buf.push_str("|-"),
            None => {
                let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
                buf.push('|');
                buf.push_str(&dashes.join("+"));
                buf.push('|');
            }
            Some(cells) => {
                buf.push('|');
                for (col, width) in widths.iter().enumerate() {
                    let cell = cells.get(col).map(String::as_str).unwrap_or("");
                    buf.push(' ');
                    buf.push_str(cell);
                    buf.push_str(&" ".repeat(width - cell.chars().count()));
                    buf.push_str(" |");
                }
            }
        }
        buf.push('\n');
    }
    for formula in &table.formulas {
        buf.push_str("#+TBLFM: ");
        buf.push_str(formula);
        buf.push('\n');
    }
    buf
}

/* ------------------------------ Headlines ------------------------------ */

fn render_headline(
    level: usize,
    keyword: Option<&TodoKeyword>,
    priority: Option<Priority>,
    title: &RichText,
    tags: &[Tag],
) -> String {
    let mut buf = "*".repeat(level);
    let mut parts: Vec<String> = Vec::new();
    if let Some(todo) = keyword {
        parts.push(todo.text.clone());
    }
    if let Some(priority) = priority {
        parts.push(format!("[#{}]", priority.0));
    }
    let title = render_rich_text(&title.inlines);
    if !title.is_empty() {
        parts.push(title);
    }
    if !tags.is_empty() {
        let mut t = String::from(":");
        for tag in tags {
            t.push_str(&tag.0);
            t.push(':');
        }
        parts.push(t);
    }
    buf.push(' ');
    buf.push_str(&parts.join(" "));
    buf.push('\n');
    buf
}

fn render_planning(plan: &Planning) -> String {
    let mut parts = Vec::new();
    if let Some(ts) = &plan.scheduled {
        parts.push(format!("SCHEDULED: {}", format_timestamp(ts)));
    }
    if let Some(ts) = &plan.deadline {
        parts.push(format!("DEADLINE: {}", format_timestamp(ts)));
    }
    if let Some(ts) = &plan.closed {
        parts.push(format!("CLOSED: {}", format_timestamp(ts)));
    }
    let mut line = parts.join(" ");
    line.push('\n');
    line
}

fn render_properties(props: &Properties) -> String {
    let mut buf = String::new();
    buf.push_str(":PROPERTIES:\n");
    for (k, v) in props.iter() {
        buf.push(':');
        buf.push_str(k);
        buf.push(':');
        if !v.is_empty() {
            buf.push(' ');
            buf.push_str(v);
        }
        buf.push('\n');
    }
    buf.push_str(":END:\n");
    buf
}

fn render_clock(clock: &Clock) -> String {
    let mut buf = String::from("CLOCK: ");
    buf.push_str(&format_timestamp(&clock.start));
    if let Some(end) = &clock.end {
        buf.push_str("--");
        buf.push_str(&format_timestamp(end));
    }
    if let Some(mins) = clock.minutes {
        buf.push_str(&format!(" => {}:{:02}", mins / 60, mins % 60));
    }
    buf.push('\n');
    buf
}

/* ------------------------------ Timestamps ------------------------------ */

fn render_timestamp(ts: &Timestamp) -> String {
    let (open, close) = if ts.active { ('<', '>') } else { ('[', ']') };
    let mut buf = String::new();
    buf.push(open);
    buf.push_str(&ts.date.format("%Y-%m-%d").to_string());
    buf.push(' ');
    buf.push_str(day_name(ts.date));
    if let Some(time) = ts.time {
        buf.push(' ');
        buf.push_str(&time.format("%H:%M").to_string());
        if let Some(TimestampEnd {
            date: None,
            time: Some(end),
        }) = &ts.end
        {
            buf.push('-');
            buf.push_str(&end.format("%H:%M").to_string());
        }
    }
    if let Some(Repeater { kind, interval }) = &ts.repeater {
        buf.push(' ');
        buf.push_str(match kind {
            RepeaterKind::Cumulative => "+",
            RepeaterKind::CatchUp => "++",
            RepeaterKind::Restart => ".+",
        });
        buf.push_str(&render_interval(interval));
    }
    if let Some(Warning { kind, interval }) = &ts.warning {
        buf.push(' ');
        buf.push_str(match kind {
            WarningKind::All => "-",
            WarningKind::First => "--",
        });
        buf.push_str(&render_interval(interval));
    }
    buf.push(close);

    if let Some(TimestampEnd {
        date: Some(date),
        time,
    }) = &ts.end
    {
        buf.push_str("--");
        buf.push(open);
        buf.push_str(&date.format("%Y-%m-%d").to_string());
        buf.push(' ');
        buf.push_str(day_name(*date));
        if let Some(time) = time {
            buf.push(' ');
            buf.push_str(&time.format("%H:%M").to_string());
        }
        buf.push(close);
    }
    buf
}

fn render_interval(interval: &Interval) -> String {
    format!("{}{}", interval.value, interval.unit.symbol())
}

/* ------------------------------ Inline ------------------------------ */

fn render_rich_text(inlines: &[Inline]) -> String {
    let mut buf = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(t) => buf.push_str(t),
            Inline::Emphasis { kind, children } => {
                let marker = emphasis_marker(*kind);
                buf.push(marker);
                buf.push_str(&render_rich_text(children));
                buf.push(marker);
            }
            Inline::Code(code) => {
                buf.push('~');
                buf.push_str(code);
                buf.push('~');
            }
            Inline::Verbatim(verbatim) => {
                buf.push('=');
                buf.push_str(verbatim);
                buf.push('=');
            }
            Inline::Link(link) => match link.format {
                LinkFormat::Plain => buf.push_str(&link.kind.target()),
                LinkFormat::Angle => {
                    buf.push('<');
                    buf.push_str(&link.kind.target());
                    buf.push('>');
                }
                LinkFormat::Bracket => {
                    buf.push_str("[[");
                    buf.push_str(&link.kind.target());
                    if let Some(desc) = &link.description {
                        buf.push_str("][");
                        buf.push_str(&render_rich_text(desc));
                    }
                    buf.push_str("]]");
                }
            },
            Inline::Timestamp(ts) => buf.push_str(&format_timestamp(ts)),
            Inline::Entity { name, braces } => {
                buf.push('\\');
                buf.push_str(name);
                if *braces {
                    buf.push_str("{}");
                }
            }
            Inline::LineBreak => buf.push_str("\\\\"),
            Inline::FootnoteRef { label, definition } => {
                buf.push_str("[fn:");
                if let Some(label) = label {
                    buf.push_str(label);
                }
                if let Some(def) = definition {
                    buf.push(':');
                    buf.push_str(&render_rich_text(def));
                }
                buf.push(']');
            }
            Inline::Macro { name, arguments } => {
                buf.push_str("{{{");
                buf.push_str(name);
                if let Some(args) = arguments {
                    buf.push('(');
                    buf.push_str(args);
                    buf.push(')');
                }
                buf.push_str("}}}");
            }
            Inline::StatisticsCookie(cookie) => {
                buf.push('[');
                buf.push_str(cookie);
                buf.push(']');
            }
            Inline::Subscript(children) => {
                buf.push_str("_{");
                buf.push_str(&render_rich_text(children));
                buf.push('}');
            }
            Inline::Superscript(children) => {
                buf.push_str("^{");
                buf.push_str(&render_rich_text(children));
                buf.push('}');
            }
            Inline::ExportSnippet { backend, value } => {
                buf.push_str(&format!("@@{}:{}@@", backend, value));
            }
            Inline::InlineSrc {
                language,
                parameters,
                body,
            } => {
                buf.push_str("src_");
                buf.push_str(language);
                if let Some(p) = parameters {
                    buf.push('[');
                    buf.push_str(p);
                    buf.push(']');
                }
                buf.push('{');
                buf.push_str(body);
                buf.push('}');
            }
            Inline::InlineCall {
                name,
                inside_header,
                arguments,
                end_header,
            } => {
                buf.push_str("call_");
                buf.push_str(name);
                if let Some(h) = inside_header {
                    buf.push('[');
                    buf.push_str(h);
                    buf.push(']');
                }
                buf.push('(');
                buf.push_str(arguments);
                buf.push(')');
                if let Some(h) = end_header {
                    buf.push('[');
                    buf.push_str(h);
                    buf.push(']');
                }
            }
            Inline::Target(target) => {
                buf.push_str("<<");
                buf.push_str(target);
                buf.push_str(">>");
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;
    use chrono::{NaiveDate, NaiveTime};
    use pretty_assertions::assert_eq;

    #[test]
    fn formatter_round_trips_canonical_text() {
        let input = r#"#+title: Demo
#+FILETAGS: :foo:

* TODO [#A] Task :tag:
SCHEDULED: <2025-11-15 Sat>
:PROPERTIES:
:ID: 42
:END:
Paragraph line one
Paragraph line two

** DONE Child
CLOSED: [2025-11-14 Fri 09:30]
- [X] one
  continued
- two
  1. nested

#+BEGIN_SRC rust :results output
,* not a heading
#+END_SRC
"#;
        let doc = parse_document(input);
        assert_eq!(format_document(&doc), input);
    }

    #[test]
    fn single_todo_heading() {
        let doc = parse_document("* TODO Buy milk\n");
        assert_eq!(format_document(&doc), "* TODO Buy milk\n");
    }

    #[test]
    fn tables_are_aligned() {
        let doc = parse_document("|a|bbb|\n|-\n|cc|d|\n");
        assert_eq!(
            format_document(&doc),
            "| a  | bbb |\n|----+-----|\n| cc | d   |\n"
        );
    }

    #[test]
    fn list_continuations_are_reindented() {
        let doc = parse_document("- first\n      more\n-   second\n");
        assert_eq!(format_document(&doc), "- first\n  more\n- second\n");
    }

    #[test]
    fn timestamps_render_canonically_without_raw() {
        let mut ts = Timestamp::new(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap());
        ts.time = NaiveTime::from_hms_opt(9, 5, 0);
        ts.end = Some(TimestampEnd {
            date: None,
            time: NaiveTime::from_hms_opt(10, 0, 0),
        });
        ts.repeater = Some(Repeater {
            kind: RepeaterKind::CatchUp,
            interval: Interval {
                value: 1,
                unit: TimeUnit::Week,
            },
        });
        assert_eq!(format_timestamp(&ts), "<2024-01-20 Sat 09:05-10:00 ++1w>");

        let mut range = Timestamp::new(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()).inactive();
        range.end = Some(TimestampEnd {
            date: NaiveDate::from_ymd_opt(2024, 1, 22),
            time: None,
        });
        assert_eq!(format_timestamp(&range), "[2024-01-20 Sat]--[2024-01-22 Mon]");
    }

    #[test]
    fn empty_headline_keeps_its_space() {
        let doc = parse_document("* \n** TODO\n");
        assert_eq!(format_document(&doc), "* \n** TODO\n");
    }

    #[test]
    fn inline_objects_survive() {
        let text = "See [[https://x.org][site]], <mailto:a@b.c>, \\alpha{}, [fn::note], {{{m(1)}}}, H_{2}O, @@html:<br>@@ and src_sh{ls}.\n";
        let doc = parse_document(text);
        assert_eq!(format_document(&doc), text);
    }

    #[test]
    fn edited_tree_renders_inserted_paragraph() {
        let mut doc = parse_document("* TODO Task\nParagraph\n");
        let section = doc.headings[0].section.as_mut().unwrap();
        section.elements.insert(
            0,
            ElementNode::new(Element::Paragraph(RichText::plain("Inserted note"))),
        );
        assert_eq!(format_document(&doc), "* TODO Task\nInserted note\nParagraph\n");
    }
}
