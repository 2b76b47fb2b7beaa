//! Projection of headings and diary entries into [`AgendaItem`]s.

use super::{AgendaItem, AgendaType, DiarySexpEntry, NodeRef, UNKNOWN_FILE};
use crate::core::*;
use crate::diary;
use chrono::{NaiveDate, NaiveTime};
use std::path::Path;

/// Shared per-heading data copied into every item it yields.
struct Context {
    title: String,
    tags: Vec<Tag>,
    category: String,
    path: Vec<String>,
    habit: bool,
}

/// Items for every heading of `doc` with a date inside `[start, end]`.
///
/// The latest deadline occurrence before `start` is kept as overdue; done
/// headings are left for the filter to drop. CLOSED entries are only projected
/// when `show_done` is set. Active timestamps are projected regardless.
pub fn project_document(
    doc: &Document,
    file: &Path,
    start: NaiveDate,
    end: NaiveDate,
    show_done: bool,
) -> Vec<AgendaItem> {
    let mut out = Vec::new();
    let file_tags = doc.file_tags();
    let file_category = file_category(doc, file);

    for h in &doc.headings {
        let ctx = Context {
            title: h.title.plain_text(),
            tags: inherited_tags(doc, h, &file_tags),
            category: heading_category(doc, h).unwrap_or_else(|| file_category.clone()),
            path: context_path(doc, h),
            habit: is_habit(h),
        };
        let make = |kind: AgendaType, ts: &Timestamp, date: NaiveDate, overdue: bool| {
            make_item(doc, h, file, &ctx, kind, time_on(ts, date), date, start, overdue)
        };

        if let Some(planning) = &h.planning {
            if let Some(ts) = &planning.scheduled {
                for date in ts.occurrences(start, end) {
                    out.push(make(AgendaType::Scheduled, ts, date, false));
                }
            }
            if let Some(ts) = &planning.deadline {
                if let Some(missed) = ts.latest_occurrence(start).filter(|day| *day < start) {
                    out.push(make(AgendaType::Deadline, ts, missed, true));
                }
                for date in ts.occurrences(start, end) {
                    out.push(make(AgendaType::Deadline, ts, date, false));
                }
            }
            if show_done {
                if let Some(ts) = &planning.closed {
                    if (start..=end).contains(&ts.date) {
                        out.push(make(AgendaType::Closed, ts, ts.date, false));
                    }
                }
            }
        }

        for ts in heading_timestamps(h) {
            for date in timestamp_days(ts, start, end) {
                out.push(make(AgendaType::Timestamp, ts, date, false));
            }
        }
    }
    tracing::trace!(file = %file.display(), items = out.len(), "projected document");
    out
}

/// One item per date in `[start, end]` on which `entry` matches.
pub fn project_diary(entry: &DiarySexpEntry, start: NaiveDate, end: NaiveDate) -> Vec<AgendaItem> {
    let category = entry
        .category
        .clone()
        .unwrap_or_else(|| file_stem(&entry.file));
    diary::dates_in_range(&entry.expression, start, end)
        .into_iter()
        .map(|hit| {
            let mut placeholder = Heading::new(1, entry.title.clone());
            placeholder.line = entry.line;
            AgendaItem {
                id: uuid::Uuid::new_v4(),
                title: entry.title.clone(),
                todo: None,
                priority: None,
                tags: vec![],
                file: entry.file.clone(),
                line: entry.line,
                agenda_type: AgendaType::Diary,
                date: hit.date,
                time: None,
                days_until: hit.result.years,
                overdue: false,
                category: category.clone(),
                habit: false,
                context_path: vec![],
                description: hit.result.description,
                source: None,
                heading: Some(placeholder),
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn make_item(
    doc: &Document,
    h: &Heading,
    file: &Path,
    ctx: &Context,
    kind: AgendaType,
    time: Option<NaiveTime>,
    date: NaiveDate,
    start: NaiveDate,
    overdue: bool,
) -> AgendaItem {
    AgendaItem {
        id: uuid::Uuid::new_v4(),
        title: ctx.title.clone(),
        todo: h.keyword.clone(),
        priority: h.priority,
        tags: ctx.tags.clone(),
        file: file.to_path_buf(),
        line: h.line,
        agenda_type: kind,
        date,
        time,
        days_until: Some((date - start).num_days()),
        overdue,
        category: ctx.category.clone(),
        habit: ctx.habit,
        context_path: ctx.path.clone(),
        description: None,
        source: Some(NodeRef {
            document: doc.id,
            heading: h.id,
        }),
        heading: Some(h.clone()),
    }
}

/// Start time of `ts` on `date`; later days of a multi-day range have none.
fn time_on(ts: &Timestamp, date: NaiveDate) -> Option<NaiveTime> {
    if ts.end_date() != ts.date && date != ts.date {
        None
    } else {
        ts.time
    }
}

/// Active timestamps in the headline and anywhere in the section body.
fn heading_timestamps(h: &Heading) -> Vec<&Timestamp> {
    let mut out: Vec<&Timestamp> = h.title.timestamps();
    if let Some(section) = &h.section {
        let mut stack: Vec<&ElementNode> = section.elements.iter().rev().collect();
        while let Some(node) = stack.pop() {
            match &node.element {
                Element::Paragraph(text) | Element::VerseBlock { text, .. } => {
                    out.extend(text.timestamps());
                }
                Element::Table(table) => {
                    for row in &table.rows {
                        if let TableRow::Cells(cells) = row {
                            out.extend(cells.iter().flat_map(RichText::timestamps));
                        }
                    }
                }
                Element::List(list) => {
                    for item in list.items.iter().rev() {
                        stack.extend(item.contents.iter().rev());
                    }
                    for item in &list.items {
                        if let Some(tag) = &item.tag {
                            out.extend(tag.timestamps());
                        }
                    }
                }
                other => stack.extend(other.children().iter().rev()),
            }
        }
    }
    out.retain(|ts| ts.active);
    out
}

/// Days of `[start, end]` covered by `ts`: each repeat of a point timestamp, or
/// every day of a date range.
fn timestamp_days(ts: &Timestamp, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let last = ts.end_date();
    if last > ts.date {
        let from = ts.date.max(start);
        let to = last.min(end);
        if from > to {
            return vec![];
        }
        return from.iter_days().take_while(|d| *d <= to).collect();
    }
    ts.occurrences(start, end)
}

/// `#+FILETAGS`, then ancestor tags outermost first, then the heading's own.
pub(crate) fn inherited_tags(doc: &Document, h: &Heading, file_tags: &[Tag]) -> Vec<Tag> {
    let mut ancestors: Vec<&Heading> = doc.ancestors(h.id).collect();
    ancestors.reverse();
    let mut out: Vec<Tag> = Vec::new();
    let sources = file_tags
        .iter()
        .chain(ancestors.iter().flat_map(|a| a.tags.iter()))
        .chain(h.tags.iter());
    for tag in sources {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out
}

/// Nearest `CATEGORY` property on the heading or its ancestors.
pub(crate) fn heading_category(doc: &Document, h: &Heading) -> Option<String> {
    std::iter::once(h)
        .chain(doc.ancestors(h.id))
        .find_map(|x| x.properties.get("CATEGORY"))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// `#+CATEGORY` or file-level property, else the file name without extension.
pub(crate) fn file_category(doc: &Document, file: &Path) -> String {
    doc.category()
        .map(|c| c.trim().to_string())
        .unwrap_or_else(|| file_stem(file))
}

fn file_stem(file: &Path) -> String {
    file.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_FILE)
        .to_string()
}

fn context_path(doc: &Document, h: &Heading) -> Vec<String> {
    let mut path: Vec<String> = doc.ancestors(h.id).map(|a| a.title.plain_text()).collect();
    path.reverse();
    path
}

fn is_habit(h: &Heading) -> bool {
    h.has_tag("habit")
        || h
            .properties
            .get("STYLE")
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("habit"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn project(text: &str, start: NaiveDate, days: i64, show_done: bool) -> Vec<AgendaItem> {
        let doc = parse_document(text);
        let end = start + chrono::TimeDelta::days(days - 1);
        project_document(&doc, Path::new("/notes/work.org"), start, end, show_done)
    }

    #[test]
    fn scheduled_and_deadline_in_window() {
        let items = project(
            "* TODO Write report\nSCHEDULED: <2024-01-03 Wed 09:30> DEADLINE: <2024-01-05 Fri>\n",
            d(2024, 1, 1),
            7,
            false,
        );
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].agenda_type, AgendaType::Scheduled);
        assert_eq!(items[0].time, NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(items[0].days_until, Some(2));
        assert_eq!(items[1].agenda_type, AgendaType::Deadline);
        assert_eq!(items[1].days_until, Some(4));
        assert!(!items[1].overdue);
        assert_eq!(items[0].category, "work");
    }

    #[test]
    fn overdue_deadline_projected_even_when_done() {
        let items = project("* TODO Taxes\nDEADLINE: <2023-12-22>\n", d(2024, 1, 1), 7, false);
        assert_eq!(items.len(), 1);
        assert!(items[0].overdue);
        assert_eq!(items[0].days_until, Some(-10));
        assert_eq!(items[0].date, d(2023, 12, 22));

        let done = project("* DONE Taxes\nDEADLINE: <2023-12-22>\n", d(2024, 1, 1), 7, false);
        assert_eq!(done.len(), 1);
        assert!(done[0].overdue && done[0].is_done());
    }

    #[test]
    fn repeating_deadline_before_window() {
        let items = project(
            "* TODO Timesheet\nDEADLINE: <2024-01-01 Mon +1w>\n",
            d(2024, 3, 1),
            7,
            false,
        );
        let seen: Vec<_> = items.iter().map(|i| (i.date, i.overdue, i.days_until)).collect();
        assert_eq!(
            seen,
            vec![
                (d(2024, 2, 26), true, Some(-4)),
                (d(2024, 3, 4), false, Some(3)),
            ]
        );
    }

    #[test]
    fn deadline_on_window_start_is_not_overdue() {
        let items = project("* TODO Pay\nDEADLINE: <2024-01-01 +1m>\n", d(2024, 3, 1), 3, false);
        assert_eq!(items.len(), 1);
        assert!(!items[0].overdue);
        assert_eq!(items[0].date, d(2024, 3, 1));
    }

    #[test]
    fn scheduled_outside_window_is_dropped() {
        let items = project("* TODO Old\nSCHEDULED: <2023-12-01>\n", d(2024, 1, 1), 7, false);
        assert!(items.is_empty());
    }

    #[test]
    fn repeaters_expand() {
        let items = project(
            "* TODO Water plants\nSCHEDULED: <2024-01-01 Mon +2d>\n",
            d(2024, 1, 4),
            5,
            false,
        );
        let dates: Vec<_> = items.iter().map(|i| i.date).collect();
        assert_eq!(dates, vec![d(2024, 1, 5), d(2024, 1, 7)]);
    }

    #[test]
    fn closed_needs_show_done() {
        let text = "* DONE Ship\nCLOSED: [2024-01-02 Tue 17:00]\n";
        assert!(project(text, d(2024, 1, 1), 7, false).is_empty());
        let items = project(text, d(2024, 1, 1), 7, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].agenda_type, AgendaType::Closed);
    }

    #[test]
    fn body_and_title_timestamps() {
        let text = "* Conference <2024-01-02 Tue>--<2024-01-04 Thu>\n* Notes\nCall Bob at <2024-01-06 Sat 15:00>.\nInactive [2024-01-03 Wed] is ignored.\n";
        let items = project(text, d(2024, 1, 1), 7, false);
        let days: Vec<_> = items.iter().map(|i| (i.title.as_str(), i.date)).collect();
        assert_eq!(days.len(), 4);
        assert_eq!(days[0].1, d(2024, 1, 2));
        assert_eq!(days[2].1, d(2024, 1, 4));
        assert_eq!(days[3], ("Notes", d(2024, 1, 6)));
        assert_eq!(items[3].time, NaiveTime::from_hms_opt(15, 0, 0));
        assert!(items.iter().all(|i| i.agenda_type == AgendaType::Timestamp));

        // Plain timestamps do not depend on show_done, unlike CLOSED.
        assert_eq!(project(text, d(2024, 1, 1), 7, true).len(), 4);
    }

    #[test]
    fn tags_and_category_inherit() {
        let text = "#+FILETAGS: :work:\n* Project :alpha:\n:PROPERTIES:\n:CATEGORY: proj\n:END:\n** TODO Step :beta:alpha:\nSCHEDULED: <2024-01-02>\n";
        let items = project(text, d(2024, 1, 1), 3, false);
        assert_eq!(items.len(), 1);
        let tags: Vec<&str> = items[0].tags.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(tags, vec!["work", "alpha", "beta"]);
        assert_eq!(items[0].category, "proj");
        assert_eq!(items[0].context_path, vec!["Project".to_string()]);
    }

    #[test]
    fn habits_by_tag_or_style() {
        let text = "* TODO Run :habit:\nSCHEDULED: <2024-01-01 .+1d>\n* TODO Read\nSCHEDULED: <2024-01-01>\n:PROPERTIES:\n:STYLE: habit\n:END:\n* TODO Plain\nSCHEDULED: <2024-01-01>\n";
        let items = project(text, d(2024, 1, 1), 1, false);
        let habits: Vec<bool> = items.iter().map(|i| i.habit).collect();
        assert_eq!(habits, vec![true, true, false]);
    }

    #[test]
    fn diary_items_carry_years() {
        let entry = DiarySexpEntry {
            expression: "(diary-anniversary 1 15 1990)".into(),
            title: "Birthday".into(),
            file: "/notes/people.org".into(),
            line: 3,
            category: None,
        };
        let items = project_diary(&entry, d(2024, 1, 1), d(2024, 1, 31));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].days_until, Some(34));
        assert_eq!(items[0].category, "people");
        assert_eq!(items[0].agenda_type, AgendaType::Diary);
        assert_eq!(items[0].heading.as_ref().map(|h| h.raw_title.as_str()), Some("Birthday"));
    }
}
