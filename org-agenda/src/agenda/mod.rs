//! Agenda read model: items projected from parsed documents and diary sexps,
//! filtered, sorted and grouped into a view over a window of days.
//!
//! [`generate`] is the entry point. Projection lives in [`projector`], the
//! filter/sort/group passes in [`view`].

pub mod projector;
pub mod view;

use crate::core::*;
use crate::diary;
use chrono::{Local, NaiveDate, NaiveTime, TimeDelta};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name used when a document is missing from the [`FileIndex`].
pub const UNKNOWN_FILE: &str = "unknown";

/// Where each document came from.
pub type FileIndex = IndexMap<DocumentId, PathBuf>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendaType {
    Scheduled,
    Deadline,
    Closed,
    /// An active timestamp in a headline or body.
    Timestamp,
    /// A diary sexp match.
    Diary,
}

/// Back-reference to the heading an item was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub document: DocumentId,
    pub heading: HeadingId,
}

/// One dated entry of the agenda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    pub id: uuid::Uuid,
    pub title: String,
    pub todo: Option<TodoKeyword>,
    pub priority: Option<Priority>,
    pub tags: Vec<Tag>,
    pub file: PathBuf,
    pub line: usize,
    pub agenda_type: AgendaType,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    /// Days from the window start to `date`; for diary anniversaries, the
    /// number of years since the origin date.
    pub days_until: Option<i64>,
    pub overdue: bool,
    pub category: String,
    pub habit: bool,
    /// Ancestor titles, outermost first.
    pub context_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<NodeRef>,
    /// The source heading, or a placeholder built from a diary entry.
    #[serde(skip)]
    pub heading: Option<Heading>,
}

impl AgendaItem {
    pub fn is_done(&self) -> bool {
        self.todo.as_ref().is_some_and(|t| t.is_done)
    }

    pub fn first_tag(&self) -> Option<&Tag> {
        self.tags.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaGroup {
    pub label: String,
    /// Set when grouping by date.
    pub date: Option<NaiveDate>,
    pub items: Vec<AgendaItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaView {
    pub start: NaiveDate,
    /// Inclusive.
    pub end: NaiveDate,
    pub groups: Vec<AgendaGroup>,
    pub total_items: usize,
    pub total_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Time,
    Priority,
    Category,
    Todo,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Date,
    Category,
    Todo,
    Priority,
    Tag,
}

/// Agenda query options. Deserializes from camelCase JSON; absent fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgendaConfig {
    pub start_date: NaiveDate,
    /// Window length in days; values below 1 are treated as 1.
    pub days: u32,
    pub todo_states: Option<Vec<String>>,
    pub include_tags: Option<Vec<String>>,
    pub exclude_tags: Option<Vec<String>>,
    pub priorities: Option<Vec<Priority>>,
    pub categories: Option<Vec<String>>,
    pub files: Option<Vec<PathBuf>>,
    pub show_done: bool,
    pub show_habits: bool,
    pub sort_by: SortBy,
    pub group_by: GroupBy,
}

impl Default for AgendaConfig {
    fn default() -> Self {
        Self {
            start_date: Local::now().date_naive(),
            days: 7,
            todo_states: None,
            include_tags: None,
            exclude_tags: None,
            priorities: None,
            categories: None,
            files: None,
            show_done: false,
            show_habits: true,
            sort_by: SortBy::default(),
            group_by: GroupBy::default(),
        }
    }
}

impl AgendaConfig {
    pub fn starting(start_date: NaiveDate, days: u32) -> Self {
        Self {
            start_date,
            days,
            ..Self::default()
        }
    }

    /// Inclusive `(start, end)` of the window, at most
    /// [`MAX_RANGE_DAYS`](crate::diary::MAX_RANGE_DAYS) long.
    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        let mut days = i64::from(self.days.max(1));
        if days > diary::MAX_RANGE_DAYS {
            tracing::warn!(days, max = diary::MAX_RANGE_DAYS, "clamping agenda window");
            days = diary::MAX_RANGE_DAYS;
        }
        let span = days - 1;
        let end = self
            .start_date
            .checked_add_signed(TimeDelta::days(span))
            .unwrap_or(NaiveDate::MAX);
        (self.start_date, end)
    }
}

/// A recurrence expression to be shown in the agenda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiarySexpEntry {
    pub expression: String,
    pub title: String,
    pub file: PathBuf,
    pub line: usize,
    pub category: Option<String>,
}

/// Build the agenda view for `config` from parsed documents and diary entries.
pub fn generate(
    documents: &[Document],
    file_index: &FileIndex,
    config: &AgendaConfig,
    diary_entries: &[DiarySexpEntry],
) -> AgendaView {
    let (start, end) = config.window();

    let mut items = Vec::new();
    for doc in documents {
        let file = match file_index.get(&doc.id) {
            Some(path) => path.as_path(),
            None => {
                tracing::debug!(document = %doc.id.0, "document missing from file index");
                Path::new(UNKNOWN_FILE)
            }
        };
        items.extend(projector::project_document(doc, file, start, end, config.show_done));
    }
    for entry in diary_entries {
        items.extend(projector::project_diary(entry, start, end));
    }

    let projected = items.len();
    let mut items = view::filter(items, config);
    tracing::debug!(projected, kept = items.len(), "agenda items filtered");

    view::sort(&mut items, config.sort_by);

    let total_items = items.len();
    let total_files = items
        .iter()
        .map(|i| i.file.as_path())
        .collect::<std::collections::HashSet<_>>()
        .len();
    let groups = view::group(items, config.group_by, start, end);

    AgendaView {
        start,
        end,
        groups,
        total_items,
        total_files,
    }
}

/// Diary sexp lines of `doc` (`%%(...) title`), with the category each inherits.
pub fn diary_entries_from_document(doc: &Document, file: &Path) -> Vec<DiarySexpEntry> {
    let mut out = Vec::new();
    let file_category = projector::file_category(doc, file);
    let mut sections: Vec<(Option<&Heading>, &Section)> = vec![(None, &doc.preamble)];
    sections.extend(
        doc.headings
            .iter()
            .filter_map(|h| h.section.as_ref().map(|s| (Some(h), s))),
    );
    for (heading, section) in sections {
        let category = heading
            .and_then(|h| projector::heading_category(doc, h))
            .unwrap_or_else(|| file_category.clone());
        let mut stack: Vec<&ElementNode> = section.elements.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if let Element::DiarySexp { sexp, title } = &node.element {
                out.push(DiarySexpEntry {
                    expression: sexp.clone(),
                    title: title.clone(),
                    file: file.to_path_buf(),
                    line: node_line(heading, node),
                    category: Some(category.clone()),
                });
            }
            stack.extend(node.element.children().iter().rev());
        }
    }
    out
}

fn node_line(heading: Option<&Heading>, node: &ElementNode) -> usize {
    match node.line {
        0 => heading.map_or(0, |h| h.line),
        line => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_document;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn config_defaults_from_partial_json() {
        let cfg: AgendaConfig =
            serde_json::from_str(r#"{"startDate":"2024-03-01","groupBy":"priority","priorities":["A"]}"#)
                .unwrap();
        assert_eq!(cfg.start_date, d(2024, 3, 1));
        assert_eq!(cfg.days, 7);
        assert!(cfg.show_habits);
        assert!(!cfg.show_done);
        assert_eq!(cfg.group_by, GroupBy::Priority);
        assert_eq!(cfg.sort_by, SortBy::Time);
        assert_eq!(cfg.priorities, Some(vec![Priority('A')]));
    }

    #[test]
    fn window_is_inclusive() {
        assert_eq!(
            AgendaConfig::starting(d(2024, 1, 1), 7).window(),
            (d(2024, 1, 1), d(2024, 1, 7))
        );
        assert_eq!(
            AgendaConfig::starting(d(2024, 1, 1), 0).window(),
            (d(2024, 1, 1), d(2024, 1, 1))
        );
    }

    #[test]
    fn huge_window_is_clamped() {
        let config = AgendaConfig::starting(d(2024, 1, 1), 4_000_000_000);
        let (start, end) = config.window();
        assert_eq!((end - start).num_days() + 1, crate::diary::MAX_RANGE_DAYS);
        let view = generate(&[], &FileIndex::new(), &config, &[]);
        assert_eq!(view.groups.len() as i64, crate::diary::MAX_RANGE_DAYS);
        assert_eq!(view.end, end);
    }

    #[test]
    fn unknown_file_sentinel() {
        let doc = parse_document("* TODO Call\nSCHEDULED: <2024-01-02>\n");
        let view = generate(
            &[doc],
            &FileIndex::new(),
            &AgendaConfig::starting(d(2024, 1, 1), 3),
            &[],
        );
        assert_eq!(view.total_items, 1);
        let item = &view.groups[1].items[0];
        assert_eq!(item.file, PathBuf::from(UNKNOWN_FILE));
        assert_eq!(item.category, UNKNOWN_FILE);
    }

    #[test]
    fn diary_lines_become_entries() {
        let text = "#+CATEGORY: home\n%%(diary-anniversary 1 15 1990) Birthday\n* Work\n:PROPERTIES:\n:CATEGORY: job\n:END:\n%%(diary-float t 1 1) Standup review\n";
        let doc = parse_document(text);
        let entries = diary_entries_from_document(&doc, Path::new("/notes/a.org"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].expression, "(diary-anniversary 1 15 1990)");
        assert_eq!(entries[0].title, "Birthday");
        assert_eq!(entries[0].line, 2);
        assert_eq!(entries[0].category.as_deref(), Some("home"));
        assert_eq!(entries[1].category.as_deref(), Some("job"));
        assert_eq!(entries[1].line, 7);
    }

    #[test]
    fn totals_count_items_and_files() {
        let a = parse_document("* TODO A\nSCHEDULED: <2024-01-01>\n* TODO B\nSCHEDULED: <2024-01-02>\n");
        let b = parse_document("* Meeting <2024-01-03 Wed 10:00>\n");
        let mut index = FileIndex::new();
        index.insert(a.id, PathBuf::from("/n/a.org"));
        index.insert(b.id, PathBuf::from("/n/b.org"));
        let view = generate(&[a, b], &index, &AgendaConfig::starting(d(2024, 1, 1), 7), &[]);
        assert_eq!(view.total_items, 3);
        assert_eq!(view.total_files, 2);
        assert_eq!(view.groups.len(), 7);
    }
}
