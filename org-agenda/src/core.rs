//! Document model shared by the parser, the formatter and the agenda engine.
//!
//! A parsed [`Document`] owns its headings in a flat arena; parent/child links are
//! [`HeadingId`] indices into that arena, so consumers can walk arbitrarily deep
//! outlines without recursion and share the tree read-only across threads.

use chrono::{Datelike, Months, NaiveDate, NaiveTime, TimeDelta};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/* ------------------------------- IDs ------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of a heading inside [`Document::headings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeadingId(pub usize);

/* ------------------------------ Aggregate ------------------------------ */

/// Aggregate root: one parsed outline document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Content before the first heading.
    #[serde(default)]
    pub preamble: Section,

    /// `#+KEY: value` lines of the preamble, keys upper-cased. Later lines win.
    #[serde(default)]
    pub keywords: IndexMap<String, String>,

    /// Top-of-file property drawer merged with `#+PROPERTY:` keywords.
    #[serde(default)]
    pub properties: Properties,

    /// TODO vocabulary that was in effect while parsing this document.
    #[serde(default)]
    pub todo_keywords: TodoKeywords,

    /// Every heading, in document (pre-order) order.
    #[serde(default)]
    pub headings: Vec<Heading>,

    /// Top-level headings.
    #[serde(default)]
    pub roots: Vec<HeadingId>,
}

impl Document {
    pub fn new(todo_keywords: TodoKeywords) -> Self {
        Self {
            id: DocumentId::new(),
            preamble: Section::default(),
            keywords: IndexMap::new(),
            properties: Properties::default(),
            todo_keywords,
            headings: vec![],
            roots: vec![],
        }
    }

    pub fn heading(&self, id: HeadingId) -> Option<&Heading> {
        self.headings.get(id.0)
    }

    pub fn roots(&self) -> impl Iterator<Item = &Heading> + '_ {
        self.roots.iter().filter_map(|id| self.heading(*id))
    }

    pub fn children<'a>(&'a self, heading: &'a Heading) -> impl Iterator<Item = &'a Heading> + 'a {
        heading.children.iter().filter_map(|id| self.heading(*id))
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: HeadingId) -> impl Iterator<Item = &Heading> + '_ {
        let mut next = self.heading(id).and_then(|h| h.parent);
        std::iter::from_fn(move || {
            let current = self.heading(next?)?;
            next = current.parent;
            Some(current)
        })
    }

    /// Pre-order walk of the subtree below `id` (excluding `id` itself).
    pub fn descendants(&self, id: HeadingId) -> Vec<&Heading> {
        let mut out = Vec::new();
        let mut stack: Vec<HeadingId> = match self.heading(id) {
            Some(h) => h.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            if let Some(h) = self.heading(next) {
                out.push(h);
                stack.extend(h.children.iter().rev().copied());
            }
        }
        out
    }

    /// Case-insensitive `#+KEY:` lookup.
    pub fn keyword(&self, key: &str) -> Option<&str> {
        self.keywords
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.keyword("TITLE")
    }

    pub fn category(&self) -> Option<&str> {
        self.keyword("CATEGORY")
            .or_else(|| self.properties.get("CATEGORY"))
            .filter(|c| !c.trim().is_empty())
    }

    /// Tags from `#+FILETAGS:`, in declaration order.
    pub fn file_tags(&self) -> Vec<Tag> {
        self.keyword("FILETAGS")
            .map(|v| {
                v.split(|c: char| c == ':' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(Tag::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/* ------------------------------ Entities ------------------------------ */

/// A heading node: headline metadata plus its own section. Children are arena ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub id: HeadingId,
    pub parent: Option<HeadingId>,
    pub level: usize,

    /// Optional TODO keyword (e.g., TODO, NEXT, DONE).
    pub keyword: Option<TodoKeyword>,

    /// Optional single-letter priority like [#A].
    pub priority: Option<Priority>,

    /// Title text as written, without keyword, priority and tags.
    pub raw_title: String,
    pub title: RichText,

    /// Tags after the headline (`:tag1:tag2:`), in source order.
    #[serde(default)]
    pub tags: Vec<Tag>,

    /// 1-based line of the headline.
    pub line: usize,

    #[serde(default)]
    pub properties: Properties,

    pub planning: Option<Planning>,

    pub section: Option<Section>,

    #[serde(default)]
    pub children: Vec<HeadingId>,

    /// Byte range of the headline itself.
    pub range: SourceRange,
}

impl Heading {
    pub fn new(level: usize, raw_title: impl Into<String>) -> Self {
        let raw_title = raw_title.into();
        let title = RichText::plain(&raw_title);
        Self {
            id: HeadingId(0),
            parent: None,
            level,
            keyword: None,
            priority: None,
            raw_title,
            title,
            tags: vec![],
            line: 0,
            properties: Properties::default(),
            planning: None,
            section: None,
            children: vec![],
            range: SourceRange::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.keyword.as_ref().is_some_and(|k| k.is_done)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.0 == name)
    }
}

/* ----------------------------- TODO keywords ----------------------------- */

/// TODO keyword with a "done" flag so file-specific vocabularies are respected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TodoKeyword {
    pub text: String,
    pub is_done: bool,
}

/// The keyword vocabulary for one parse: in-progress states and done states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoKeywords {
    pub active: Vec<String>,
    pub done: Vec<String>,
}

impl Default for TodoKeywords {
    fn default() -> Self {
        Self {
            active: vec!["TODO".into(), "NEXT".into(), "WAITING".into()],
            done: vec!["DONE".into(), "CANCELLED".into()],
        }
    }
}

impl TodoKeywords {
    pub fn new<A, D>(active: A, done: D) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            active: active.into_iter().map(Into::into).collect(),
            done: done.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the value of a `#+TODO:` line.
    ///
    /// `TODO NEXT | DONE` splits on the bar. Without a bar the last keyword is the
    /// done state. Fast-access suffixes such as `WAIT(w@/!)` are dropped.
    pub fn from_declaration(value: &str) -> Self {
        let words: Vec<&str> = value.split_whitespace().collect();
        let strip = |w: &&str| -> String {
            match w.find('(') {
                Some(pos) if w.ends_with(')') => w[..pos].to_string(),
                _ => w.to_string(),
            }
        };
        match words.iter().position(|w| *w == "|") {
            Some(bar) => Self {
                active: words[..bar].iter().map(strip).filter(|s| !s.is_empty()).collect(),
                done: words[bar + 1..]
                    .iter()
                    .map(strip)
                    .filter(|s| !s.is_empty() && s != "|")
                    .collect(),
            },
            None => match words.split_last() {
                Some((last, rest)) => Self {
                    active: rest.iter().map(strip).collect(),
                    done: vec![strip(last)],
                },
                None => Self {
                    active: vec![],
                    done: vec![],
                },
            },
        }
    }

    /// Add keywords not yet known; existing entries keep their done flag.
    pub fn merge(&mut self, other: &TodoKeywords) {
        for kw in &other.active {
            if !self.contains(kw) {
                self.active.push(kw.clone());
            }
        }
        for kw in &other.done {
            if !self.contains(kw) {
                self.done.push(kw.clone());
            }
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.active.iter().chain(self.done.iter()).any(|k| k == word)
    }

    pub fn classify(&self, word: &str) -> Option<TodoKeyword> {
        if self.active.iter().any(|k| k == word) {
            Some(TodoKeyword {
                text: word.to_string(),
                is_done: false,
            })
        } else if self.done.iter().any(|k| k == word) {
            Some(TodoKeyword {
                text: word.to_string(),
                is_done: true,
            })
        } else {
            None
        }
    }
}

/* ---------------------------- Value Objects ---------------------------- */

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub String);

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Single-letter priority, e.g. [#A].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub char);

/// Key/value pairs of a property drawer, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(pub IndexMap<String, String>);

impl Properties {
    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Planning line(s): SCHEDULED, DEADLINE, CLOSED.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Planning {
    pub scheduled: Option<Timestamp>,
    pub deadline: Option<Timestamp>,
    pub closed: Option<Timestamp>,
}

impl Planning {
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_none() && self.deadline.is_none() && self.closed.is_none()
    }

    /// Fields set in `other` replace ours.
    pub fn merge(&mut self, other: Planning) {
        if other.scheduled.is_some() {
            self.scheduled = other.scheduled;
        }
        if other.deadline.is_some() {
            self.deadline = other.deadline;
        }
        if other.closed.is_some() {
            self.closed = other.closed;
        }
    }
}

/* ------------------------------ Timestamps ------------------------------ */

/// A timestamp with optional time, range end, repeater and warning period.
///
/// Active `<...>` and inactive `[...]` timestamps differ only in their delimiters.
/// `raw` keeps the source spelling so the formatter can reproduce it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub active: bool,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub end: Option<TimestampEnd>,
    pub repeater: Option<Repeater>,
    pub warning: Option<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampEnd {
    /// `None` for a same-day time range like `10:00-11:30`.
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repeater {
    pub kind: RepeaterKind,
    pub interval: Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeaterKind {
    Cumulative, // `+`
    CatchUp,    // `++`
    Restart,    // `.+`
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub interval: Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    All,   // `-`
    First, // `--`
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub value: u32,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    pub fn symbol(self) -> char {
        match self {
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'd',
            TimeUnit::Week => 'w',
            TimeUnit::Month => 'm',
            TimeUnit::Year => 'y',
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            'h' => Some(TimeUnit::Hour),
            'd' => Some(TimeUnit::Day),
            'w' => Some(TimeUnit::Week),
            'm' => Some(TimeUnit::Month),
            'y' => Some(TimeUnit::Year),
            _ => None,
        }
    }
}

impl Interval {
    /// Step `date` forward by this interval. Hour intervals have no calendar step.
    pub fn advance(&self, date: NaiveDate) -> Option<NaiveDate> {
        if self.value == 0 {
            return None;
        }
        match self.unit {
            TimeUnit::Hour => None,
            TimeUnit::Day => date.checked_add_signed(TimeDelta::days(i64::from(self.value))),
            TimeUnit::Week => date.checked_add_signed(TimeDelta::weeks(i64::from(self.value))),
            TimeUnit::Month => date.checked_add_months(Months::new(self.value)),
            TimeUnit::Year => date.checked_add_months(Months::new(self.value.saturating_mul(12))),
        }
    }

    /// `base` stepped forward `k` times, computed from `base` so month-end
    /// clamping does not carry over from one step to the next.
    pub fn nth(&self, base: NaiveDate, k: u32) -> Option<NaiveDate> {
        if self.value == 0 {
            return None;
        }
        let steps = i64::from(self.value).checked_mul(i64::from(k))?;
        match self.unit {
            TimeUnit::Hour => None,
            TimeUnit::Day => base.checked_add_signed(TimeDelta::try_days(steps)?),
            TimeUnit::Week => base.checked_add_signed(TimeDelta::try_weeks(steps)?),
            TimeUnit::Month => base.checked_add_months(Months::new(self.value.checked_mul(k)?)),
            TimeUnit::Year => {
                base.checked_add_months(Months::new(self.value.checked_mul(k)?.checked_mul(12)?))
            }
        }
    }

    /// A step count whose occurrence is not after `target`.
    fn steps_before(&self, base: NaiveDate, target: NaiveDate) -> u32 {
        if target <= base || self.value == 0 {
            return 0;
        }
        let value = i64::from(self.value);
        let k = match self.unit {
            TimeUnit::Hour => 0,
            TimeUnit::Day => (target - base).num_days() / value,
            TimeUnit::Week => (target - base).num_days() / (7 * value),
            TimeUnit::Month | TimeUnit::Year => {
                let months = i64::from(target.year() - base.year()) * 12
                    + i64::from(target.month()) - i64::from(base.month());
                let per_step = if self.unit == TimeUnit::Year { 12 * value } else { value };
                months / per_step - 1
            }
        };
        u32::try_from(k.max(0)).unwrap_or(0)
    }
}

impl Timestamp {
    /// An active, all-day point timestamp.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            active: true,
            date,
            time: None,
            end: None,
            repeater: None,
            warning: None,
            raw: None,
        }
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, DomainError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self::new)
            .ok_or(DomainError::InvalidDate { year, month, day })
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn is_range(&self) -> bool {
        self.end.is_some()
    }

    /// Last calendar day covered by the timestamp.
    pub fn end_date(&self) -> NaiveDate {
        self.end.as_ref().and_then(|e| e.date).unwrap_or(self.date)
    }

    /// Repeat interval, when it steps by whole days or more.
    fn calendar_step(&self) -> Option<Interval> {
        self.repeater
            .map(|r| r.interval)
            .filter(|i| i.advance(self.date).is_some())
    }

    /// Dates in `[from, to]` on which this timestamp occurs, following its repeater.
    pub fn occurrences(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let Some(step) = self.calendar_step() else {
            return if (from..=to).contains(&self.date) {
                vec![self.date]
            } else {
                vec![]
            };
        };
        let mut out = Vec::new();
        let mut k = step.steps_before(self.date, from);
        while let Some(date) = step.nth(self.date, k) {
            if date > to {
                break;
            }
            if date >= from {
                out.push(date);
            }
            match k.checked_add(1) {
                Some(next) => k = next,
                None => break,
            }
        }
        out
    }

    /// Latest occurrence on or before `day`, following the repeater.
    pub fn latest_occurrence(&self, day: NaiveDate) -> Option<NaiveDate> {
        if self.date > day {
            return None;
        }
        let Some(step) = self.calendar_step() else {
            return Some(self.date);
        };
        let mut k = step.steps_before(self.date, day);
        let mut latest = step.nth(self.date, k).filter(|d| *d <= day).unwrap_or(self.date);
        while let Some(next) = k.checked_add(1).and_then(|n| step.nth(self.date, n)) {
            if next > day {
                break;
            }
            latest = next;
            k += 1;
        }
        Some(latest)
    }
}

/* ---------------------------- Content Model ---------------------------- */

/// Byte range in the parsed source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.start..self.end).unwrap_or("")
    }
}

/// Section content: blank lines before the first element, then elements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub leading_blank: usize,
    #[serde(default)]
    pub elements: Vec<ElementNode>,
}

impl Section {
    pub fn is_empty(&self) -> bool {
        self.leading_blank == 0 && self.elements.is_empty()
    }
}

/// A block-level element with its source range and the blank lines that follow it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementNode {
    pub element: Element,
    pub range: SourceRange,
    /// 1-based line of the first source line; 0 for constructed nodes.
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub post_blank: usize,
}

impl ElementNode {
    pub fn new(element: Element) -> Self {
        Self {
            element,
            range: SourceRange::default(),
            line: 0,
            post_blank: 0,
        }
    }
}

/// Block-level elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Element {
    Paragraph(RichText),
    SrcBlock(SrcBlock),
    ExampleBlock {
        parameters: Option<String>,
        raw: String,
    },
    ExportBlock {
        backend: String,
        raw: String,
    },
    CommentBlock {
        raw: String,
    },
    VerseBlock {
        parameters: Option<String>,
        text: RichText,
    },
    /// QUOTE, CENTER and any other named block whose body is parsed as elements.
    GreaterBlock(GreaterBlock),
    DynamicBlock {
        name: String,
        parameters: Option<String>,
        contents: Vec<ElementNode>,
    },
    Drawer(Drawer),
    /// A property drawer that is not attached to a heading.
    PropertyDrawer(Properties),
    Table(Table),
    List(List),
    FootnoteDefinition {
        label: String,
        contents: Vec<ElementNode>,
    },
    HorizontalRule,
    FixedWidth(Vec<String>),
    Keyword {
        key: String,
        value: String,
    },
    Comment(Vec<String>),
    InlineTask(InlineTask),
    /// `%%(sexp) title`; `sexp` keeps its parentheses.
    DiarySexp {
        sexp: String,
        title: String,
    },
    Planning(Planning),
    Clock(Clock),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcBlock {
    pub language: Option<String>,
    /// Switches such as `-n` or `-r -l "(ref:%s)"`, verbatim.
    pub switches: Option<String>,
    /// Header arguments (`:results output`), keys without the colon.
    pub parameters: IndexMap<String, String>,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreaterBlock {
    pub kind: BlockKind,
    pub parameters: Option<String>,
    pub contents: Vec<ElementNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Quote,
    Center,
    Special(String),
}

impl BlockKind {
    pub fn name(&self) -> &str {
        match self {
            BlockKind::Quote => "QUOTE",
            BlockKind::Center => "CENTER",
            BlockKind::Special(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drawer {
    pub name: String,
    pub contents: Vec<ElementNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub rows: Vec<TableRow>,
    /// `#+TBLFM:` values following the table.
    #[serde(default)]
    pub formulas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableRow {
    Rule,
    Cells(Vec<RichText>),
}

/// A list (ordered/unordered/description) with optional checkboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub kind: ListKind,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListKind {
    Unordered,
    Ordered,
    Description,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// `-`, `+`, `*`, `1.` or `1)` as written.
    pub bullet: String,
    pub counter: Option<u64>,
    pub checkbox: Option<Checkbox>,
    /// For description lists, the "term" before `::`.
    pub tag: Option<RichText>,
    pub contents: Vec<ElementNode>,
    #[serde(default)]
    pub post_blank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkbox {
    Empty,   // [ ]
    Partial, // [-]
    Checked, // [X]
}

/// A heading-like task embedded in a section (15 or more stars).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineTask {
    pub level: usize,
    pub keyword: Option<TodoKeyword>,
    pub priority: Option<Priority>,
    pub raw_title: String,
    pub title: RichText,
    pub tags: Vec<Tag>,
    pub contents: Vec<ElementNode>,
    /// Whether a closing `*** END` line was present.
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub minutes: Option<i64>,
}

/* ------------------------------ Inline objects ------------------------------ */

/// A rich-text run used for headlines, paragraphs and table cells.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RichText {
    #[serde(default)]
    pub inlines: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inline {
    Text(String),
    Emphasis {
        kind: Emphasis,
        children: Vec<Inline>,
    },
    Code(String),
    Verbatim(String),
    Link(Link),
    Timestamp(Timestamp),
    /// `\alpha` or `\alpha{}`.
    Entity {
        name: String,
        braces: bool,
    },
    /// `\\` at the end of a line.
    LineBreak,
    /// `[fn:label]`, `[fn:label:definition]` or `[fn::definition]`.
    FootnoteRef {
        label: Option<String>,
        definition: Option<Vec<Inline>>,
    },
    /// `{{{name(arguments)}}}`; `arguments` is the raw text between the parentheses.
    Macro {
        name: String,
        arguments: Option<String>,
    },
    /// `[2/5]` or `[40%]`; the text between the brackets.
    StatisticsCookie(String),
    Subscript(Vec<Inline>),
    Superscript(Vec<Inline>),
    /// `@@backend:value@@`.
    ExportSnippet {
        backend: String,
        value: String,
    },
    /// `src_lang[params]{body}`.
    InlineSrc {
        language: String,
        parameters: Option<String>,
        body: String,
    },
    /// `call_name[inside](arguments)[end]`.
    InlineCall {
        name: String,
        inside_header: Option<String>,
        arguments: String,
        end_header: Option<String>,
    },
    /// `<<target>>`.
    Target(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Emphasis {
    Bold,
    Italic,
    Underline,
    Strike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub kind: LinkKind,
    pub description: Option<Vec<Inline>>,
    pub format: LinkFormat,
}

/// How the link was written: `[[...]]`, bare, or `<...>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFormat {
    Bracket,
    Plain,
    Angle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// file:path::search
    File {
        path: String,
        search: Option<String>,
    },
    Http {
        url: String,
    },
    /// id:some-id
    Id {
        id: String,
    },
    /// #custom-id
    CustomId {
        id: String,
    },
    /// *Heading title
    Heading {
        title: String,
    },
    /// e.g., mailto:user@host
    Custom {
        protocol: String,
        target: String,
    },
    /// Anything else; resolved against targets and headings by consumers.
    Fuzzy {
        target: String,
    },
}

impl LinkKind {
    pub fn link_type(&self) -> &str {
        match self {
            LinkKind::File { .. } => "file",
            LinkKind::Http { url } => {
                if url.starts_with("https:") {
                    "https"
                } else {
                    "http"
                }
            }
            LinkKind::Id { .. } => "id",
            LinkKind::CustomId { .. } => "custom-id",
            LinkKind::Heading { .. } => "heading",
            LinkKind::Custom { protocol, .. } => protocol,
            LinkKind::Fuzzy { .. } => "fuzzy",
        }
    }

    /// The link target as written inside brackets.
    pub fn target(&self) -> String {
        match self {
            LinkKind::File { path, search } => match search {
                Some(search) => format!("file:{}::{}", path, search),
                None => format!("file:{}", path),
            },
            LinkKind::Http { url } => url.clone(),
            LinkKind::Id { id } => format!("id:{}", id),
            LinkKind::CustomId { id } => format!("#{}", id),
            LinkKind::Heading { title } => format!("*{}", title),
            LinkKind::Custom { protocol, target } => format!("{}:{}", protocol, target),
            LinkKind::Fuzzy { target } => target.clone(),
        }
    }
}

/* ---------------------------- Errors (domain) ---------------------------- */

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid calendar date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },
}

/* ----------------------- Utility: Title text extraction ----------------------- */

impl RichText {
    pub fn plain(text: &str) -> Self {
        if text.is_empty() {
            Self::default()
        } else {
            Self {
                inlines: vec![Inline::Text(text.to_string())],
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inlines.is_empty()
    }

    /// Render a plain text approximation (useful for agenda titles).
    pub fn plain_text(&self) -> String {
        fn rec(xs: &[Inline], out: &mut String) {
            for x in xs {
                match x {
                    Inline::Text(t) => out.push_str(t),
                    Inline::Emphasis { children, .. }
                    | Inline::Subscript(children)
                    | Inline::Superscript(children) => rec(children, out),
                    Inline::Code(t) | Inline::Verbatim(t) | Inline::Target(t) => out.push_str(t),
                    Inline::Link(Link {
                        description: Some(d),
                        ..
                    }) => rec(d, out),
                    Inline::Link(Link {
                        description: None,
                        kind,
                        ..
                    }) => out.push_str(&kind.target()),
                    Inline::Timestamp(ts) => {
                        out.push_str(&ts.date.format("%Y-%m-%d").to_string());
                    }
                    Inline::Entity { name, .. } => {
                        out.push('\\');
                        out.push_str(name);
                    }
                    Inline::LineBreak => out.push('\n'),
                    Inline::FootnoteRef { label, .. } => {
                        out.push_str("[fn:");
                        out.push_str(label.as_deref().unwrap_or(""));
                        out.push(']');
                    }
                    Inline::Macro { name, .. } => out.push_str(name),
                    Inline::StatisticsCookie(c) => {
                        out.push('[');
                        out.push_str(c);
                        out.push(']');
                    }
                    Inline::ExportSnippet { value, .. } => out.push_str(value),
                    Inline::InlineSrc { body, .. } => out.push_str(body),
                    Inline::InlineCall { name, .. } => out.push_str(name),
                }
            }
        }
        let mut s = String::new();
        rec(&self.inlines, &mut s);
        s
    }

    /// Every timestamp object in this text, including those nested in markup.
    pub fn timestamps(&self) -> Vec<&Timestamp> {
        let mut out = Vec::new();
        let mut stack: Vec<&Inline> = self.inlines.iter().rev().collect();
        while let Some(inline) = stack.pop() {
            match inline {
                Inline::Timestamp(ts) => out.push(ts),
                Inline::Emphasis { children, .. }
                | Inline::Subscript(children)
                | Inline::Superscript(children) => stack.extend(children.iter().rev()),
                Inline::Link(Link {
                    description: Some(d),
                    ..
                }) => stack.extend(d.iter().rev()),
                _ => {}
            }
        }
        out
    }
}

impl Element {
    /// Direct child elements for container elements.
    pub fn children(&self) -> &[ElementNode] {
        match self {
            Element::GreaterBlock(b) => &b.contents,
            Element::DynamicBlock { contents, .. }
            | Element::FootnoteDefinition { contents, .. } => contents,
            Element::Drawer(d) => &d.contents,
            Element::InlineTask(t) => &t.contents,
            _ => &[],
        }
    }
}

/// Weekday name abbreviation as printed inside timestamps.
pub fn day_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "Mon",
        chrono::Weekday::Tue => "Tue",
        chrono::Weekday::Wed => "Wed",
        chrono::Weekday::Thu => "Thu",
        chrono::Weekday::Fri => "Fri",
        chrono::Weekday::Sat => "Sat",
        chrono::Weekday::Sun => "Sun",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn todo_declaration_splits_on_bar() {
        let kw = TodoKeywords::from_declaration("TODO NEXT(n) WAIT(w@/!) | DONE(d) CANCELED");
        assert_eq!(kw.active, vec!["TODO", "NEXT", "WAIT"]);
        assert_eq!(kw.done, vec!["DONE", "CANCELED"]);
    }

    #[test]
    fn todo_declaration_without_bar_marks_last_done() {
        let kw = TodoKeywords::from_declaration("START MIDDLE FINISHED");
        assert_eq!(kw.active, vec!["START", "MIDDLE"]);
        assert_eq!(kw.done, vec!["FINISHED"]);
        assert!(kw.classify("FINISHED").unwrap().is_done);
        assert!(kw.classify("finished").is_none());
    }

    #[test]
    fn merge_keeps_existing_keywords() {
        let mut base = TodoKeywords::default();
        base.merge(&TodoKeywords::new(["DONE", "REVIEW"], ["SHIPPED"]));
        assert!(base.classify("DONE").unwrap().is_done);
        assert!(!base.classify("REVIEW").unwrap().is_done);
        assert!(base.classify("SHIPPED").unwrap().is_done);
    }

    fn repeating(date: NaiveDate, value: u32, unit: TimeUnit) -> Timestamp {
        let mut ts = Timestamp::new(date);
        ts.repeater = Some(Repeater {
            kind: RepeaterKind::Cumulative,
            interval: Interval { value, unit },
        });
        ts
    }

    #[test]
    fn weekly_repeater_occurrences() {
        let ts = repeating(d(2024, 1, 31), 1, TimeUnit::Week);
        let hits = ts.occurrences(d(2024, 2, 1), d(2024, 2, 20));
        assert_eq!(hits, vec![d(2024, 2, 7), d(2024, 2, 14)]);
    }

    #[test]
    fn monthly_repeater_keeps_month_end() {
        let ts = repeating(d(2024, 1, 31), 1, TimeUnit::Month);
        let hits = ts.occurrences(d(2024, 1, 1), d(2024, 5, 31));
        assert_eq!(
            hits,
            vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 3, 31), d(2024, 4, 30), d(2024, 5, 31)]
        );
        assert_eq!(ts.occurrences(d(2024, 3, 1), d(2024, 3, 31)), vec![d(2024, 3, 31)]);
    }

    #[test]
    fn yearly_repeater_from_leap_day() {
        let ts = repeating(d(2020, 2, 29), 1, TimeUnit::Year);
        assert_eq!(ts.occurrences(d(2021, 1, 1), d(2021, 12, 31)), vec![d(2021, 2, 28)]);
        assert_eq!(ts.occurrences(d(2024, 1, 1), d(2024, 12, 31)), vec![d(2024, 2, 29)]);
    }

    #[test]
    fn latest_occurrence_follows_repeater() {
        let ts = repeating(d(2024, 1, 1), 1, TimeUnit::Week);
        assert_eq!(ts.latest_occurrence(d(2024, 2, 29)), Some(d(2024, 2, 26)));
        assert_eq!(ts.latest_occurrence(d(2024, 2, 26)), Some(d(2024, 2, 26)));
        assert_eq!(ts.latest_occurrence(d(2023, 12, 31)), None);

        let monthly = repeating(d(2024, 1, 31), 1, TimeUnit::Month);
        assert_eq!(monthly.latest_occurrence(d(2024, 4, 15)), Some(d(2024, 3, 31)));

        let once = Timestamp::new(d(2024, 1, 10));
        assert_eq!(once.latest_occurrence(d(2024, 3, 1)), Some(d(2024, 1, 10)));
    }

    #[test]
    fn non_repeating_occurrence_only_in_window() {
        let ts = Timestamp::new(d(2024, 3, 5));
        assert_eq!(ts.occurrences(d(2024, 3, 1), d(2024, 3, 7)), vec![d(2024, 3, 5)]);
        assert!(ts.occurrences(d(2024, 3, 6), d(2024, 3, 7)).is_empty());
    }

    #[test]
    fn invalid_date_is_a_domain_error() {
        let err = Timestamp::from_ymd(2023, 2, 29).unwrap_err();
        assert_eq!(err.to_string(), "invalid calendar date 2023-02-29");
    }

    #[test]
    fn properties_lookup_ignores_case() {
        let mut props = Properties::default();
        props.insert("Category", "work");
        assert_eq!(props.get("CATEGORY"), Some("work"));
    }
}
