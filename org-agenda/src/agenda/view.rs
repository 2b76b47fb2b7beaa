//! Filter, sort and group passes over projected agenda items.

use super::{AgendaConfig, AgendaGroup, AgendaItem, GroupBy, SortBy};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Keep the items allowed by every filter in `config`.
pub fn filter(items: Vec<AgendaItem>, config: &AgendaConfig) -> Vec<AgendaItem> {
    items
        .into_iter()
        .filter(|item| keep(item, config))
        .collect()
}

fn keep(item: &AgendaItem, config: &AgendaConfig) -> bool {
    if let Some(states) = &config.todo_states {
        match &item.todo {
            Some(todo) if states.iter().any(|s| *s == todo.text) => {}
            _ => return false,
        }
    }
    if !config.show_done && item.is_done() {
        return false;
    }
    if let Some(include) = non_empty(&config.include_tags) {
        if !item.tags.iter().any(|t| include.contains(&t.0)) {
            return false;
        }
    }
    if let Some(exclude) = &config.exclude_tags {
        if item.tags.iter().any(|t| exclude.contains(&t.0)) {
            return false;
        }
    }
    if let Some(priorities) = &config.priorities {
        if !item.priority.is_some_and(|p| priorities.contains(&p)) {
            return false;
        }
    }
    if let Some(categories) = &config.categories {
        if !categories.contains(&item.category) {
            return false;
        }
    }
    if let Some(files) = &config.files {
        if !files.iter().any(|f| *f == item.file) {
            return false;
        }
    }
    if !config.show_habits && item.habit {
        return false;
    }
    true
}

fn non_empty(list: &Option<Vec<String>>) -> Option<&Vec<String>> {
    list.as_ref().filter(|l| !l.is_empty())
}

/// Stable sort; items without the sort key go last.
pub fn sort(items: &mut [AgendaItem], by: SortBy) {
    match by {
        SortBy::Time => items.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| missing_last(a.time.as_ref(), b.time.as_ref()))
        }),
        SortBy::Priority => {
            items.sort_by(|a, b| missing_last(a.priority.as_ref(), b.priority.as_ref()))
        }
        SortBy::Category => items.sort_by(|a, b| a.category.cmp(&b.category)),
        SortBy::Todo => items.sort_by(|a, b| {
            missing_last(
                a.todo.as_ref().map(|t| &t.text),
                b.todo.as_ref().map(|t| &t.text),
            )
        }),
        SortBy::Tag => items.sort_by(|a, b| missing_last(a.first_tag(), b.first_tag())),
    }
}

fn missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub const NO_PRIORITY: &str = "No Priority";
pub const NO_STATE: &str = "No State";
pub const UNTAGGED: &str = "Untagged";

/// Split sorted items into groups, preserving their order inside each group.
///
/// Date grouping yields one group per day of `[start, end]`, empty or not; overdue
/// items land in the first day. Other groupings are ordered by label with the
/// group for items lacking the key last.
pub fn group(items: Vec<AgendaItem>, by: GroupBy, start: NaiveDate, end: NaiveDate) -> Vec<AgendaGroup> {
    match by {
        GroupBy::Date => by_date(items, start, end),
        GroupBy::Category => by_key(items, |i| Some(i.category.clone()), ""),
        GroupBy::Todo => by_key(items, |i| i.todo.as_ref().map(|t| t.text.clone()), NO_STATE),
        GroupBy::Priority => by_key(
            items,
            |i| i.priority.map(|p| p.0.to_string()),
            NO_PRIORITY,
        ),
        GroupBy::Tag => by_key(items, |i| i.first_tag().map(|t| t.0.clone()), UNTAGGED),
    }
}

fn by_date(items: Vec<AgendaItem>, start: NaiveDate, end: NaiveDate) -> Vec<AgendaGroup> {
    let mut groups: Vec<AgendaGroup> = start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|date| AgendaGroup {
            label: date.format("%A %-d %B %Y").to_string(),
            date: Some(date),
            items: vec![],
        })
        .collect();
    for item in items {
        let date = if item.overdue { start } else { item.date };
        let Ok(idx) = usize::try_from((date - start).num_days()) else {
            continue;
        };
        match groups.get_mut(idx) {
            Some(group) => group.items.push(item),
            None => tracing::trace!(date = %item.date, "item outside agenda window"),
        }
    }
    groups
}

fn by_key<F>(items: Vec<AgendaItem>, key: F, missing: &str) -> Vec<AgendaGroup>
where
    F: Fn(&AgendaItem) -> Option<String>,
{
    let mut keyed: BTreeMap<String, Vec<AgendaItem>> = BTreeMap::new();
    let mut rest = Vec::new();
    for item in items {
        match key(&item) {
            Some(k) => keyed.entry(k).or_default().push(item),
            None => rest.push(item),
        }
    }
    let mut groups: Vec<AgendaGroup> = keyed
        .into_iter()
        .map(|(label, items)| AgendaGroup {
            label,
            date: None,
            items,
        })
        .collect();
    if !rest.is_empty() {
        groups.push(AgendaGroup {
            label: missing.to_string(),
            date: None,
            items: rest,
        });
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agenda::AgendaType;
    use crate::core::{Priority, Tag, TodoKeyword};
    use chrono::NaiveTime;
    use std::path::PathBuf;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn item(title: &str, date: NaiveDate) -> AgendaItem {
        AgendaItem {
            id: uuid::Uuid::new_v4(),
            title: title.into(),
            todo: None,
            priority: None,
            tags: vec![],
            file: PathBuf::from("/n/a.org"),
            line: 1,
            agenda_type: AgendaType::Scheduled,
            date,
            time: None,
            days_until: None,
            overdue: false,
            category: "a".into(),
            habit: false,
            context_path: vec![],
            description: None,
            source: None,
            heading: None,
        }
    }

    fn todo(text: &str, done: bool) -> Option<TodoKeyword> {
        Some(TodoKeyword {
            text: text.into(),
            is_done: done,
        })
    }

    fn titles(items: &[AgendaItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn filters_combine() {
        let mut a = item("a", d(2024, 1, 1));
        a.todo = todo("TODO", false);
        a.tags = vec![Tag::from("work")];
        a.priority = Some(Priority('A'));
        let mut b = item("b", d(2024, 1, 1));
        b.todo = todo("DONE", true);
        let mut c = item("c", d(2024, 1, 1));
        c.todo = todo("NEXT", false);
        c.tags = vec![Tag::from("home")];
        c.habit = true;

        let cfg = AgendaConfig::starting(d(2024, 1, 1), 1);
        let all = vec![a, b, c];
        assert_eq!(titles(&filter(all.clone(), &cfg)), vec!["a", "c"]);

        let cfg2 = AgendaConfig {
            show_done: true,
            ..cfg.clone()
        };
        assert_eq!(filter(all.clone(), &cfg2).len(), 3);

        let cfg3 = AgendaConfig {
            todo_states: Some(vec!["NEXT".into()]),
            ..cfg.clone()
        };
        assert_eq!(titles(&filter(all.clone(), &cfg3)), vec!["c"]);

        let cfg4 = AgendaConfig {
            show_habits: false,
            ..cfg.clone()
        };
        assert_eq!(titles(&filter(all.clone(), &cfg4)), vec!["a"]);

        let cfg5 = AgendaConfig {
            exclude_tags: Some(vec!["work".into()]),
            priorities: None,
            ..cfg.clone()
        };
        assert_eq!(titles(&filter(all.clone(), &cfg5)), vec!["c"]);

        let cfg6 = AgendaConfig {
            priorities: Some(vec![Priority('A')]),
            include_tags: Some(vec!["work".into()]),
            ..cfg.clone()
        };
        assert_eq!(titles(&filter(all.clone(), &cfg6)), vec!["a"]);

        let cfg7 = AgendaConfig {
            files: Some(vec![PathBuf::from("/n/other.org")]),
            ..cfg
        };
        assert!(filter(all, &cfg7).is_empty());
    }

    #[test]
    fn time_sort_puts_untimed_last_and_is_stable() {
        let mut a = item("untimed", d(2024, 1, 2));
        let mut b = item("late", d(2024, 1, 2));
        b.time = NaiveTime::from_hms_opt(15, 0, 0);
        let mut c = item("early", d(2024, 1, 2));
        c.time = NaiveTime::from_hms_opt(8, 0, 0);
        let e = item("first-day", d(2024, 1, 1));
        a.category = "x".into();
        let mut items = vec![a, b, c, e, item("untimed-2", d(2024, 1, 2))];
        sort(&mut items, SortBy::Time);
        assert_eq!(
            titles(&items),
            vec!["first-day", "early", "late", "untimed", "untimed-2"]
        );
    }

    #[test]
    fn priority_sort_and_groups() {
        let mut a = item("a", d(2024, 1, 1));
        a.priority = Some(Priority('B'));
        let b = item("b", d(2024, 1, 1));
        let mut c = item("c", d(2024, 1, 1));
        c.priority = Some(Priority('A'));
        let mut items = vec![a, b, c];
        sort(&mut items, SortBy::Priority);
        assert_eq!(titles(&items), vec!["c", "a", "b"]);

        let groups = group(items, GroupBy::Priority, d(2024, 1, 1), d(2024, 1, 1));
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B", NO_PRIORITY]);
    }

    #[test]
    fn date_groups_keep_empty_days_and_pin_overdue() {
        let mut late = item("late", d(2023, 12, 20));
        late.overdue = true;
        let items = vec![late, item("b", d(2024, 1, 3))];
        let groups = group(items, GroupBy::Date, d(2024, 1, 1), d(2024, 1, 4));
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].label, "Monday 1 January 2024");
        assert_eq!(titles(&groups[0].items), vec!["late"]);
        assert!(groups[1].items.is_empty());
        assert_eq!(titles(&groups[2].items), vec!["b"]);
    }

    #[test]
    fn tag_and_todo_groups() {
        let mut a = item("a", d(2024, 1, 1));
        a.tags = vec![Tag::from("zeta"), Tag::from("alpha")];
        let mut b = item("b", d(2024, 1, 1));
        b.todo = todo("TODO", false);
        let groups = group(vec![a.clone(), b.clone()], GroupBy::Tag, d(2024, 1, 1), d(2024, 1, 1));
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["zeta", UNTAGGED]);

        let groups = group(vec![a, b], GroupBy::Todo, d(2024, 1, 1), d(2024, 1, 1));
        let labels: Vec<&str> = groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["TODO", NO_STATE]);
    }
}
