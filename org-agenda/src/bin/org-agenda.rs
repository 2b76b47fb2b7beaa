use std::{
    collections::{BTreeSet, HashSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use org_agenda::agenda::{self, AgendaConfig, AgendaItem, AgendaType, AgendaView};
use org_agenda::diary;
use org_agenda::storage::{load_all, FileParser, OrgParser};
use org_agenda::{format_document, parse_document};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "org-agenda",
    about = "Parse, format and build agendas from Org files",
    version
)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse Org files and print their structure.
    Parse(ParseArgs),

    /// Rewrite Org files in canonical form.
    Format(FormatArgs),

    /// Build an agenda view from Org files.
    Agenda(AgendaArgs),

    /// Evaluate a diary sexp on a date or over a range.
    Diary(DiaryArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Org files or directories containing Org files to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Org files or directories to format.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct AgendaArgs {
    /// Org files or directories to include in the agenda.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// JSON file with agenda options (camelCase keys).
    #[arg(long)]
    config: Option<PathBuf>,
    /// First day of the agenda (YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Number of days to show.
    #[arg(long)]
    days: Option<u32>,
    /// Extra files whose `%%(...)` lines are added as diary entries.
    #[arg(long)]
    diary: Vec<PathBuf>,
    /// Include done items and CLOSED entries.
    #[arg(long)]
    show_done: bool,
    /// Emit JSON instead of a human-readable list.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct DiaryArgs {
    /// Expression such as "(diary-float 11 4 4)".
    expression: String,
    /// Date to evaluate on; defaults to today.
    #[arg(long, conflicts_with_all = ["from", "to"])]
    date: Option<NaiveDate>,
    /// Start of a range to enumerate.
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,
    /// Inclusive end of the range.
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,
    /// Emit JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Agenda(args) => handle_agenda(args),
        Commands::Diary(args) => handle_diary(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }

    let parser = FileParser::default();
    let mut parsed = Vec::new();
    for path in expanded {
        let doc = parser
            .parse_file(&path)
            .with_context(|| format!("parsing {:?}", path))?;
        parsed.push((path, doc));
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            document: &'a org_agenda::core::Document,
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, doc)| JsonOutput {
                path: path.display().to_string(),
                document: doc,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, doc)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            println!("{:#?}", doc);
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }
    Ok(())
}

fn handle_format(args: FormatArgs) -> Result<()> {
    let FormatArgs { inputs, in_place } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }

    let parser = FileParser::default();
    let many = expanded.len() > 1;
    for (idx, path) in expanded.iter().enumerate() {
        let doc = parser
            .parse_file(path)
            .with_context(|| format!("parsing {:?}", path))?;
        let formatted = format_document(&doc);

        if in_place {
            fs::write(path, formatted.as_bytes())
                .with_context(|| format!("writing {:?}", path))?;
            tracing::debug!(path = %path.display(), "formatted in place");
        } else {
            if many {
                if idx > 0 {
                    println!();
                }
                println!("== {} ==", path.display());
            }
            print!("{formatted}");
            if !formatted.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

fn handle_agenda(args: AgendaArgs) -> Result<()> {
    let AgendaArgs {
        inputs,
        config,
        from,
        days,
        diary: diary_files,
        show_done,
        json,
    } = args;

    let mut cfg = match config {
        Some(path) => load_config(&path)?,
        None => AgendaConfig::default(),
    };
    if let Some(from) = from {
        cfg.start_date = from;
    }
    if let Some(days) = days {
        cfg.days = days;
    }
    cfg.show_done |= show_done;

    let parser = FileParser::default();
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }
    let loaded = load_all(&parser, &expanded)?;
    let mut entries = loaded.diary_entries();
    for path in &diary_files {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let doc = parse_document(&text);
        entries.extend(agenda::diary_entries_from_document(&doc, path));
    }

    let view = agenda::generate(&loaded.documents, &loaded.file_index, &cfg, &entries);

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render_view(&view));
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<AgendaConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing agenda config {:?}", path))
}

fn render_view(view: &AgendaView) -> String {
    let mut out = String::new();
    for group in &view.groups {
        out.push_str(&group.label);
        out.push('\n');
        for item in &group.items {
            out.push_str("  ");
            out.push_str(&render_item(item));
            out.push('\n');
        }
    }
    out.push_str(&format!(
        "{} items from {} files\n",
        view.total_items, view.total_files
    ));
    out
}

fn render_item(item: &AgendaItem) -> String {
    let time = item
        .time
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default();
    let kind = match item.agenda_type {
        AgendaType::Scheduled => "Scheduled:",
        AgendaType::Deadline if item.overdue => "Overdue:",
        AgendaType::Deadline => "Deadline:",
        AgendaType::Closed => "Closed:",
        AgendaType::Timestamp => "",
        AgendaType::Diary => "Diary:",
    };
    let todo = item.todo.as_ref().map(|t| t.text.as_str()).unwrap_or("");
    let mut line = format!(
        "{:<12} {:<5} {:<11} {:<8} {}",
        item.category, time, kind, todo, item.title
    );
    if let Some(p) = item.priority {
        line.push_str(&format!(" [#{}]", p.0));
    }
    if !item.tags.is_empty() {
        let tags: Vec<&str> = item.tags.iter().map(|t| t.0.as_str()).collect();
        line.push_str(&format!(" :{}:", tags.join(":")));
    }
    if item.overdue {
        if let Some(days) = item.days_until {
            line.push_str(&format!(" ({}d ago)", -days));
        }
    }
    if let Some(desc) = &item.description {
        line.push_str(&format!(" ({desc})"));
    }
    line.trim_end().to_string()
}

fn handle_diary(args: DiaryArgs) -> Result<()> {
    let DiaryArgs {
        expression,
        date,
        from,
        to,
        json,
    } = args;

    if let (Some(from), Some(to)) = (from, to) {
        let hits = diary::dates_in_range(&expression, from, to);
        if json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
        } else {
            for hit in hits {
                match hit.result.description {
                    Some(desc) => println!("{} {}", hit.date, desc),
                    None => println!("{}", hit.date),
                }
            }
        }
        return Ok(());
    }

    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let result = diary::evaluate(&expression, date);
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let verdict = if result.matches { "match" } else { "no match" };
        match &result.description {
            Some(desc) => println!("{date} {verdict}: {desc}"),
            None => println!("{date} {verdict}"),
        }
    }
    Ok(())
}

fn collect_org_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut out, &mut visited)?;
    out.sort();
    out.dedup();
    Ok(out)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            tracing::debug!(dir = %canonical.display(), "scanning directory");
            for file in collect_org_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            if !is_org(&canonical) {
                anyhow::bail!("{:?} is not an .org file", canonical);
            }
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn is_org(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "org")
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_org(&canonical) {
        tracing::trace!(file = %canonical.display(), "found org file");
        out.push(canonical);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use org_agenda::agenda::{AgendaGroup, FileIndex};

    #[test]
    fn expand_inputs_walks_directories_and_skips_other_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).expect("mkdir");
        fs::write(root.join("a.org"), "* A\n").expect("write a");
        fs::write(root.join("sub/b.org"), "* B\n").expect("write b");
        fs::write(root.join("notes.txt"), "x").expect("write txt");

        let files = expand_inputs(&[root.to_path_buf(), root.join("a.org")]).expect("expand");
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(names, vec!["a.org", "b.org"]);
    }

    #[test]
    fn expand_inputs_rejects_non_org_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let txt = tmp.path().join("notes.txt");
        fs::write(&txt, "x").expect("write");
        assert!(expand_inputs(&[txt]).is_err());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("agenda.json");
        fs::write(&path, r#"{"startDate":"2024-05-01","days":3,"showHabits":false}"#)
            .expect("write");
        let cfg = load_config(&path).expect("config");
        assert_eq!(cfg.start_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(cfg.days, 3);
        assert!(!cfg.show_habits);
    }

    #[test]
    fn renders_groups_and_overdue_items() {
        let doc = parse_document("* TODO [#A] Pay rent :home:\nDEADLINE: <2024-04-28>\n");
        let cfg = AgendaConfig::starting(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), 2);
        let mut index = FileIndex::new();
        index.insert(doc.id, PathBuf::from("/n/bills.org"));
        let view = agenda::generate(&[doc], &index, &cfg, &[]);
        let text = render_view(&view);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Wednesday 1 May 2024");
        assert!(lines[1].contains("Overdue:"));
        assert!(lines[1].ends_with("Pay rent [#A] :home: (3d ago)"));
        assert_eq!(lines[2], "Thursday 2 May 2024");
        assert_eq!(lines[3], "1 items from 1 files");
        let empty = AgendaView {
            groups: vec![AgendaGroup {
                label: "x".into(),
                date: None,
                items: vec![],
            }],
            ..view
        };
        assert!(render_view(&empty).starts_with("x\n"));
    }
}
