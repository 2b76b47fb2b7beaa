//! Filesystem seam: reading documents from disk for the agenda.

use crate::agenda::{diary_entries_from_document, DiarySexpEntry, FileIndex};
use crate::core::Document;
use crate::parser::{parse_document_with, ParseConfig};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Parsing is independent of how files are found.
pub trait OrgParser {
    fn parse_file(&self, abs_path: &Path) -> Result<Document>;
}

/// Reads UTF-8 files and parses them with a fixed [`ParseConfig`].
#[derive(Debug, Clone, Default)]
pub struct FileParser {
    pub config: ParseConfig,
}

impl FileParser {
    pub fn new(config: ParseConfig) -> Self {
        Self { config }
    }
}

impl OrgParser for FileParser {
    fn parse_file(&self, abs_path: &Path) -> Result<Document> {
        let text =
            fs::read_to_string(abs_path).with_context(|| format!("reading {:?}", abs_path))?;
        Ok(parse_document_with(&text, &self.config))
    }
}

/// Documents parsed from a set of files, with the index the agenda needs.
#[derive(Debug, Default)]
pub struct Loaded {
    pub documents: Vec<Document>,
    pub file_index: FileIndex,
}

impl Loaded {
    /// Diary sexp lines found in every loaded document.
    pub fn diary_entries(&self) -> Vec<DiarySexpEntry> {
        self.documents
            .iter()
            .flat_map(|doc| {
                let file = self
                    .file_index
                    .get(&doc.id)
                    .cloned()
                    .unwrap_or_else(|| PathBuf::from(crate::agenda::UNKNOWN_FILE));
                diary_entries_from_document(doc, &file)
            })
            .collect()
    }
}

/// Parse every path with `parser`, stopping at the first I/O failure.
pub fn load_all<P: OrgParser>(parser: &P, paths: &[PathBuf]) -> Result<Loaded> {
    let mut loaded = Loaded::default();
    for path in paths {
        tracing::debug!(path = %path.display(), "loading");
        let doc = parser
            .parse_file(path)
            .with_context(|| format!("parsing {:?}", path))?;
        loaded.file_index.insert(doc.id, path.clone());
        loaded.documents.push(doc);
    }
    Ok(loaded)
}
