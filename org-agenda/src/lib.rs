//! Org outline tooling: a structural parser, a canonical formatter, a diary-sexp
//! evaluator and an agenda engine over parsed documents.
//!
//! ```
//! use org_agenda::{format_document, parse_document};
//!
//! let doc = parse_document("* TODO [#A] Buy milk :errand:\nDEADLINE: <2024-01-20>\n");
//! let heading = &doc.headings[0];
//! assert_eq!(heading.keyword.as_ref().map(|k| k.text.as_str()), Some("TODO"));
//! assert!(format_document(&doc).starts_with("* TODO [#A] Buy milk :errand:"));
//! ```

pub mod agenda;
pub mod core;
pub mod diary;
pub mod format;
pub mod parser;
pub mod scan;
pub mod storage;

pub use agenda::{generate, AgendaConfig, AgendaView, DiarySexpEntry, FileIndex};
pub use diary::{dates_in_range, evaluate, DiaryMatch};
pub use format::format_document;
pub use parser::{parse_document, parse_document_with, ParseConfig};
pub use storage::{FileParser, OrgParser};
