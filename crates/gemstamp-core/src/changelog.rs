//! Per-package changelog store.
//!
//! The [`ChangelogStore`] trait is the contract the classifier and the
//! version bumper work against. [`ChangelogDocument`] is the in-memory
//! Markdown model and [`ChangelogFile`] persists it, rewriting the whole
//! file after every mutation.
//!
//! # Format
//!
//! ```text
//! Unreleased Changes
//! ------------------
//!
//! * Feature - Added support for enumerating regions for `Aws::Foo`.
//!
//! 1.4.0 (2024-05-01)
//! ------------------
//!
//! * Issue - Fixed a thing.
//! ```
//!
//! Entry continuation lines are indented by two spaces.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::version::ReleaseVersion;

/// Heading of the unreleased bucket.
pub const UNRELEASED_HEADING: &str = "Unreleased Changes";

/// Errors from changelog operations.
#[derive(Error, Debug)]
pub enum ChangelogError {
    /// Reading or writing the changelog file failed.
    #[error("changelog {path}: {source}")]
    Io {
        /// Changelog path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An unreleased entry line could not be parsed.
    #[error("malformed changelog entry: {0:?}")]
    MalformedEntry(String),
}

/// Result alias for changelog operations.
pub type ChangelogResult<T> = Result<T, ChangelogError>;

/// Kind of a release-note entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// New functionality; warrants a minor bump.
    Feature,
    /// A fix.
    Bugfix,
    /// A resolved issue.
    Issue,
}

impl EntryKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "Feature",
            Self::Bugfix => "Bugfix",
            Self::Issue => "Issue",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Feature" => Some(Self::Feature),
            "Bugfix" => Some(Self::Bugfix),
            "Issue" => Some(Self::Issue),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single release-note entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangelogEntry {
    /// Entry kind.
    pub kind: EntryKind,
    /// Entry text (may span multiple lines).
    pub text: String,
}

impl ChangelogEntry {
    /// Create an entry.
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Shorthand for a feature entry.
    pub fn feature(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Feature, text)
    }

    /// Whether this entry warrants a minor-level bump.
    pub fn is_point_level(&self) -> bool {
        self.kind == EntryKind::Feature
    }

    fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (i, line) in self.text.lines().enumerate() {
            if i == 0 {
                lines.push(format!("* {} - {line}", self.kind));
            } else if line.is_empty() {
                lines.push(String::new());
            } else {
                lines.push(format!("  {line}"));
            }
        }
        if lines.is_empty() {
            lines.push(format!("* {} - ", self.kind));
        }
        lines
    }
}

/// The changelog operations consumed by classification and bumping.
pub trait ChangelogStore {
    /// Append an entry to the unreleased bucket, creating it if needed.
    fn add_entry(&mut self, entry: ChangelogEntry) -> ChangelogResult<()>;

    /// Ensure an unreleased bucket exists. Idempotent.
    fn add_unreleased_section(&mut self) -> ChangelogResult<()>;

    /// Entries in the unreleased bucket, in file order.
    fn unreleased_entries(&self) -> ChangelogResult<Vec<ChangelogEntry>>;

    /// Move the unreleased entries under a heading for `version`.
    fn stamp_unreleased(&mut self, version: &ReleaseVersion) -> ChangelogResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    heading: String,
    lines: Vec<String>,
}

impl Section {
    fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            lines: Vec::new(),
        }
    }

    fn is_unreleased(&self) -> bool {
        self.heading == UNRELEASED_HEADING
    }
}

/// In-memory Markdown changelog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelogDocument {
    preamble: Vec<String>,
    sections: Vec<Section>,
}

impl ChangelogDocument {
    /// Parse changelog Markdown.
    pub fn parse(text: &str) -> Self {
        let raw: Vec<&str> = text.lines().collect();
        let mut doc = Self::default();
        let mut current: Option<Section> = None;
        let mut i = 0;

        while i < raw.len() {
            let line = raw[i];
            let underlined = raw.get(i + 1).is_some_and(|next| is_underline(next));
            if underlined && !line.trim().is_empty() {
                if let Some(section) = current.take() {
                    doc.sections.push(section);
                }
                current = Some(Section::new(line.trim_end()));
                i += 2;
                continue;
            }
            match current {
                Some(ref mut section) => section.lines.push(line.trim_end().to_string()),
                None => doc.preamble.push(line.trim_end().to_string()),
            }
            i += 1;
        }
        if let Some(section) = current {
            doc.sections.push(section);
        }

        trim_blank_edges(&mut doc.preamble);
        for section in &mut doc.sections {
            trim_blank_edges(&mut section.lines);
        }
        doc
    }

    /// Render back to Markdown.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        if !self.preamble.is_empty() {
            out.push('\n');
        }
        for (i, section) in self.sections.iter().enumerate() {
            out.push_str(&section.heading);
            out.push('\n');
            out.push_str(&"-".repeat(section.heading.chars().count()));
            out.push_str("\n\n");
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
            if !section.lines.is_empty() && i + 1 < self.sections.len() {
                out.push('\n');
            }
        }
        out
    }

    /// Headings of all sections, newest first.
    pub fn headings(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.heading.as_str()).collect()
    }

    fn unreleased_index(&self) -> Option<usize> {
        self.sections.iter().position(Section::is_unreleased)
    }

    fn ensure_unreleased(&mut self) -> usize {
        if let Some(idx) = self.unreleased_index() {
            return idx;
        }
        self.sections.insert(0, Section::new(UNRELEASED_HEADING));
        0
    }

    /// Stamp the unreleased bucket under `version` dated `date`.
    ///
    /// A fresh, empty unreleased bucket is placed above the new section.
    pub fn stamp_unreleased_on(&mut self, version: &ReleaseVersion, date: NaiveDate) {
        let heading = format!("{version} ({})", date.format("%Y-%m-%d"));
        let idx = self.ensure_unreleased();
        self.sections[idx].heading = heading;
        self.sections.insert(idx, Section::new(UNRELEASED_HEADING));
    }
}

impl ChangelogStore for ChangelogDocument {
    fn add_entry(&mut self, entry: ChangelogEntry) -> ChangelogResult<()> {
        let idx = self.ensure_unreleased();
        self.sections[idx].lines.extend(entry.to_lines());
        Ok(())
    }

    fn add_unreleased_section(&mut self) -> ChangelogResult<()> {
        self.ensure_unreleased();
        Ok(())
    }

    fn unreleased_entries(&self) -> ChangelogResult<Vec<ChangelogEntry>> {
        let Some(idx) = self.unreleased_index() else {
            return Ok(Vec::new());
        };
        parse_entries(&self.sections[idx].lines)
    }

    fn stamp_unreleased(&mut self, version: &ReleaseVersion) -> ChangelogResult<()> {
        self.stamp_unreleased_on(version, chrono::Local::now().date_naive());
        Ok(())
    }
}

/// A changelog backed by a file on disk.
#[derive(Debug, Clone)]
pub struct ChangelogFile {
    path: Utf8PathBuf,
    doc: ChangelogDocument,
}

impl ChangelogFile {
    /// Open a changelog, treating a missing file as empty.
    #[instrument(fields(%path))]
    pub fn open(path: &Utf8Path) -> ChangelogResult<Self> {
        let doc = match std::fs::read_to_string(path) {
            Ok(text) => ChangelogDocument::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("changelog missing, starting empty");
                ChangelogDocument::default()
            }
            Err(source) => {
                return Err(ChangelogError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The parsed document.
    pub const fn document(&self) -> &ChangelogDocument {
        &self.doc
    }

    fn save(&self) -> ChangelogResult<()> {
        std::fs::write(&self.path, self.doc.render()).map_err(|source| ChangelogError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl ChangelogStore for ChangelogFile {
    fn add_entry(&mut self, entry: ChangelogEntry) -> ChangelogResult<()> {
        debug!(path = %self.path, kind = %entry.kind, text = %entry.text, "adding changelog entry");
        self.doc.add_entry(entry)?;
        self.save()
    }

    fn add_unreleased_section(&mut self) -> ChangelogResult<()> {
        self.doc.add_unreleased_section()?;
        self.save()
    }

    fn unreleased_entries(&self) -> ChangelogResult<Vec<ChangelogEntry>> {
        self.doc.unreleased_entries()
    }

    fn stamp_unreleased(&mut self, version: &ReleaseVersion) -> ChangelogResult<()> {
        debug!(path = %self.path, %version, "stamping unreleased changes");
        self.doc.stamp_unreleased(version)?;
        self.save()
    }
}

fn is_underline(line: &str) -> bool {
    let line = line.trim_end();
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

fn trim_blank_edges(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let leading = lines.iter().take_while(|l| l.trim().is_empty()).count();
    lines.drain(..leading);
}

fn parse_entries(lines: &[String]) -> ChangelogResult<Vec<ChangelogEntry>> {
    let mut entries: Vec<ChangelogEntry> = Vec::new();
    for line in lines {
        if let Some(rest) = line.strip_prefix("* ") {
            let (label, text) = rest
                .split_once(" - ")
                .or_else(|| rest.strip_suffix(" -").map(|label| (label, "")))
                .ok_or_else(|| ChangelogError::MalformedEntry(line.clone()))?;
            let kind = EntryKind::from_label(label.trim())
                .ok_or_else(|| ChangelogError::MalformedEntry(line.clone()))?;
            entries.push(ChangelogEntry::new(kind, text));
        } else if let Some(last) = entries.last_mut() {
            last.text.push('\n');
            last.text.push_str(line.strip_prefix("  ").unwrap_or(line));
        } else if !line.trim().is_empty() {
            return Err(ChangelogError::MalformedEntry(line.clone()));
        }
    }
    for entry in &mut entries {
        let trimmed = entry.text.trim_end().len();
        entry.text.truncate(trimmed);
    }
    Ok(entries)
}
