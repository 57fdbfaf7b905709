//! Package version model.
//!
//! Package versions are a numeric `major.minor.patch` triple with an
//! optional pre-release label such as `.preview` or `.rc2`. The label is not
//! semver pre-release syntax (it is dot-separated, not dash-separated), so
//! [`ReleaseVersion`] parses and formats it itself and only exposes the
//! numeric core as a [`semver::Version`].
//!
//! Label rules:
//! - a labeled version bumps its label counter, never its numbers
//!   (`1.0.0.rc1` → `1.0.0.rc2`, `1.0.0.preview` → `1.0.0.preview2`)
//! - the first minor bump of an unlabeled `0.y.z` line yields `1.0.0`
//! - [`ReleaseVersion::graduate`] promotes `x.y.z.<label>` to `x.0.0`

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::changelog::ChangelogEntry;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)(\..+)?$").expect("valid version regex"));

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\..+?)(\d+)?$").expect("valid label regex"));

/// Errors from version operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The text is not `x.y.z` optionally followed by `.label`.
    #[error("malformed version {0:?}: expected x.y.z or x.y.z.<label>")]
    Malformed(String),

    /// Graduation was requested for a version without a pre-release label.
    #[error("version {0} carries no pre-release label to graduate from")]
    NoLabelPresent(String),
}

/// Result alias for version operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Bump level derived from pending changelog entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    /// Patch release (x.y.Z).
    Patch,
    /// Minor release (x.Y.0), or `1.0.0` for a `0.y.z` line.
    Minor,
}

impl BumpLevel {
    /// Minor when any entry is point-level, patch otherwise.
    pub fn for_entries(entries: &[ChangelogEntry]) -> Self {
        if entries.iter().any(ChangelogEntry::is_point_level) {
            Self::Minor
        } else {
            Self::Patch
        }
    }
}

impl fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Minor => write!(f, "minor"),
        }
    }
}

/// A pre-release label: the dotted text plus an optional trailing counter.
///
/// An absent counter means an implicit `1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    text: String,
    counter: Option<u64>,
}

impl Label {
    /// Build a label from its text (with leading dot) and optional counter.
    ///
    /// Rejects any combination that would read back differently once
    /// formatted, such as text without a leading dot or text ending in a digit.
    pub fn new(text: impl Into<String>, counter: Option<u64>) -> VersionResult<Self> {
        let label = Self {
            text: text.into(),
            counter,
        };
        match Self::parse(&label.to_string()) {
            Some(ref back) if *back == label => Ok(label),
            _ => Err(VersionError::Malformed(label.to_string())),
        }
    }

    /// Label text including its leading dot, e.g. `.preview` or `.rc`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Trailing counter, e.g. `2` in `.rc2`.
    pub const fn counter(&self) -> Option<u64> {
        self.counter
    }

    /// Parse a label suffix such as `.rc1`.
    fn parse(raw: &str) -> Option<Self> {
        let caps = LABEL_RE.captures(raw)?;
        let counter = match caps.get(2) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };
        Some(Self {
            text: caps[1].to_string(),
            counter,
        })
    }

    /// The next label in the sequence: `.preview` → `.preview2`, `.rc2` → `.rc3`.
    #[must_use]
    pub fn increment(&self) -> Self {
        Self {
            text: self.text.clone(),
            counter: Some(self.effective_counter() + 1),
        }
    }

    /// Counter value with the implicit `1` applied.
    pub fn effective_counter(&self) -> u64 {
        self.counter.unwrap_or(1)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if let Some(counter) = self.counter {
            write!(f, "{counter}")?;
        }
        Ok(())
    }
}

/// A package version: `major.minor.patch` plus an optional [`Label`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// Pre-release label, if any.
    pub label: Option<Label>,
}

impl ReleaseVersion {
    /// Create an unlabeled version.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            label: None,
        }
    }

    /// Attach a label to this version.
    pub fn with_label(
        mut self,
        text: impl Into<String>,
        counter: Option<u64>,
    ) -> VersionResult<Self> {
        self.label = Some(Label::new(text, counter)?);
        Ok(self)
    }

    /// Parse canonical version text, e.g. `1.2.3` or `1.0.0.rc1`.
    pub fn parse(text: &str) -> VersionResult<Self> {
        let malformed = || VersionError::Malformed(text.to_string());
        let caps = VERSION_RE.captures(text).ok_or_else(malformed)?;
        let number = |i: usize| caps[i].parse::<u64>().map_err(|_| malformed());
        let label = match caps.get(4) {
            Some(m) => Some(Label::parse(m.as_str()).ok_or_else(malformed)?),
            None => None,
        };
        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            label,
        })
    }

    /// The numeric triple as a semver version, label dropped.
    pub const fn core(&self) -> semver::Version {
        semver::Version::new(self.major, self.minor, self.patch)
    }

    /// Compute the next version for a bump level.
    ///
    /// A labeled version only advances its label counter.
    #[must_use]
    pub fn bump(&self, level: BumpLevel) -> Self {
        if let Some(ref label) = self.label {
            return Self {
                label: Some(label.increment()),
                ..self.clone()
            };
        }
        match level {
            BumpLevel::Minor if self.major == 0 => Self::new(1, 0, 0),
            BumpLevel::Minor => Self::new(self.major, self.minor + 1, 0),
            BumpLevel::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }

    /// Promote a pre-release line to its first stable release, `major.0.0`.
    pub fn graduate(&self) -> VersionResult<Self> {
        if self.label.is_none() {
            return Err(VersionError::NoLabelPresent(self.to_string()));
        }
        Ok(Self::new(self.major, 0, 0))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref label) = self.label {
            write!(f, "{label}")?;
        }
        Ok(())
    }
}

impl FromStr for ReleaseVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.label, &other.label) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a
                    .effective_counter()
                    .cmp(&b.effective_counter())
                    .then_with(|| a.text.cmp(&b.text))
                    .then_with(|| a.counter.cmp(&b.counter)),
            })
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
