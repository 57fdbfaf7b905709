//! Change classification: changed paths to release-note entries.
//!
//! A build reports the files it touched as paths under the gems directory.
//! [`ChangeSet::parse`] groups them by package, and a [`Classifier`] turns
//! each package's paths into changelog entries. How a package is classified
//! depends on its [`PackageKind`]:
//!
//! - **resource aggregation**: paths are ignored; every newly autoloaded
//!   service gem in the package's entry file becomes an entry
//! - **core runtime**: every path must be recognized, otherwise
//!   classification fails with [`ClassifyError::UnexpectedChange`]
//! - **partitions**: newly enumerable region keys, or one generic entry
//! - **service**: initial release, nothing (hand-written notes), or one
//!   generic code-generation entry

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::changelog::{ChangelogEntry, ChangelogError, ChangelogFile, ChangelogStore};
use crate::git::{DiffContext, DiffProvider, GitError};

/// File name of every package's changelog.
pub const CHANGELOG_FILE: &str = "CHANGELOG.md";

static AUTOLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+  autoload :\w+, '(.+)'$").expect("valid autoload regex")
});

static PARTITION_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+\s+'(.+?)' => '.+?'").expect("valid partition regex")
});

/// Errors from change classification.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// A path changed in a package whose change surface is fully enumerated.
    #[error("unexpected change in {package}/{path}")]
    UnexpectedChange {
        /// Package name.
        package: String,
        /// Path relative to the package directory.
        path: String,
    },

    /// A changed-path line does not point inside the gems directory.
    #[error("changed path {0:?} is not inside a package directory")]
    MalformedChangeLine(String),

    /// Diffing a source file failed.
    #[error("failed to diff {path}: {source}")]
    Diff {
        /// File that was diffed.
        path: Utf8PathBuf,
        /// The underlying git error.
        source: GitError,
    },

    /// Writing to a changelog failed.
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
}

/// Result alias for classification.
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// How a package's changes are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageKind {
    /// Meta-package that depends on every service package.
    ResourceAggregation,
    /// The shared runtime.
    CoreRuntime,
    /// Partition and endpoint metadata.
    Partitions,
    /// A generated per-service package.
    Service,
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceAggregation => write!(f, "resource-aggregation"),
            Self::CoreRuntime => write!(f, "core-runtime"),
            Self::Partitions => write!(f, "partitions"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// Names of the packages that get special classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRoles {
    /// The core runtime package.
    pub core: String,
    /// The resource aggregation package.
    pub resources: String,
    /// The partitions metadata package.
    pub partitions: String,
}

impl Default for PackageRoles {
    fn default() -> Self {
        Self {
            core: "aws-sdk-core".into(),
            resources: "aws-sdk-resources".into(),
            partitions: "aws-partitions".into(),
        }
    }
}

impl PackageRoles {
    /// Classification strategy for `package`.
    pub fn kind_of(&self, package: &str) -> PackageKind {
        if package == self.resources {
            PackageKind::ResourceAggregation
        } else if package == self.core {
            PackageKind::CoreRuntime
        } else if package == self.partitions {
            PackageKind::Partitions
        } else {
            PackageKind::Service
        }
    }
}

/// Changed paths of one package, relative to the package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageChanges {
    /// Package name.
    pub package: String,
    /// Changed paths; empty means a brand-new package.
    pub paths: Vec<String>,
}

impl PackageChanges {
    fn touches(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

/// Changed paths grouped by package, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    packages: Vec<PackageChanges>,
}

impl ChangeSet {
    /// Parse a newline-delimited path list.
    ///
    /// Each line must contain `<gems_dir>/<package>[/<path>]`; a line naming
    /// only the package directory registers the package with no paths.
    pub fn parse(raw: &str, gems_dir: &str) -> ClassifyResult<Self> {
        let pattern = format!(r"(?:^|/){}/([^/]+)(?:/(.+))?$", regex::escape(gems_dir));
        let line_re = Regex::new(&pattern)
            .map_err(|_| ClassifyError::MalformedChangeLine(gems_dir.to_string()))?;

        let mut set = Self::default();
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let caps = line_re
                .captures(line)
                .ok_or_else(|| ClassifyError::MalformedChangeLine(line.to_string()))?;
            let package = &caps[1];
            let path = caps.get(2).map(|m| m.as_str().trim_end_matches('/'));
            set.push(package, path.filter(|p| !p.is_empty()));
        }
        debug!(packages = set.packages.len(), "parsed change set");
        Ok(set)
    }

    fn push(&mut self, package: &str, path: Option<&str>) {
        let idx = match self.packages.iter().position(|p| p.package == package) {
            Some(idx) => idx,
            None => {
                self.packages.push(PackageChanges {
                    package: package.to_string(),
                    paths: Vec::new(),
                });
                self.packages.len() - 1
            }
        };
        if let Some(path) = path {
            self.packages[idx].paths.push(path.to_string());
        }
    }

    /// Packages in first-seen order.
    pub fn packages(&self) -> &[PackageChanges] {
        &self.packages
    }

    /// Whether no package changed.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// The outcome of classifying one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Package name.
    pub package: String,
    /// Strategy that produced the entries.
    pub kind: PackageKind,
    /// The package has no prior release; its changelog needs a fresh bucket.
    pub new_package: bool,
    /// Entries to append, in order.
    pub entries: Vec<ChangelogEntry>,
}

impl Classification {
    /// Write the classification into a changelog.
    pub fn record(&self, store: &mut impl ChangelogStore) -> ClassifyResult<()> {
        if self.new_package {
            store.add_unreleased_section()?;
        }
        for entry in &self.entries {
            store.add_entry(entry.clone())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CoreNote {
    TokenService,
    SingleSignOn,
}

/// Classifies package changes into changelog entries.
pub struct Classifier<'a, D> {
    roles: &'a PackageRoles,
    diff: &'a D,
    gems_dir: Utf8PathBuf,
}

impl<'a, D: DiffProvider> Classifier<'a, D> {
    /// Create a classifier. `gems_dir` is relative to the diff provider's root.
    pub fn new(roles: &'a PackageRoles, diff: &'a D, gems_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            roles,
            diff,
            gems_dir: gems_dir.into(),
        }
    }

    /// Classify one package's changes.
    #[instrument(skip(self, changes), fields(package = %changes.package, paths = changes.paths.len()))]
    pub fn classify(&self, changes: &PackageChanges) -> ClassifyResult<Classification> {
        let kind = self.roles.kind_of(&changes.package);
        let mut new_package = false;
        let entries = match kind {
            PackageKind::ResourceAggregation => self.classify_resources(&changes.package)?,
            PackageKind::CoreRuntime => classify_core(changes)?,
            PackageKind::Partitions => self.classify_partitions(changes)?,
            PackageKind::Service => {
                new_package = changes.paths.is_empty();
                classify_service(changes)
            }
        };
        debug!(%kind, entries = entries.len(), new_package, "classified");
        Ok(Classification {
            package: changes.package.clone(),
            kind,
            new_package,
            entries,
        })
    }

    fn entry_file(&self, package: &str) -> Utf8PathBuf {
        self.gems_dir
            .join(package)
            .join("lib")
            .join(format!("{package}.rb"))
    }

    fn added_lines(&self, path: &Utf8Path, context: DiffContext) -> ClassifyResult<Vec<String>> {
        self.diff
            .diff(path, context)
            .map_err(|source| ClassifyError::Diff {
                path: path.to_path_buf(),
                source,
            })
    }

    fn classify_resources(&self, package: &str) -> ClassifyResult<Vec<ChangelogEntry>> {
        let file = self.entry_file(package);
        let entries = self
            .added_lines(&file, DiffContext::Default)?
            .iter()
            .filter_map(|line| AUTOLOAD_RE.captures(line))
            .map(|caps| {
                ChangelogEntry::feature(format!("Added a dependency on the new `{}` gem.", &caps[1]))
            })
            .collect();
        Ok(entries)
    }

    fn classify_partitions(&self, changes: &PackageChanges) -> ClassifyResult<Vec<ChangelogEntry>> {
        let entry_path = format!("lib/{}.rb", changes.package);
        if !changes.touches(&entry_path) {
            return Ok(vec![ChangelogEntry::feature(
                "Updated the partitions source data that determines the AWS service regions and endpoints.",
            )]);
        }

        let file = self.entry_file(&changes.package);
        let entries = self
            .added_lines(&file, DiffContext::Zero)?
            .iter()
            .filter_map(|line| PARTITION_KEY_RE.captures(line))
            .map(|caps| {
                ChangelogEntry::feature(format!(
                    "Added support for enumerating regions for `Aws::{}`.",
                    &caps[1]
                ))
            })
            .collect();
        Ok(entries)
    }
}

fn classify_core(changes: &PackageChanges) -> ClassifyResult<Vec<ChangelogEntry>> {
    let param_filter = format!("lib/{}/log/param_filter.rb", changes.package);
    let mut emitted: HashSet<CoreNote> = HashSet::new();
    let mut entries = Vec::new();

    for path in &changes.paths {
        if path == CHANGELOG_FILE {
            continue;
        }
        if *path == param_filter {
            entries.push(ChangelogEntry::feature(
                "Updated the list of parameters to filter when logging.",
            ));
        } else if path.contains("lib/aws-sdk-sts") {
            if emitted.insert(CoreNote::TokenService) {
                entries.push(ChangelogEntry::feature(
                    "Updated Aws::STS::Client with the latest API changes.",
                ));
            }
        } else if path.contains("lib/aws-sdk-sso") {
            if emitted.insert(CoreNote::SingleSignOn) {
                entries.push(ChangelogEntry::feature(
                    "Updated Aws::SSO::Client with the latest API changes.",
                ));
            }
        } else {
            return Err(ClassifyError::UnexpectedChange {
                package: changes.package.clone(),
                path: path.clone(),
            });
        }
    }
    Ok(entries)
}

fn classify_service(changes: &PackageChanges) -> Vec<ChangelogEntry> {
    if changes.paths.is_empty() {
        return vec![ChangelogEntry::feature(format!(
            "Initial release of `{}`.",
            changes.package
        ))];
    }
    if changes.touches(CHANGELOG_FILE) {
        // notes were written by hand or when the release was unpacked
        return Vec::new();
    }
    vec![ChangelogEntry::feature(
        "Code Generated Changes, see `./build_tools` or `aws-sdk-core`'s CHANGELOG.md for details.",
    )]
}

/// Classify every package in `changes` and write the entries to
/// `<gems_root>/<package>/CHANGELOG.md`.
///
/// Packages are written one at a time; a failure leaves earlier packages
/// updated and later ones untouched.
#[instrument(skip(changes, classifier), fields(%gems_root, packages = changes.packages().len()))]
pub fn update_changelogs<D: DiffProvider>(
    changes: &ChangeSet,
    classifier: &Classifier<'_, D>,
    gems_root: &Utf8Path,
) -> ClassifyResult<Vec<Classification>> {
    let mut results = Vec::with_capacity(changes.packages().len());
    for package in changes.packages() {
        let classification = classifier.classify(package)?;
        if classification.new_package || !classification.entries.is_empty() {
            let path = gems_root.join(&package.package).join(CHANGELOG_FILE);
            let mut changelog = ChangelogFile::open(&path)?;
            classification.record(&mut changelog)?;
        }
        info!(
            package = %classification.package,
            entries = classification.entries.len(),
            "changelog updated"
        );
        results.push(classification);
    }
    Ok(results)
}
