//! Version bump planning and execution.
//!
//! All orchestration logic lives here. The CLI is purely a display layer.
//!
//! # Two-phase workflow
//!
//! 1. **Plan** ([`PackageBumper::plan_update`], [`PackageBumper::plan_ga`]):
//!    read `VERSION` and the unreleased changelog entries, compute the next
//!    version. Nothing is written.
//! 2. **Execute** ([`PackageBumper::update_version`],
//!    [`PackageBumper::promote_to_ga`]): write `VERSION`, then stamp the
//!    unreleased entries under the new version.
//!
//! [`run_bumps`] drives either phase over many packages, writing each
//! package before moving on to the next.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::changelog::{ChangelogEntry, ChangelogError, ChangelogFile, ChangelogStore};
use crate::classify::CHANGELOG_FILE;
use crate::version::{BumpLevel, ReleaseVersion, VersionError};

/// File name of every package's version file.
pub const VERSION_FILE: &str = "VERSION";

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors from bump operations.
#[derive(Error, Debug)]
pub enum BumpError {
    /// The package has no `VERSION` file.
    #[error("missing version file {0}")]
    MissingVersionFile(Utf8PathBuf),

    /// The `VERSION` file does not hold a valid version.
    #[error("{path}: {source}")]
    InvalidVersionFile {
        /// Version file path.
        path: Utf8PathBuf,
        /// Why the text was rejected.
        source: VersionError,
    },

    /// Version computation failed.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Reading or writing a file failed.
    #[error("{path}: {source}")]
    Io {
        /// File or directory involved.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading or stamping the changelog failed.
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
}

/// Result alias for bump operations.
pub type BumpResult<T> = Result<T, BumpError>;

// ──────────────────────────────────────────────
// VERSION file
// ──────────────────────────────────────────────

/// A package's `VERSION` file: one line, the version, a trailing newline.
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: Utf8PathBuf,
}

impl VersionFile {
    /// The `VERSION` file inside `package_dir`.
    pub fn in_dir(package_dir: &Utf8Path) -> Self {
        Self {
            path: package_dir.join(VERSION_FILE),
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Read and parse the current version.
    pub fn read(&self) -> BumpResult<ReleaseVersion> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BumpError::MissingVersionFile(self.path.clone()));
            }
            Err(source) => {
                return Err(BumpError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        ReleaseVersion::parse(text.trim()).map_err(|source| BumpError::InvalidVersionFile {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the file with `version`.
    pub fn write(&self, version: &ReleaseVersion) -> BumpResult<()> {
        std::fs::write(&self.path, format!("{version}\n")).map_err(|source| BumpError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

// ──────────────────────────────────────────────
// Plan types
// ──────────────────────────────────────────────

/// Compute the next version from pending entries.
///
/// Returns `None` when there is nothing to release. A new service keeps the
/// version it was declared with.
pub fn compute_next_version(
    current: &ReleaseVersion,
    entries: &[ChangelogEntry],
    new_service: bool,
) -> Option<ReleaseVersion> {
    if entries.is_empty() {
        return None;
    }
    if new_service {
        return Some(current.clone());
    }
    Some(current.bump(BumpLevel::for_entries(entries)))
}

/// What a bump will do to one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedBump {
    /// Package name.
    pub package: String,
    /// Version currently in `VERSION`.
    pub previous: ReleaseVersion,
    /// Version to write.
    pub next: ReleaseVersion,
    /// Unreleased entries that will be stamped.
    pub entries: usize,
    /// The package is a new service whose declared version is kept.
    pub new_service: bool,
}

/// The result of bumping (or planning to bump) one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BumpOutcome {
    /// Package name.
    pub package: String,
    /// The planned change, or `None` when there was nothing to release.
    pub bump: Option<PlannedBump>,
    /// Whether `VERSION` and the changelog were written.
    pub written: bool,
}

// ──────────────────────────────────────────────
// Execute
// ──────────────────────────────────────────────

/// Bumps one package's `VERSION` and stamps its changelog.
#[derive(Debug)]
pub struct PackageBumper<C> {
    package: String,
    version_file: VersionFile,
    changelog: C,
    new_service: bool,
}

impl PackageBumper<ChangelogFile> {
    /// Bumper for the package directory `<gems_root>/<package>`.
    pub fn open(gems_root: &Utf8Path, package: &str, new_service: bool) -> BumpResult<Self> {
        let dir = gems_root.join(package);
        let changelog = ChangelogFile::open(&dir.join(CHANGELOG_FILE))?;
        Ok(Self::new(package, VersionFile::in_dir(&dir), changelog, new_service))
    }
}

impl<C: ChangelogStore> PackageBumper<C> {
    /// Create a bumper over an explicit version file and changelog.
    pub fn new(
        package: impl Into<String>,
        version_file: VersionFile,
        changelog: C,
        new_service: bool,
    ) -> Self {
        Self {
            package: package.into(),
            version_file,
            changelog,
            new_service,
        }
    }

    /// The changelog this bumper stamps.
    pub const fn changelog(&self) -> &C {
        &self.changelog
    }

    /// Plan a release from the unreleased entries.
    ///
    /// `None` when the unreleased bucket is empty.
    #[instrument(skip(self), fields(package = %self.package, new_service = self.new_service))]
    pub fn plan_update(&self) -> BumpResult<Option<PlannedBump>> {
        let entries = self.changelog.unreleased_entries()?;
        if entries.is_empty() {
            debug!("no unreleased entries");
            return Ok(None);
        }
        let previous = self.version_file.read()?;
        let Some(next) = compute_next_version(&previous, &entries, self.new_service) else {
            return Ok(None);
        };
        debug!(%previous, %next, entries = entries.len(), "bump planned");
        Ok(Some(PlannedBump {
            package: self.package.clone(),
            previous,
            next,
            entries: entries.len(),
            new_service: self.new_service,
        }))
    }

    /// Plan promotion of a labeled version to `major.0.0`.
    #[instrument(skip(self), fields(package = %self.package))]
    pub fn plan_ga(&self) -> BumpResult<PlannedBump> {
        let previous = self.version_file.read()?;
        let next = previous.graduate()?;
        let entries = self.changelog.unreleased_entries()?.len();
        Ok(PlannedBump {
            package: self.package.clone(),
            previous,
            next,
            entries,
            new_service: false,
        })
    }

    /// Release the unreleased entries under the next version.
    ///
    /// Returns the version written, or `None` (and writes nothing) when there
    /// are no unreleased entries.
    pub fn update_version(&mut self) -> BumpResult<Option<ReleaseVersion>> {
        let Some(plan) = self.plan_update()? else {
            return Ok(None);
        };
        self.apply(&plan)?;
        Ok(Some(plan.next))
    }

    /// Graduate a pre-release line and stamp the (possibly empty) unreleased
    /// bucket under it.
    pub fn promote_to_ga(&mut self) -> BumpResult<ReleaseVersion> {
        let plan = self.plan_ga()?;
        self.apply(&plan)?;
        Ok(plan.next)
    }

    fn apply(&mut self, plan: &PlannedBump) -> BumpResult<()> {
        self.version_file.write(&plan.next)?;
        self.changelog.stamp_unreleased(&plan.next)?;
        info!(
            package = %plan.package,
            previous = %plan.previous,
            new = %plan.next,
            path = %self.version_file.path(),
            "version bumped"
        );
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Orchestration
// ──────────────────────────────────────────────

/// Which bump to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BumpMode {
    /// Release unreleased entries under the next version.
    #[default]
    Update,
    /// Promote labeled versions to their first stable release.
    Ga,
}

/// A multi-package bump.
#[derive(Debug, Clone, Default)]
pub struct BumpRequest {
    /// Directory holding one folder per package.
    pub gems_root: Utf8PathBuf,
    /// Packages to bump; empty means every package found under `gems_root`.
    pub packages: Vec<String>,
    /// Packages whose declared version is kept.
    pub new_services: BTreeSet<String>,
    /// Which bump to run.
    pub mode: BumpMode,
    /// Plan only.
    pub dry_run: bool,
}

/// Names of every folder under `gems_root` that holds a `VERSION` file, sorted.
#[instrument(fields(%gems_root))]
pub fn discover_packages(gems_root: &Utf8Path) -> BumpResult<Vec<String>> {
    let io = |source| BumpError::Io {
        path: gems_root.to_path_buf(),
        source,
    };
    let mut packages = Vec::new();
    for entry in gems_root.read_dir_utf8().map_err(io)? {
        let entry = entry.map_err(io)?;
        if entry.path().join(VERSION_FILE).is_file() {
            packages.push(entry.file_name().to_string());
        }
    }
    packages.sort();
    debug!(count = packages.len(), "packages discovered");
    Ok(packages)
}

/// Run a bump over every requested package, in order.
///
/// Each package is written before the next is read; the first failure stops
/// the run and leaves earlier packages bumped.
#[instrument(skip(request), fields(gems_root = %request.gems_root, mode = ?request.mode, dry_run = request.dry_run))]
pub fn run_bumps(request: &BumpRequest) -> BumpResult<Vec<BumpOutcome>> {
    let packages = if request.packages.is_empty() {
        discover_packages(&request.gems_root)?
    } else {
        request.packages.clone()
    };

    let mut outcomes = Vec::with_capacity(packages.len());
    for package in packages {
        let new_service = request.new_services.contains(&package);
        let mut bumper = PackageBumper::open(&request.gems_root, &package, new_service)?;

        let bump = match request.mode {
            BumpMode::Update => bumper.plan_update()?,
            BumpMode::Ga => Some(bumper.plan_ga()?),
        };
        let written = match bump {
            Some(ref plan) if !request.dry_run => {
                bumper.apply(plan)?;
                true
            }
            _ => false,
        };
        outcomes.push(BumpOutcome {
            package,
            bump,
            written,
        });
    }

    let bumped = outcomes.iter().filter(|o| o.bump.is_some()).count();
    info!(packages = outcomes.len(), bumped, "bump run complete");
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{ChangelogDocument, UNRELEASED_HEADING};
    use tempfile::TempDir;

    fn v(text: &str) -> ReleaseVersion {
        ReleaseVersion::parse(text).unwrap()
    }

    fn gems_root(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(tmp.path().join("gems")).unwrap()
    }

    fn add_package(gems: &Utf8Path, name: &str, version: &str, changelog: &str) {
        let dir = gems.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(VERSION_FILE), format!("{version}\n")).unwrap();
        std::fs::write(dir.join(CHANGELOG_FILE), changelog).unwrap();
    }

    const PENDING: &str = "Unreleased Changes\n------------------\n\n* Feature - Code Generated Changes.\n";

    fn read_version(gems: &Utf8Path, name: &str) -> String {
        std::fs::read_to_string(gems.join(name).join(VERSION_FILE)).unwrap()
    }

    #[test]
    fn next_version_rules() {
        let features = vec![ChangelogEntry::feature("x")];
        let fixes = vec![ChangelogEntry::new(crate::changelog::EntryKind::Bugfix, "y")];

        assert_eq!(compute_next_version(&v("1.2.3"), &[], false), None);
        assert_eq!(compute_next_version(&v("1.2.3"), &features, false), Some(v("1.3.0")));
        assert_eq!(compute_next_version(&v("1.2.3"), &fixes, false), Some(v("1.2.4")));
        assert_eq!(compute_next_version(&v("0.4.9"), &features, false), Some(v("1.0.0")));
        assert_eq!(compute_next_version(&v("1.0.0.rc1"), &features, false), Some(v("1.0.0.rc2")));
        assert_eq!(compute_next_version(&v("1.0.0"), &features, true), Some(v("1.0.0")));
    }

    #[test]
    fn version_file_missing_and_malformed() {
        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let file = VersionFile::in_dir(&dir);
        assert!(matches!(file.read(), Err(BumpError::MissingVersionFile(_))));

        std::fs::write(file.path(), "one.two\n").unwrap();
        assert!(matches!(
            file.read(),
            Err(BumpError::InvalidVersionFile { .. })
        ));
    }

    #[test]
    fn update_without_entries_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let gems = gems_root(&tmp);
        add_package(&gems, "aws-sdk-s3", "1.2.3", "");

        let mut bumper = PackageBumper::open(&gems, "aws-sdk-s3", false).unwrap();
        assert_eq!(bumper.update_version().unwrap(), None);
        assert_eq!(read_version(&gems, "aws-sdk-s3"), "1.2.3\n");
        assert_eq!(std::fs::read_to_string(gems.join("aws-sdk-s3/CHANGELOG.md")).unwrap(), "");
    }

    #[test]
    fn update_bumps_and_stamps() {
        let tmp = TempDir::new().unwrap();
        let gems = gems_root(&tmp);
        add_package(&gems, "aws-sdk-s3", "1.2.3", PENDING);

        let mut bumper = PackageBumper::open(&gems, "aws-sdk-s3", false).unwrap();
        assert_eq!(bumper.update_version().unwrap(), Some(v("1.3.0")));
        assert_eq!(read_version(&gems, "aws-sdk-s3"), "1.3.0\n");

        let doc = ChangelogDocument::parse(
            &std::fs::read_to_string(gems.join("aws-sdk-s3/CHANGELOG.md")).unwrap(),
        );
        assert_eq!(doc.headings()[0], UNRELEASED_HEADING);
        assert!(doc.headings()[1].starts_with("1.3.0 ("));
        assert!(doc.unreleased_entries().unwrap().is_empty());
    }

    #[test]
    fn new_service_keeps_version_but_stamps() {
        let mut doc = ChangelogDocument::default();
        doc.add_entry(ChangelogEntry::feature("Initial release of `aws-sdk-newsvc`."))
            .unwrap();

        let tmp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let version_file = VersionFile::in_dir(&dir);
        version_file.write(&v("1.0.0")).unwrap();

        let mut bumper = PackageBumper::new("aws-sdk-newsvc", version_file, doc, true);
        assert_eq!(bumper.update_version().unwrap(), Some(v("1.0.0")));
        assert!(bumper.changelog().headings()[1].starts_with("1.0.0 ("));
        assert!(bumper.changelog().unreleased_entries().unwrap().is_empty());
    }

    #[test]
    fn ga_requires_label() {
        let tmp = TempDir::new().unwrap();
        let gems = gems_root(&tmp);
        add_package(&gems, "aws-sdk-preview", "1.0.0.rc3", "");
        add_package(&gems, "aws-sdk-stable", "2.1.0", "");

        let mut preview = PackageBumper::open(&gems, "aws-sdk-preview", false).unwrap();
        assert_eq!(preview.promote_to_ga().unwrap(), v("1.0.0"));
        assert_eq!(read_version(&gems, "aws-sdk-preview"), "1.0.0\n");

        let mut stable = PackageBumper::open(&gems, "aws-sdk-stable", false).unwrap();
        assert!(matches!(
            stable.promote_to_ga(),
            Err(BumpError::Version(VersionError::NoLabelPresent(_)))
        ));
        assert_eq!(read_version(&gems, "aws-sdk-stable"), "2.1.0\n");
    }

    #[test]
    fn discover_packages_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let gems = gems_root(&tmp);
        add_package(&gems, "aws-sdk-s3", "1.0.0", "");
        add_package(&gems, "aws-sdk-ec2", "1.0.0", "");
        std::fs::create_dir_all(gems.join("not-a-gem")).unwrap();

        assert_eq!(
            discover_packages(&gems).unwrap(),
            vec!["aws-sdk-ec2".to_string(), "aws-sdk-s3".to_string()]
        );
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let tmp = TempDir::new().unwrap();
        let gems = gems_root(&tmp);
        add_package(&gems, "aws-sdk-s3", "1.2.3", PENDING);
        add_package(&gems, "aws-sdk-ec2", "1.0.0", "");

        let request = BumpRequest {
            gems_root: gems.clone(),
            dry_run: true,
            ..BumpRequest::default()
        };
        let outcomes = run_bumps(&request).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].bump.is_none());
        assert_eq!(outcomes[1].bump.as_ref().unwrap().next, v("1.3.0"));
        assert!(!outcomes[1].written);
        assert_eq!(read_version(&gems, "aws-sdk-s3"), "1.2.3\n");
    }

    #[test]
    fn run_stops_at_first_failure() {
        let tmp = TempDir::new().unwrap();
        let gems = gems_root(&tmp);
        add_package(&gems, "aws-sdk-a", "1.0.0", PENDING);
        add_package(&gems, "aws-sdk-c", "1.0.0", PENDING);
        std::fs::create_dir_all(gems.join("aws-sdk-b")).unwrap();
        std::fs::write(gems.join("aws-sdk-b").join(CHANGELOG_FILE), PENDING).unwrap();

        let request = BumpRequest {
            gems_root: gems.clone(),
            packages: vec!["aws-sdk-a".into(), "aws-sdk-b".into(), "aws-sdk-c".into()],
            ..BumpRequest::default()
        };
        assert!(matches!(
            run_bumps(&request),
            Err(BumpError::MissingVersionFile(_))
        ));
        assert_eq!(read_version(&gems, "aws-sdk-a"), "1.1.0\n");
        assert_eq!(read_version(&gems, "aws-sdk-c"), "1.0.0\n");
    }
}
