//! Service manifest reconciliation.
//!
//! The manifest maps module names to the API model folder that backs each
//! service and to the dependency constraints of its package. Reconciling
//! rescans the API definitions directory, picks the latest API revision per
//! module name, refuses to drop any module already in the manifest, and
//! writes the merged document back with sorted keys.
//!
//! ```text
//! apis/
//!   s3/2006-03-01/api-2.json
//!   ec2/2015-10-01/api-2.json
//!   ec2/2016-11-15/api-2.json   <- wins for "EC2"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::changelog::{ChangelogEntry, ChangelogError, ChangelogFile, ChangelogStore};
use crate::classify::CHANGELOG_FILE;

/// File name of the API definition inside each model folder.
pub const API_DEFINITION_FILE: &str = "api-2.json";

static VERSION_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bv(\d)\b").expect("valid version suffix regex"));

static STABLE_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid stable version regex"));

/// Errors from manifest operations.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// A model folder has no API definition file.
    #[error("unable to bootstrap {model} service; missing required file api-2.json")]
    MissingApiDefinition {
        /// Model folder relative to the API definitions directory.
        model: String,
    },

    /// Override entries that matched no discovered model folder.
    #[error("module name overrides no longer match any model: {}", .0.join(", "))]
    StaleOverride(Vec<String>),

    /// Manifest modules that no longer have an API model.
    #[error("one or more services in the manifest no longer have API models: {}", .0.join(", "))]
    ServiceDisappeared(Vec<String>),

    /// A module name is not present in the manifest.
    #[error("service {0} is not in the manifest")]
    UnknownService(String),

    /// API metadata carries neither an abbreviation nor a full name.
    #[error("API definition for {model} has no service name in its metadata")]
    UnnamedService {
        /// Model folder relative to the API definitions directory.
        model: String,
    },

    /// Reading or writing a file failed.
    #[error("{path}: {source}")]
    Io {
        /// File or directory involved.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or serialized.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// File involved.
        path: Utf8PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Writing service notes to a changelog failed.
    #[error(transparent)]
    Changelog(#[from] ChangelogError),
}

/// Result alias for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

fn io_err(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> ManifestError + '_ {
    move |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Utf8Path) -> impl FnOnce(serde_json::Error) -> ManifestError + '_ {
    move |source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    }
}

// ──────────────────────────────────────────────
// Naming
// ──────────────────────────────────────────────

/// The subset of an API definition the manifest cares about.
#[derive(Debug, Clone, Deserialize)]
struct ApiDefinition {
    metadata: ApiMetadata,
}

/// Service metadata from an API definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetadata {
    /// API revision identifier, an ISO date such as `2016-11-15`.
    pub api_version: String,
    /// Short service name, preferred for naming.
    pub service_abbreviation: Option<String>,
    /// Long service name.
    pub service_full_name: Option<String>,
}

impl ApiMetadata {
    /// Derive a module name from the metadata, if it carries a service name.
    ///
    /// `"Amazon Elastic Compute Cloud"` becomes `ElasticComputeCloud`,
    /// `"AWS Lambda v2"` becomes `LambdaV2`.
    pub fn module_name(&self) -> Option<String> {
        let raw = self
            .service_abbreviation
            .as_deref()
            .or(self.service_full_name.as_deref())?;
        Some(canonical_module_name(raw))
    }
}

fn canonical_module_name(raw: &str) -> String {
    let name = VERSION_SUFFIX_RE.replace_all(raw, "V$1");
    let name: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
    let name = name.strip_prefix("AWS").unwrap_or(&name);
    let name = name.strip_prefix("Amazon").unwrap_or(name);

    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Fixed module names for model folders that cannot be named from metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleNameOverrides(BTreeMap<String, String>);

impl Default for ModuleNameOverrides {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("lambda/2014-11-11".to_string(), "LambdaPreview".to_string()),
            ("runtime.lex/2016-11-28".to_string(), "Lex".to_string()),
            ("states/2016-11-23".to_string(), "States".to_string()),
        ]))
    }
}

impl ModuleNameOverrides {
    /// Build an override table from `(model path, module name)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Override for a model path.
    pub fn get(&self, model: &str) -> Option<&str> {
        self.0.get(model).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries whose model path is not in `consumed`.
    fn unused(&self, consumed: &BTreeSet<&str>) -> Vec<String> {
        self.0
            .keys()
            .filter(|model| !consumed.contains(model.as_str()))
            .cloned()
            .collect()
    }
}

// ──────────────────────────────────────────────
// Discovery
// ──────────────────────────────────────────────

/// A model folder that could back a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PossibleService {
    /// Canonical module name.
    pub module_name: String,
    /// API revision identifier.
    pub api_version: String,
    /// Model folder relative to the API definitions directory (`group/revision`).
    pub model_path: String,
}

/// Load one model folder.
///
/// Returns the candidate and whether its name came from the override table.
#[instrument(skip(overrides), fields(%apis_dir))]
pub fn load_possible_service(
    apis_dir: &Utf8Path,
    model: &str,
    overrides: &ModuleNameOverrides,
) -> ManifestResult<(PossibleService, bool)> {
    let path = apis_dir.join(model).join(API_DEFINITION_FILE);
    if !path.is_file() {
        return Err(ManifestError::MissingApiDefinition {
            model: model.to_string(),
        });
    }
    let text = std::fs::read_to_string(&path).map_err(io_err(&path))?;
    let api: ApiDefinition = serde_json::from_str(&text).map_err(json_err(&path))?;

    let (module_name, overridden) = match overrides.get(model) {
        Some(name) => (name.to_string(), true),
        None => {
            let name = api
                .metadata
                .module_name()
                .ok_or_else(|| ManifestError::UnnamedService {
                    model: model.to_string(),
                })?;
            (name, false)
        }
    };
    debug!(%module_name, api_version = %api.metadata.api_version, overridden, "loaded model");

    Ok((
        PossibleService {
            module_name,
            api_version: api.metadata.api_version,
            model_path: model.to_string(),
        },
        overridden,
    ))
}

/// Scan `apis_dir/<group>/<revision>` folders, in sorted order.
///
/// Fails with [`ManifestError::StaleOverride`] when an override entry was
/// not used by any folder.
#[instrument(skip(overrides), fields(%apis_dir, overrides = overrides.len()))]
pub fn discover_services(
    apis_dir: &Utf8Path,
    overrides: &ModuleNameOverrides,
) -> ManifestResult<Vec<PossibleService>> {
    let mut consumed = BTreeSet::new();
    let mut services = Vec::new();

    for model in model_folders(apis_dir)? {
        let (service, overridden) = load_possible_service(apis_dir, &model, overrides)?;
        if overridden {
            consumed.insert(service.model_path.clone());
        }
        services.push(service);
    }

    let consumed: BTreeSet<&str> = consumed.iter().map(String::as_str).collect();
    let unused = overrides.unused(&consumed);
    if !unused.is_empty() {
        return Err(ManifestError::StaleOverride(unused));
    }

    info!(count = services.len(), "discovered model folders");
    Ok(services)
}

fn model_folders(apis_dir: &Utf8Path) -> ManifestResult<Vec<String>> {
    let mut models = Vec::new();
    for group in sorted_subdirs(apis_dir)? {
        for revision in sorted_subdirs(&apis_dir.join(&group))? {
            models.push(format!("{group}/{revision}"));
        }
    }
    Ok(models)
}

fn sorted_subdirs(dir: &Utf8Path) -> ManifestResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in dir.read_dir_utf8().map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        if entry.file_type().map_err(io_err(entry.path()))?.is_dir() {
            names.push(entry.file_name().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Keep only the most recent API revision per module name.
///
/// API versions compare as strings (ISO dates sort chronologically); equal
/// versions fall back to the model path. Output is sorted by module name.
pub fn latest_per_service(services: Vec<PossibleService>) -> Vec<PossibleService> {
    let mut latest: BTreeMap<String, PossibleService> = BTreeMap::new();
    for service in services {
        let newer = latest.get(&service.module_name).is_none_or(|current| {
            (&current.api_version, &current.model_path) < (&service.api_version, &service.model_path)
        });
        if newer {
            latest.insert(service.module_name.clone(), service);
        } else {
            debug!(
                module_name = %service.module_name,
                discarded = %service.model_path,
                "older API revision discarded"
            );
        }
    }
    latest.into_values().collect()
}

// ──────────────────────────────────────────────
// Manifest document
// ──────────────────────────────────────────────

/// One module's manifest record.
///
/// Kept as the raw JSON object so fields this tool does not manage survive a
/// rewrite in their original form and order. Only `models` and entries under
/// `dependencies` are ever written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestEntry(Map<String, Value>);

impl ManifestEntry {
    /// A fresh record with an empty dependency table.
    pub fn new(models: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("models".into(), Value::from(models));
        fields.insert("dependencies".into(), Value::Object(Map::new()));
        Self(fields)
    }

    /// Model folder backing the module.
    pub fn models(&self) -> Option<&str> {
        self.0.get("models").and_then(Value::as_str)
    }

    /// Point the module at another model folder, keeping the key's position.
    pub fn set_models(&mut self, models: &str) {
        self.0.insert("models".into(), Value::from(models));
    }

    /// Dependency package name to version constraint, when present as an object.
    pub fn dependencies(&self) -> Option<&Map<String, Value>> {
        self.0.get("dependencies").and_then(Value::as_object)
    }

    fn set_dependency(&mut self, package: &str, constraint: &str) {
        let deps = self
            .0
            .entry("dependencies")
            .or_insert_with(|| Value::Object(Map::new()));
        if !deps.is_object() {
            *deps = Value::Object(Map::new());
        }
        if let Value::Object(deps) = deps {
            deps.insert(package.to_string(), Value::from(constraint));
        }
    }
}

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Modules inserted into the manifest.
    pub added: Vec<String>,
    /// Modules whose model folder changed, with the new folder.
    pub updated: Vec<(String, String)>,
    /// Modules left as they were.
    pub unchanged: usize,
}

impl ReconcileReport {
    /// Whether the manifest content changed.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty()
    }
}

/// The service manifest document, keyed by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl ServiceManifest {
    /// Parse manifest JSON.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Read the manifest at `path`.
    #[instrument(fields(%path))]
    pub fn load(path: &Utf8Path) -> ManifestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(io_err(path))?;
        let manifest = Self::parse(&text).map_err(json_err(path))?;
        debug!(modules = manifest.entries.len(), "manifest loaded");
        Ok(manifest)
    }

    /// Pretty-printed JSON with a trailing newline.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// Replace the file at `path` with this manifest.
    pub fn save(&self, path: &Utf8Path) -> ManifestResult<()> {
        let text = self.to_json_string().map_err(json_err(path))?;
        std::fs::write(path, text).map_err(io_err(path))?;
        debug!(%path, modules = self.entries.len(), "manifest written");
        Ok(())
    }

    /// Entry for a module.
    pub fn get(&self, module_name: &str) -> Option<&ManifestEntry> {
        self.entries.get(module_name)
    }

    /// Module names in sorted order.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no modules.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail if any module in the manifest has no surviving candidate.
    pub fn check_complete(&self, services: &[PossibleService]) -> ManifestResult<()> {
        let present: BTreeSet<&str> = services.iter().map(|s| s.module_name.as_str()).collect();
        let missing: Vec<String> = self
            .entries
            .keys()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::ServiceDisappeared(missing))
        }
    }

    /// Merge the latest candidates into the manifest.
    ///
    /// Nothing is modified when the completeness check fails.
    pub fn reconcile(&mut self, services: &[PossibleService]) -> ManifestResult<ReconcileReport> {
        self.check_complete(services)?;

        let mut report = ReconcileReport::default();
        for service in services {
            match self.entries.get_mut(&service.module_name) {
                Some(entry) if entry.models() == Some(service.model_path.as_str()) => {
                    report.unchanged += 1;
                }
                Some(entry) => {
                    entry.set_models(&service.model_path);
                    report
                        .updated
                        .push((service.module_name.clone(), service.model_path.clone()));
                }
                None => {
                    self.entries.insert(
                        service.module_name.clone(),
                        ManifestEntry::new(&service.model_path),
                    );
                    report.added.push(service.module_name.clone());
                }
            }
        }
        Ok(report)
    }

    /// Set a dependency constraint for `module_name` from a released version.
    ///
    /// Returns the constraint written.
    pub fn set_dependency(
        &mut self,
        module_name: &str,
        package: &str,
        released_version: &str,
    ) -> ManifestResult<String> {
        let entry = self
            .entries
            .get_mut(module_name)
            .ok_or_else(|| ManifestError::UnknownService(module_name.to_string()))?;
        let constraint = dependency_constraint(released_version);
        entry.set_dependency(package, &constraint);
        Ok(constraint)
    }
}

/// Version constraint for a dependency on a package at `version`.
///
/// A stable `x.y.z` pins the major version (`~> x`); anything else, such as a
/// labeled pre-release, is used verbatim.
pub fn dependency_constraint(version: &str) -> String {
    let version = version.trim();
    if STABLE_VERSION_RE.is_match(version) {
        let major = version.split('.').next().unwrap_or(version);
        format!("~> {major}")
    } else {
        version.to_string()
    }
}

// ──────────────────────────────────────────────
// Reconciler
// ──────────────────────────────────────────────

/// Where the reconciler reads and writes.
#[derive(Debug, Clone)]
pub struct ManifestReconciler {
    apis_dir: Utf8PathBuf,
    manifest_path: Utf8PathBuf,
    overrides: ModuleNameOverrides,
}

impl ManifestReconciler {
    /// Create a reconciler over an API definitions directory and manifest file.
    pub fn new(
        apis_dir: impl Into<Utf8PathBuf>,
        manifest_path: impl Into<Utf8PathBuf>,
        overrides: ModuleNameOverrides,
    ) -> Self {
        Self {
            apis_dir: apis_dir.into(),
            manifest_path: manifest_path.into(),
            overrides,
        }
    }

    /// Compute the reconciled manifest without writing it.
    #[instrument(skip(self), fields(apis_dir = %self.apis_dir, manifest = %self.manifest_path))]
    pub fn plan(&self) -> ManifestResult<(ServiceManifest, ReconcileReport)> {
        let services = latest_per_service(discover_services(&self.apis_dir, &self.overrides)?);
        let mut manifest = ServiceManifest::load(&self.manifest_path)?;
        let report = manifest.reconcile(&services)?;
        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged,
            "manifest reconciled"
        );
        Ok((manifest, report))
    }

    /// Reconcile and rewrite the manifest file.
    pub fn run(&self) -> ManifestResult<ReconcileReport> {
        let (manifest, report) = self.plan()?;
        manifest.save(&self.manifest_path)?;
        Ok(report)
    }

    /// Set dependency constraints from each dependency package's `VERSION`.
    ///
    /// `pairs` are `(module name, dependency package)`; versions are read
    /// from `<gems_root>/<package>/VERSION`.
    #[instrument(skip(self, pairs), fields(manifest = %self.manifest_path, %gems_root))]
    pub fn update_dependencies(
        &self,
        pairs: &[(String, String)],
        gems_root: &Utf8Path,
    ) -> ManifestResult<Vec<(String, String, String)>> {
        let mut manifest = ServiceManifest::load(&self.manifest_path)?;
        let mut written = Vec::with_capacity(pairs.len());
        for (module_name, package) in pairs {
            let version_path = gems_root.join(package).join("VERSION");
            let released =
                std::fs::read_to_string(&version_path).map_err(io_err(&version_path))?;
            let constraint = manifest.set_dependency(module_name, package, &released)?;
            debug!(%module_name, %package, %constraint, "dependency updated");
            written.push((module_name.clone(), package.clone(), constraint));
        }
        manifest.save(&self.manifest_path)?;
        Ok(written)
    }

    /// Append hand-written release notes for one model folder to its
    /// package's changelog.
    ///
    /// The package is `<service_prefix><module name, lowercased>`. Nothing
    /// happens when `notes` is blank or the changelog does not exist.
    /// Returns the changelog written, if any.
    #[instrument(skip(self, notes), fields(apis_dir = %self.apis_dir))]
    pub fn record_service_notes(
        &self,
        model: &str,
        notes: &str,
        gems_root: &Utf8Path,
        service_prefix: &str,
    ) -> ManifestResult<Option<Utf8PathBuf>> {
        if notes.trim().is_empty() {
            return Ok(None);
        }
        let (service, _) = load_possible_service(&self.apis_dir, model, &self.overrides)?;
        let package = format!("{service_prefix}{}", service.module_name.to_lowercase());
        let path = gems_root.join(&package).join(CHANGELOG_FILE);
        if !path.is_file() {
            warn!(%package, %path, "no changelog for service, notes skipped");
            return Ok(None);
        }

        let mut changelog = ChangelogFile::open(&path)?;
        changelog.add_entry(ChangelogEntry::feature(notes.trim_end()))?;
        info!(%package, "service notes recorded");
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap()
    }

    fn add_model(apis: &Utf8Path, model: &str, api_version: &str, name: &str) {
        let dir = apis.join(model);
        std::fs::create_dir_all(&dir).unwrap();
        let api = serde_json::json!({
            "metadata": { "apiVersion": api_version, "serviceFullName": name }
        });
        std::fs::write(dir.join(API_DEFINITION_FILE), api.to_string()).unwrap();
    }

    fn candidate(name: &str, version: &str, model: &str) -> PossibleService {
        PossibleService {
            module_name: name.into(),
            api_version: version.into(),
            model_path: model.into(),
        }
    }

    #[test]
    fn module_name_from_full_name() {
        assert_eq!(canonical_module_name("Amazon Simple Storage Service"), "SimpleStorageService");
        assert_eq!(canonical_module_name("AWS Lambda"), "Lambda");
        assert_eq!(canonical_module_name("Elastic Load Balancing v2"), "ElasticLoadBalancingV2");
        assert_eq!(canonical_module_name("Amazon CloudWatch Events"), "CloudWatchEvents");
        assert_eq!(canonical_module_name("AWS IoT 1-Click"), "IoT1Click");
        assert_eq!(canonical_module_name("signer"), "Signer");
    }

    #[test]
    fn abbreviation_preferred_over_full_name() {
        let meta = ApiMetadata {
            api_version: "2016-11-15".into(),
            service_abbreviation: Some("Amazon EC2".into()),
            service_full_name: Some("Amazon Elastic Compute Cloud".into()),
        };
        assert_eq!(meta.module_name().as_deref(), Some("EC2"));
    }

    #[test]
    fn latest_revision_wins() {
        let latest = latest_per_service(vec![
            candidate("EC2", "2016-01-01", "ec2/2016-01-01"),
            candidate("S3", "2006-03-01", "s3/2006-03-01"),
            candidate("EC2", "2019-05-10", "ec2/2019-05-10"),
            candidate("EC2", "2017-01-01", "ec2/2017-01-01"),
        ]);
        assert_eq!(
            latest,
            vec![
                candidate("EC2", "2019-05-10", "ec2/2019-05-10"),
                candidate("S3", "2006-03-01", "s3/2006-03-01"),
            ]
        );
    }

    #[test]
    fn dependency_constraints() {
        assert_eq!(dependency_constraint("3.4.1"), "~> 3");
        assert_eq!(dependency_constraint("3.4.1\n"), "~> 3");
        assert_eq!(dependency_constraint("3.4.1.preview2"), "3.4.1.preview2");
    }

    #[test]
    fn reconcile_keeps_other_fields_and_adds_new_modules() {
        let mut manifest = ServiceManifest::parse(
            r#"{
  "S3": { "models": "s3/2006-03-01", "dependencies": { "aws-sdk-kms": "~> 1" }, "addPlugins": ["X"] },
  "EC2": { "models": "ec2/2015-10-01" }
}"#,
        )
        .unwrap();

        let report = manifest
            .reconcile(&[
                candidate("EC2", "2016-11-15", "ec2/2016-11-15"),
                candidate("Lex", "2016-11-28", "runtime.lex/2016-11-28"),
                candidate("S3", "2006-03-01", "s3/2006-03-01"),
            ])
            .unwrap();

        assert_eq!(report.added, vec!["Lex".to_string()]);
        assert_eq!(
            report.updated,
            vec![("EC2".to_string(), "ec2/2016-11-15".to_string())]
        );
        assert_eq!(report.unchanged, 1);

        let s3 = manifest.get("S3").unwrap();
        assert_eq!(s3.dependencies().unwrap()["aws-sdk-kms"], "~> 1");
        let text = manifest.to_json_string().unwrap();
        assert!(text.contains("\"addPlugins\": [\n      \"X\"\n    ]"), "{text}");
        assert!(manifest.get("EC2").unwrap().dependencies().is_none());
        assert_eq!(manifest.get("EC2").unwrap().models(), Some("ec2/2016-11-15"));
        assert_eq!(manifest.get("Lex").unwrap().dependencies(), Some(&Map::new()));
    }

    #[test]
    fn reconcile_leaves_unmanaged_fields_as_written() {
        let mut manifest = ServiceManifest::parse(
            r#"{"S3":{"addPlugins":["X"],"models":"s3/1","dependencies":null,"zz":{"b":1,"a":2}}}"#,
        )
        .unwrap();
        manifest.reconcile(&[candidate("S3", "2", "s3/2")]).unwrap();

        let text = manifest.to_json_string().unwrap();
        let compact: String = text.split_whitespace().collect();
        assert_eq!(
            compact,
            r#"{"S3":{"addPlugins":["X"],"models":"s3/2","dependencies":null,"zz":{"b":1,"a":2}}}"#
        );
    }

    #[test]
    fn set_dependency_replaces_null_table() {
        let mut manifest =
            ServiceManifest::parse(r#"{"S3":{"models":"s3/1","dependencies":null}}"#).unwrap();
        manifest.set_dependency("S3", "aws-sdk-kms", "3.4.1").unwrap();
        assert_eq!(
            manifest.get("S3").unwrap().dependencies().unwrap()["aws-sdk-kms"],
            "~> 3"
        );
    }

    #[test]
    fn disappeared_service_fails_without_changes() {
        let mut manifest =
            ServiceManifest::parse(r#"{"Gone": {"models": "gone/2015-01-01"}, "S3": {"models": "s3/1"}}"#)
                .unwrap();
        let before = manifest.clone();
        let err = manifest
            .reconcile(&[candidate("S3", "1", "s3/1")])
            .unwrap_err();
        match err {
            ManifestError::ServiceDisappeared(missing) => assert_eq!(missing, vec!["Gone"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manifest, before);
    }

    #[test]
    fn serialized_manifest_is_sorted_and_newline_terminated() {
        let mut manifest = ServiceManifest::default();
        manifest
            .reconcile(&[candidate("Zeta", "1", "zeta/1"), candidate("Alpha", "1", "alpha/1")])
            .unwrap();
        let text = manifest.to_json_string().unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.find("\"Alpha\"").unwrap() < text.find("\"Zeta\"").unwrap());
        assert!(text.contains("\n  \"Alpha\": {\n    \"models\": \"alpha/1\",\n    \"dependencies\": {}\n  }"));
    }

    #[test]
    fn set_dependency_requires_known_module() {
        let mut manifest = ServiceManifest::default();
        assert!(matches!(
            manifest.set_dependency("S3", "aws-sdk-kms", "1.0.0"),
            Err(ManifestError::UnknownService(_))
        ));
    }

    #[test]
    fn discovery_uses_overrides_and_requires_api_definition() {
        let tmp = TempDir::new().unwrap();
        let apis = root(&tmp);
        add_model(&apis, "lambda/2014-11-11", "2014-11-11", "AWS Lambda");
        add_model(&apis, "lambda/2015-03-31", "2015-03-31", "AWS Lambda");

        let overrides = ModuleNameOverrides::new([(
            "lambda/2014-11-11".to_string(),
            "LambdaPreview".to_string(),
        )]);
        let services = discover_services(&apis, &overrides).unwrap();
        let names: Vec<&str> = services.iter().map(|s| s.module_name.as_str()).collect();
        assert_eq!(names, vec!["LambdaPreview", "Lambda"]);

        std::fs::create_dir_all(apis.join("broken/2020-01-01")).unwrap();
        assert!(matches!(
            discover_services(&apis, &overrides),
            Err(ManifestError::MissingApiDefinition { model }) if model == "broken/2020-01-01"
        ));
    }

    #[test]
    fn unused_override_is_stale() {
        let tmp = TempDir::new().unwrap();
        let apis = root(&tmp);
        add_model(&apis, "s3/2006-03-01", "2006-03-01", "Amazon S3");
        let err = discover_services(&apis, &ModuleNameOverrides::default()).unwrap_err();
        match err {
            ManifestError::StaleOverride(unused) => assert_eq!(unused.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reconciler_run_rewrites_manifest() {
        let tmp = TempDir::new().unwrap();
        let base = root(&tmp);
        let apis = base.join("apis");
        add_model(&apis, "ec2/2015-10-01", "2015-10-01", "Amazon EC2");
        add_model(&apis, "ec2/2016-11-15", "2016-11-15", "Amazon EC2");
        let manifest_path = base.join("services.json");
        std::fs::write(&manifest_path, r#"{"EC2": {"models": "ec2/2015-10-01", "dependencies": {}}}"#)
            .unwrap();

        let reconciler =
            ManifestReconciler::new(&apis, &manifest_path, ModuleNameOverrides::new([]));
        let report = reconciler.run().unwrap();
        assert!(report.has_changes());

        let manifest = ServiceManifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.get("EC2").unwrap().models(), Some("ec2/2016-11-15"));
    }

    #[test]
    fn update_dependencies_reads_version_files() {
        let tmp = TempDir::new().unwrap();
        let base = root(&tmp);
        let gems = base.join("gems");
        for (gem, version) in [("aws-sdk-kms", "3.4.1\n"), ("aws-sdk-sso", "1.0.0.preview2\n")] {
            std::fs::create_dir_all(gems.join(gem)).unwrap();
            std::fs::write(gems.join(gem).join("VERSION"), version).unwrap();
        }
        let manifest_path = base.join("services.json");
        std::fs::write(&manifest_path, r#"{"S3": {"models": "s3/1", "dependencies": {}}}"#).unwrap();

        let reconciler =
            ManifestReconciler::new(base.join("apis"), &manifest_path, ModuleNameOverrides::new([]));
        reconciler
            .update_dependencies(
                &[
                    ("S3".to_string(), "aws-sdk-kms".to_string()),
                    ("S3".to_string(), "aws-sdk-sso".to_string()),
                ],
                &gems,
            )
            .unwrap();

        let manifest = ServiceManifest::load(&manifest_path).unwrap();
        let deps = manifest.get("S3").unwrap().dependencies().unwrap().clone();
        assert_eq!(deps["aws-sdk-kms"], "~> 3");
        assert_eq!(deps["aws-sdk-sso"], "1.0.0.preview2");
    }

    #[test]
    fn service_notes_go_to_existing_changelog_only() {
        let tmp = TempDir::new().unwrap();
        let base = root(&tmp);
        let apis = base.join("apis");
        let gems = base.join("gems");
        add_model(&apis, "s3/2006-03-01", "2006-03-01", "Amazon S3");
        add_model(&apis, "sqs/2012-11-05", "2012-11-05", "Amazon SQS");
        std::fs::create_dir_all(gems.join("aws-sdk-s3")).unwrap();
        std::fs::write(gems.join("aws-sdk-s3").join(CHANGELOG_FILE), "").unwrap();

        let reconciler =
            ManifestReconciler::new(&apis, base.join("services.json"), ModuleNameOverrides::new([]));

        let written = reconciler
            .record_service_notes("s3/2006-03-01", "Adds bucket tagging.", &gems, "aws-sdk-")
            .unwrap();
        assert_eq!(written, Some(gems.join("aws-sdk-s3").join(CHANGELOG_FILE)));
        let text = std::fs::read_to_string(gems.join("aws-sdk-s3").join(CHANGELOG_FILE)).unwrap();
        assert!(text.contains("* Feature - Adds bucket tagging."));

        assert!(reconciler
            .record_service_notes("sqs/2012-11-05", "Notes.", &gems, "aws-sdk-")
            .unwrap()
            .is_none());
        assert!(reconciler
            .record_service_notes("s3/2006-03-01", "  ", &gems, "aws-sdk-")
            .unwrap()
            .is_none());
    }
}
