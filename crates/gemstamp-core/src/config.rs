//! Configuration loading and discovery.
//!
//! Settings are layered with figment: built-in defaults, then the user
//! config in the platform config directory, then the closest project config
//! found by walking up from the working directory, then explicit files.
//! Files may be TOML, YAML (`.yaml`/`.yml`) or JSON.
//!
//! # Config file locations (highest precedence first)
//! - `.gemstamp.<ext>` in current directory or any parent
//! - `gemstamp.<ext>` in current directory or any parent
//! - `~/.config/gemstamp/config.<ext>` (user config)
//!
//! Where `<ext>` is one of: `toml`, `yaml`, `yml`, `json`
//!
//! # Example
//! ```no_run
//! use camino::Utf8PathBuf;
//! use gemstamp_core::config::{Config, ConfigLoader};
//!
//! let cwd = std::env::current_dir().unwrap();
//! let cwd = Utf8PathBuf::try_from(cwd).expect("current directory is not valid UTF-8");
//! let config = ConfigLoader::new()
//!     .with_project_search(&cwd)
//!     .load()
//!     .unwrap();
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::classify::PackageRoles;
use crate::error::{ConfigError, ConfigResult};
use crate::manifest::ModuleNameOverrides;
use crate::registry::{DEFAULT_REGISTRY_URL, RetryPolicy};

/// The configuration for gemstamp.
///
/// Deserialized from config files found during discovery (TOML, YAML, or JSON).
/// Every section is optional; [`Config::layout`] and [`Config::registry`]
/// fill in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// Package layout overrides.
    pub packages: Option<PackagesConfig>,
    /// Service manifest overrides.
    pub manifest: Option<ManifestConfig>,
    /// Registry client overrides.
    pub registry: Option<RegistryConfig>,
}

/// Where packages live and which ones get special classification.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PackagesConfig {
    /// Directory holding one folder per package, relative to the repository
    /// root (default: `gems`).
    pub gems_dir: Option<Utf8PathBuf>,
    /// Core runtime package (default: `aws-sdk-core`).
    pub core: Option<String>,
    /// Resource aggregation package (default: `aws-sdk-resources`).
    pub resources: Option<String>,
    /// Partitions metadata package (default: `aws-partitions`).
    pub partitions: Option<String>,
    /// Prefix of per-service package names (default: `aws-sdk-`).
    pub service_prefix: Option<String>,
}

/// Service manifest configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ManifestConfig {
    /// Manifest file, relative to the repository root (default: `services.json`).
    pub path: Option<Utf8PathBuf>,
    /// API definitions directory, relative to the repository root
    /// (default: `apis`).
    pub apis_dir: Option<Utf8PathBuf>,
    /// Module names for model folders that cannot be named from metadata.
    ///
    /// Replaces the built-in table when set.
    ///
    /// ```toml
    /// [manifest.module_name_overrides]
    /// "lambda/2014-11-11" = "LambdaPreview"
    /// ```
    pub module_name_overrides: Option<BTreeMap<String, String>>,
}

/// Registry client configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Registry base URL (default: `https://rubygems.org`).
    pub url: Option<String>,
    /// Retries after a rate-limited first attempt (default: 2).
    pub max_retries: Option<u32>,
    /// Longest `Retry-After` to honour, in seconds (default: 600).
    pub max_retry_after_secs: Option<u64>,
    /// Environment variable holding the publish API key
    /// (default: `RUBYGEMS_API_KEY`).
    pub api_key_env: Option<String>,
}

/// Repository layout with every default applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Layout {
    /// Repository root.
    pub root: Utf8PathBuf,
    /// Package directory relative to the root, as changed paths report it.
    pub gems_dir: Utf8PathBuf,
    /// Package directory, absolute.
    pub gems_root: Utf8PathBuf,
    /// Packages with special classification.
    pub roles: PackageRoles,
    /// Prefix of per-service package names.
    pub service_prefix: String,
    /// Manifest file, absolute.
    pub manifest_path: Utf8PathBuf,
    /// API definitions directory, absolute.
    pub apis_dir: Utf8PathBuf,
    /// Module name override table.
    pub overrides: ModuleNameOverrides,
}

/// Registry settings with every default applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySettings {
    /// Registry base URL.
    pub url: String,
    /// Rate-limit retry bounds.
    pub policy: RetryPolicy,
    /// Environment variable holding the publish API key.
    pub api_key_env: String,
}

impl Config {
    /// Resolve the repository layout rooted at `root`.
    pub fn layout(&self, root: &Utf8Path) -> Layout {
        let packages = self.packages.clone().unwrap_or_default();
        let manifest = self.manifest.clone().unwrap_or_default();
        let defaults = PackageRoles::default();

        let gems_dir = packages.gems_dir.unwrap_or_else(|| "gems".into());
        let overrides = manifest
            .module_name_overrides
            .map_or_else(ModuleNameOverrides::default, ModuleNameOverrides::new);

        Layout {
            root: root.to_path_buf(),
            gems_root: root.join(&gems_dir),
            gems_dir,
            roles: PackageRoles {
                core: packages.core.unwrap_or(defaults.core),
                resources: packages.resources.unwrap_or(defaults.resources),
                partitions: packages.partitions.unwrap_or(defaults.partitions),
            },
            service_prefix: packages.service_prefix.unwrap_or_else(|| "aws-sdk-".into()),
            manifest_path: root.join(manifest.path.unwrap_or_else(|| "services.json".into())),
            apis_dir: root.join(manifest.apis_dir.unwrap_or_else(|| "apis".into())),
            overrides,
        }
    }

    /// Resolve registry settings.
    pub fn registry(&self) -> RegistrySettings {
        let registry = self.registry.clone().unwrap_or_default();
        let defaults = RetryPolicy::default();
        RegistrySettings {
            url: registry
                .url
                .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string()),
            policy: RetryPolicy {
                max_retries: registry.max_retries.unwrap_or(defaults.max_retries),
                max_retry_after: registry
                    .max_retry_after_secs
                    .map_or(defaults.max_retry_after, Duration::from_secs),
            },
            api_key_env: registry
                .api_key_env
                .unwrap_or_else(|| "RUBYGEMS_API_KEY".to_string()),
        }
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Recognized config file extensions, in lookup order.
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for platform directories and config file names.
const APP_NAME: &str = "gemstamp";

/// Builder for layered configuration.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    search_from: Option<Utf8PathBuf>,
    include_user_config: bool,
    boundary_marker: Option<String>,
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Loader that reads user config and keeps project search inside the
    /// enclosing git work tree.
    pub fn new() -> Self {
        Self {
            search_from: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Search for a project config from `path` upward.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.search_from = Some(path.as_ref().to_path_buf());
        self
    }

    /// Include or skip `~/.config/gemstamp/config.<ext>`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Search no higher than the first directory containing `marker`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Search up to the filesystem root.
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Layer an explicit file on top; later files win.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Merge every source into a [`Config`].
    ///
    /// Precedence, lowest first: defaults, user config, project config,
    /// explicit files in the order added.
    #[tracing::instrument(skip(self), fields(search_from = ?self.search_from))]
    pub fn load(self) -> ConfigResult<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        let user = self
            .include_user_config
            .then(find_user_config)
            .flatten();
        let project = self
            .search_from
            .as_deref()
            .and_then(|start| self.find_project_config(start));

        for file in user.iter().chain(project.iter()).chain(&self.explicit_files) {
            tracing::debug!(%file, "merging config file");
            figment = merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            project_config = ?project,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Like [`load`](Self::load), but fails when no file exists in any layer.
    pub fn load_or_error(self) -> ConfigResult<Config> {
        let found = !self.explicit_files.is_empty()
            || (self.include_user_config && find_user_config().is_some())
            || self
                .search_from
                .as_deref()
                .and_then(|start| self.find_project_config(start))
                .is_some();
        if !found {
            return Err(ConfigError::NotFound);
        }
        self.load()
    }

    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        for dir in start.ancestors() {
            if let Some(found) = config_in_dir(dir) {
                return Some(found);
            }
            let at_boundary = self
                .boundary_marker
                .as_ref()
                .is_some_and(|marker| dir.join(marker).exists());
            if at_boundary {
                break;
            }
        }
        None
    }
}

/// `.gemstamp.<ext>` or `gemstamp.<ext>` in `dir`, dotfile first.
fn config_in_dir(dir: &Utf8Path) -> Option<Utf8PathBuf> {
    CONFIG_EXTENSIONS.iter().find_map(|ext| {
        [format!(".{APP_NAME}.{ext}"), format!("{APP_NAME}.{ext}")]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

fn find_user_config() -> Option<Utf8PathBuf> {
    let dir = user_config_dir()?;
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("config.{ext}")))
        .find(|path| path.is_file())
}

fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
    match path.extension() {
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
        Some("json") => figment.merge(Json::file_exact(path.as_str())),
        _ => figment.merge(Toml::file_exact(path.as_str())),
    }
}

/// The project config a default [`ConfigLoader`] picks for `start`: the
/// closest one above it, not looking past a directory containing `.git`.
pub fn find_project_config<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    ConfigLoader::new().find_project_config(start.as_ref())
}

/// The repository root for `start`: the closest directory holding `.git` or
/// a project config file.
pub fn find_repo_root<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    start
        .as_ref()
        .ancestors()
        .find(|dir| dir.join(".git").exists() || config_in_dir(dir).is_some())
        .map(Utf8Path::to_path_buf)
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Platform config directory (`~/.config/gemstamp/` on Linux).
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(project_dirs()?.config_dir().to_path_buf()).ok()
}

/// Platform cache directory (`~/.cache/gemstamp/` on Linux).
pub fn user_cache_dir() -> Option<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(project_dirs()?.cache_dir().to_path_buf()).ok()
}

/// Platform data directory (`~/.local/share/gemstamp/` on Linux).
pub fn user_data_dir() -> Option<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(project_dirs()?.data_dir().to_path_buf()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::try_from(path).unwrap()
    }

    fn load_file(contents: &str) -> Config {
        let tmp = TempDir::new().unwrap();
        let path = utf8(tmp.path().join("gemstamp.toml"));
        fs::write(&path, contents).unwrap();
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load()
            .unwrap()
    }

    #[test]
    fn defaults_without_files() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.packages.is_none());
    }

    #[test]
    fn default_layout() {
        let layout = Config::default().layout(Utf8Path::new("/repo"));
        assert_eq!(layout.gems_dir, "gems");
        assert_eq!(layout.gems_root, "/repo/gems");
        assert_eq!(layout.manifest_path, "/repo/services.json");
        assert_eq!(layout.apis_dir, "/repo/apis");
        assert_eq!(layout.roles, PackageRoles::default());
        assert_eq!(layout.service_prefix, "aws-sdk-");
        assert_eq!(layout.overrides, ModuleNameOverrides::default());
    }

    #[test]
    fn layout_overrides() {
        let config = load_file(
            r#"
log_level = "debug"

[packages]
gems_dir = "sdk/gems"
core = "my-core"

[manifest]
path = "build/services.json"

[manifest.module_name_overrides]
"foo/2020-01-01" = "Foo"
"#,
        );
        assert_eq!(config.log_level, LogLevel::Debug);

        let layout = config.layout(Utf8Path::new("/repo"));
        assert_eq!(layout.gems_root, "/repo/sdk/gems");
        assert_eq!(layout.roles.core, "my-core");
        assert_eq!(layout.roles.resources, "aws-sdk-resources");
        assert_eq!(layout.manifest_path, "/repo/build/services.json");
        assert_eq!(layout.overrides.len(), 1);
        assert_eq!(layout.overrides.get("foo/2020-01-01"), Some("Foo"));
    }

    #[test]
    fn registry_settings() {
        let defaults = Config::default().registry();
        assert_eq!(defaults.url, DEFAULT_REGISTRY_URL);
        assert_eq!(defaults.policy, RetryPolicy::default());
        assert_eq!(defaults.api_key_env, "RUBYGEMS_API_KEY");

        let config = load_file("[registry]\nmax_retries = 5\nmax_retry_after_secs = 30\n");
        let settings = config.registry();
        assert_eq!(settings.policy.max_retries, 5);
        assert_eq!(settings.policy.max_retry_after, Duration::from_secs(30));
    }

    #[test]
    fn yaml_and_json_formats() {
        let tmp = TempDir::new().unwrap();
        let yaml = utf8(tmp.path().join("a.yaml"));
        fs::write(&yaml, "packages:\n  service_prefix: \"my-sdk-\"\n").unwrap();
        let json = utf8(tmp.path().join("b.json"));
        fs::write(&json, r#"{"log_level": "warn"}"#).unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&yaml)
            .with_file(&json)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(
            config.layout(Utf8Path::new("/r")).service_prefix,
            "my-sdk-"
        );
    }

    #[test]
    fn later_files_win() {
        let tmp = TempDir::new().unwrap();
        let first = utf8(tmp.path().join("first.toml"));
        let second = utf8(tmp.path().join("second.toml"));
        fs::write(&first, "log_level = \"warn\"\n").unwrap();
        fs::write(&second, "log_level = \"error\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&first)
            .with_file(&second)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn project_config_found_from_subdirectory() {
        let tmp = TempDir::new().unwrap();
        let repo = utf8(tmp.path().join("repo"));
        let deep = repo.join("gems").join("aws-sdk-s3");
        fs::create_dir_all(&deep).unwrap();
        fs::write(repo.join(".gemstamp.toml"), "log_level = \"debug\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&deep)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(find_project_config(&deep), Some(repo.join(".gemstamp.toml")));
        assert_eq!(find_repo_root(&deep), Some(repo));
    }

    #[test]
    fn search_stops_at_git_boundary() {
        let tmp = TempDir::new().unwrap();
        let outer = utf8(tmp.path().join("outer"));
        let repo = outer.join("repo");
        let work = repo.join("work");
        fs::create_dir_all(&work).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(outer.join("gemstamp.toml"), "log_level = \"warn\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(&work)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(find_project_config(&work), None);
        assert_eq!(find_repo_root(&work), Some(repo));
    }

    #[test]
    fn config_beside_git_dir_is_found_from_below() {
        let tmp = TempDir::new().unwrap();
        let repo = utf8(tmp.path().join("repo"));
        let package = repo.join("gems").join("aws-sdk-s3");
        fs::create_dir_all(&package).unwrap();
        fs::create_dir(repo.join(".git")).unwrap();
        fs::write(repo.join(".gemstamp.toml"), "log_level = \"error\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_project_search(&package)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(find_project_config(&package), Some(repo.join(".gemstamp.toml")));
    }

    #[test]
    fn explicit_file_beats_project_config() {
        let tmp = TempDir::new().unwrap();
        let root = utf8(tmp.path().to_path_buf());
        fs::write(root.join(".gemstamp.toml"), "log_level = \"warn\"\n").unwrap();
        let explicit = root.join("ci.toml");
        fs::write(&explicit, "log_level = \"error\"\n").unwrap();

        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&root)
            .with_file(&explicit)
            .load()
            .unwrap();
        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn load_or_error_needs_a_file() {
        let result = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load_or_error();
        assert!(matches!(result, Err(ConfigError::NotFound)));
    }

    #[test]
    fn invalid_value_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = utf8(tmp.path().join("bad.toml"));
        fs::write(&path, "[registry]\nmax_retries = \"lots\"\n").unwrap();
        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn user_dirs_are_named_for_the_app() {
        if let Some(dir) = user_config_dir() {
            assert!(dir.as_str().contains(APP_NAME));
        }
    }
}
