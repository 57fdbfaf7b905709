//! Package registry client.
//!
//! [`RegistryClient`] is the seam the publish workflow works against;
//! [`RubyGemsClient`] talks to the RubyGems HTTP API. Every request goes
//! through [`send_with_retry`]: HTTP 429 is retried after the server's
//! `Retry-After` delay, a small number of times, and everything else other
//! than 200 is fatal.

use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::version::ReleaseVersion;

/// Default registry base URL.
pub const DEFAULT_REGISTRY_URL: &str = "https://rubygems.org";

/// Errors from registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry asked us to slow down.
    #[error("too many requests, retryable after {retry_after} seconds")]
    RateLimited {
        /// Seconds the server asked us to wait.
        retry_after: u64,
    },

    /// Still rate limited after the retry budget was spent.
    #[error("too many requests, gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Requests made.
        attempts: u32,
    },

    /// The server asked for a longer wait than we are willing to sleep.
    #[error("too many requests, unable to retry (retry-after: {retry_after}s exceeds {ceiling}s)")]
    RetryAfterTooLong {
        /// Seconds the server asked us to wait.
        retry_after: u64,
        /// Longest wait allowed.
        ceiling: u64,
    },

    /// Non-retryable HTTP status.
    #[error("unexpected {status} response from {operation}\n{body}")]
    Status {
        /// What was being attempted.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Connection, TLS, or protocol failure.
    #[error("request to {operation} failed: {message}")]
    Transport {
        /// What was being attempted.
        operation: String,
        /// Transport error details.
        message: String,
    },

    /// A response body could not be decoded.
    #[error("invalid response from {operation}: {source}")]
    Decode {
        /// What was being attempted.
        operation: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// The publish credential is not set.
    #[error("registry API key not set (expected in ${0})")]
    MissingApiKey(String),

    /// An artifact file name is not `<name>-<version>.gem`.
    #[error("artifact name {0:?} is not <name>-<version>.gem")]
    InvalidArtifactName(String),

    /// Reading an artifact failed.
    #[error("{path}: {source}")]
    Io {
        /// File involved.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Whether the request may succeed if repeated.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

// ──────────────────────────────────────────────
// Retry
// ──────────────────────────────────────────────

/// Rate-limit retry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Longest `Retry-After` we will sleep for.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_retry_after: Duration::from_secs(600),
        }
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` seconds, if present.
    pub retry_after: Option<u64>,
    /// Response body.
    pub body: String,
}

impl Reply {
    /// Body of a 200, [`RegistryError::RateLimited`] for a 429, otherwise a
    /// fatal [`RegistryError::Status`].
    pub fn into_result(self, operation: &str) -> RegistryResult<String> {
        match self.status {
            200 => Ok(self.body),
            429 => Err(RegistryError::RateLimited {
                retry_after: self.retry_after.unwrap_or(0),
            }),
            status => Err(RegistryError::Status {
                operation: operation.to_string(),
                status,
                body: self.body,
            }),
        }
    }
}

/// Send a request until it succeeds, retrying only on rate limiting.
///
/// `sleep` is called with the server-advised delay before each retry.
#[instrument(skip(policy, sleep, send))]
pub fn send_with_retry(
    operation: &str,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
    mut send: impl FnMut() -> RegistryResult<Reply>,
) -> RegistryResult<String> {
    let ceiling = policy.max_retry_after.as_secs();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match send()?.into_result(operation) {
            Err(RegistryError::RateLimited { retry_after }) => {
                if retry_after > ceiling {
                    return Err(RegistryError::RetryAfterTooLong {
                        retry_after,
                        ceiling,
                    });
                }
                if attempts > policy.max_retries {
                    return Err(RegistryError::RetriesExhausted { attempts });
                }
                warn!(attempt = attempts, retry_after, "rate limited, retrying");
                sleep(Duration::from_secs(retry_after));
            }
            other => {
                debug!(attempts, ok = other.is_ok(), "request finished");
                return other;
            }
        }
    }
}

// ──────────────────────────────────────────────
// Client
// ──────────────────────────────────────────────

/// One dependency of a published package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name.
    pub name: String,
    /// Version requirement, e.g. `~> 3`.
    pub requirements: String,
}

/// Dependency metadata of a published package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Runtime dependencies.
    #[serde(default)]
    pub runtime: Vec<Dependency>,
    /// Development dependencies.
    #[serde(default)]
    pub development: Vec<Dependency>,
}

/// Registry operations used by the publish workflow.
pub trait RegistryClient {
    /// Latest published version of `package`, as the registry reports it.
    fn latest_version(&self, package: &str) -> RegistryResult<String>;

    /// Dependency metadata of the latest release of `package`.
    fn dependencies(&self, package: &str) -> RegistryResult<Dependencies>;

    /// Upload an artifact. Returns the registry's response text.
    fn publish(&self, artifact: &Utf8Path) -> RegistryResult<String>;
}

/// [`RegistryClient`] for the RubyGems HTTP API.
#[derive(Debug, Clone)]
pub struct RubyGemsClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
    policy: RetryPolicy,
}

#[derive(Deserialize)]
struct LatestVersion {
    version: String,
}

#[derive(Deserialize)]
struct GemInfo {
    #[serde(default)]
    dependencies: Dependencies,
}

impl RubyGemsClient {
    /// Client for `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(300))
                .build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            api_key_env: "RUBYGEMS_API_KEY".into(),
            policy,
        }
    }

    /// Set the key sent with publish requests.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Read the publish key from the environment variable `var`, if set.
    #[must_use]
    pub fn with_api_key_from_env(mut self, var: &str) -> Self {
        self.api_key = std::env::var(var).ok().filter(|k| !k.is_empty());
        self.api_key_env = var.to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn execute(
        &self,
        operation: &str,
        request: impl Fn() -> Result<ureq::Response, ureq::Error>,
    ) -> RegistryResult<String> {
        send_with_retry(operation, &self.policy, thread::sleep, || {
            let response = match request() {
                Ok(response) => response,
                Err(ureq::Error::Status(_, response)) => response,
                Err(ureq::Error::Transport(transport)) => {
                    return Err(RegistryError::Transport {
                        operation: operation.to_string(),
                        message: transport.to_string(),
                    });
                }
            };
            let status = response.status();
            let retry_after = response
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response
                .into_string()
                .map_err(|e| RegistryError::Transport {
                    operation: operation.to_string(),
                    message: e.to_string(),
                })?;
            Ok(Reply {
                status,
                retry_after,
                body,
            })
        })
    }

    fn decode<T: DeserializeOwned>(operation: &str, body: &str) -> RegistryResult<T> {
        serde_json::from_str(body).map_err(|source| RegistryError::Decode {
            operation: operation.to_string(),
            source,
        })
    }
}

impl RegistryClient for RubyGemsClient {
    #[instrument(skip(self), fields(registry = %self.base_url))]
    fn latest_version(&self, package: &str) -> RegistryResult<String> {
        let operation = format!("get latest version of {package}");
        let url = self.url(&format!("/api/v1/versions/{package}/latest.json"));
        let body = self.execute(&operation, || self.agent.get(&url).call())?;
        let latest: LatestVersion = Self::decode(&operation, &body)?;
        debug!(version = %latest.version, "latest version resolved");
        Ok(latest.version)
    }

    #[instrument(skip(self), fields(registry = %self.base_url))]
    fn dependencies(&self, package: &str) -> RegistryResult<Dependencies> {
        let operation = format!("get dependencies of {package}");
        let url = self.url(&format!("/api/v1/gems/{package}.json"));
        let body = self.execute(&operation, || self.agent.get(&url).call())?;
        let info: GemInfo = Self::decode(&operation, &body)?;
        Ok(info.dependencies)
    }

    #[instrument(skip(self), fields(registry = %self.base_url, %artifact))]
    fn publish(&self, artifact: &Utf8Path) -> RegistryResult<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RegistryError::MissingApiKey(self.api_key_env.clone()))?;
        let bytes = std::fs::read(artifact).map_err(|source| RegistryError::Io {
            path: artifact.to_path_buf(),
            source,
        })?;
        let operation = format!("publish {}", artifact.file_name().unwrap_or(artifact.as_str()));
        let url = self.url("/api/v1/gems");
        let body = self.execute(&operation, || {
            self.agent
                .post(&url)
                .set("Authorization", key)
                .set("Content-Type", "application/octet-stream")
                .send_bytes(&bytes)
        })?;
        info!(size = bytes.len(), "artifact published");
        Ok(body)
    }
}

// ──────────────────────────────────────────────
// Publish gating
// ──────────────────────────────────────────────

/// Whether `release` should be published over the registry's `current`.
///
/// A package with no published version (absent or `unknown`) is always new.
/// Otherwise the numeric triples are compared; labels are ignored.
pub fn is_new_version(current: Option<&str>, release: &str) -> bool {
    let Some(current) = current.filter(|c| *c != "unknown") else {
        return true;
    };
    if current == release {
        return false;
    }
    numeric_core(current) < numeric_core(release)
}

/// Numeric core of a version string; registry text that does not parse as a
/// package version contributes the leading digits of its first three parts.
fn numeric_core(version: &str) -> semver::Version {
    if let Ok(parsed) = ReleaseVersion::parse(version) {
        return parsed.core();
    }
    let mut triple = [0; 3];
    for (slot, part) in triple.iter_mut().zip(version.split('.')) {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        *slot = digits.parse().unwrap_or(0);
    }
    semver::Version::new(triple[0], triple[1], triple[2])
}

/// A built package file named `<name>-<version>.gem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GemArtifact {
    /// Path to the file.
    pub path: Utf8PathBuf,
    /// Package name.
    pub name: String,
    /// Package version.
    pub version: ReleaseVersion,
}

impl GemArtifact {
    /// Parse the package name and version from an artifact path.
    pub fn from_path(path: &Utf8Path) -> RegistryResult<Self> {
        let invalid = || RegistryError::InvalidArtifactName(path.to_string());
        let stem = path
            .file_name()
            .and_then(|f| f.strip_suffix(".gem"))
            .ok_or_else(invalid)?;
        let (name, version) = stem.rsplit_once('-').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        let version = ReleaseVersion::parse(version).map_err(|_| invalid())?;
        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            version,
        })
    }
}

/// What happened to one artifact in a publish run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Package name.
    pub package: String,
    /// Version in the artifact.
    pub version: String,
    /// Version the registry reported before publishing.
    pub registry_version: String,
    /// Whether the artifact was uploaded.
    pub published: bool,
}

/// Publish an artifact unless the registry already has that version or newer.
///
/// With `dry_run`, the registry is queried but nothing is uploaded.
#[instrument(skip(client), fields(path = %artifact.path))]
pub fn publish_if_new(
    client: &impl RegistryClient,
    artifact: &GemArtifact,
    dry_run: bool,
) -> RegistryResult<PublishOutcome> {
    let registry_version = client.latest_version(&artifact.name)?;
    let version = artifact.version.to_string();
    let newer = is_new_version(Some(&registry_version), &version);
    let published = newer && !dry_run;
    if published {
        client.publish(&artifact.path)?;
    } else {
        info!(package = %artifact.name, %version, %registry_version, newer, "publish skipped");
    }
    Ok(PublishOutcome {
        package: artifact.name.clone(),
        version,
        registry_version,
        published,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn reply(status: u16, retry_after: Option<u64>, body: &str) -> Reply {
        Reply {
            status,
            retry_after,
            body: body.into(),
        }
    }

    #[test]
    fn success_on_first_try() {
        let mut sleeps = Vec::new();
        let body = send_with_retry("op", &RetryPolicy::default(), |d| sleeps.push(d), || {
            Ok(reply(200, None, "ok"))
        })
        .unwrap();
        assert_eq!(body, "ok");
        assert!(sleeps.is_empty());
    }

    #[test]
    fn rate_limit_retries_with_advised_delay() {
        let mut replies = vec![reply(200, None, "done"), reply(429, Some(3), ""), reply(429, None, "")];
        let mut sleeps = Vec::new();
        let body = send_with_retry("op", &RetryPolicy::default(), |d| sleeps.push(d), || {
            Ok(replies.pop().unwrap())
        })
        .unwrap();
        assert_eq!(body, "done");
        assert_eq!(sleeps, vec![Duration::from_secs(0), Duration::from_secs(3)]);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let attempts = RefCell::new(0);
        let err = send_with_retry("op", &RetryPolicy::default(), |_| {}, || {
            *attempts.borrow_mut() += 1;
            Ok(reply(429, Some(1), ""))
        })
        .unwrap_err();
        assert!(matches!(err, RegistryError::RetriesExhausted { attempts: 3 }));
        assert_eq!(*attempts.borrow(), 3);
    }

    #[test]
    fn excessive_retry_after_is_fatal() {
        let mut sleeps = Vec::new();
        let err = send_with_retry("op", &RetryPolicy::default(), |d| sleeps.push(d), || {
            Ok(reply(429, Some(601), ""))
        })
        .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RetryAfterTooLong { retry_after: 601, ceiling: 600 }
        ));
        assert!(sleeps.is_empty());
    }

    #[test]
    fn other_status_is_fatal_with_body() {
        let err = send_with_retry("publish x", &RetryPolicy::default(), |_| {}, || {
            Ok(reply(500, None, "boom"))
        })
        .unwrap_err();
        assert!(!err.is_retryable());
        match err {
            RegistryError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn new_version_rules() {
        assert!(is_new_version(None, "1.0.0"));
        assert!(is_new_version(Some("unknown"), "1.0.0"));
        assert!(!is_new_version(Some("1.2.3"), "1.2.3"));
        assert!(is_new_version(Some("1.2.3"), "1.3.0"));
        assert!(is_new_version(Some("1.2.3"), "2.0.0"));
        assert!(!is_new_version(Some("1.10.0"), "1.9.0"));
        assert!(!is_new_version(Some("1.0.0.rc1"), "1.0.0.rc2"));
        assert!(is_new_version(Some("1.0.0.rc1"), "1.1.0"));
        assert!(is_new_version(Some("1.2"), "1.2.1"));
    }

    #[test]
    fn artifact_names() {
        let artifact = GemArtifact::from_path(Utf8Path::new("pkg/aws-sdk-s3-1.42.0.gem")).unwrap();
        assert_eq!(artifact.name, "aws-sdk-s3");
        assert_eq!(artifact.version.to_string(), "1.42.0");

        let labeled =
            GemArtifact::from_path(Utf8Path::new("aws-sdk-core-3.0.0.rc2.gem")).unwrap();
        assert_eq!(labeled.name, "aws-sdk-core");
        assert_eq!(labeled.version.to_string(), "3.0.0.rc2");

        assert!(GemArtifact::from_path(Utf8Path::new("aws-sdk-s3.gem")).is_err());
        assert!(GemArtifact::from_path(Utf8Path::new("aws-sdk-s3-1.0.0.tar.gz")).is_err());
    }

    struct FakeRegistry {
        latest: String,
        published: RefCell<Vec<Utf8PathBuf>>,
    }

    impl RegistryClient for FakeRegistry {
        fn latest_version(&self, _package: &str) -> RegistryResult<String> {
            Ok(self.latest.clone())
        }

        fn dependencies(&self, _package: &str) -> RegistryResult<Dependencies> {
            Ok(Dependencies::default())
        }

        fn publish(&self, artifact: &Utf8Path) -> RegistryResult<String> {
            self.published.borrow_mut().push(artifact.to_path_buf());
            Ok("Successfully registered gem".into())
        }
    }

    #[test]
    fn publish_skips_versions_already_released() {
        let registry = FakeRegistry {
            latest: "1.42.0".into(),
            published: RefCell::new(Vec::new()),
        };
        let same = GemArtifact::from_path(Utf8Path::new("aws-sdk-s3-1.42.0.gem")).unwrap();
        let newer = GemArtifact::from_path(Utf8Path::new("aws-sdk-s3-1.43.0.gem")).unwrap();

        assert!(!publish_if_new(&registry, &same, false).unwrap().published);
        assert!(!publish_if_new(&registry, &newer, true).unwrap().published);
        assert!(registry.published.borrow().is_empty());

        let outcome = publish_if_new(&registry, &newer, false).unwrap();
        assert!(outcome.published);
        assert_eq!(outcome.registry_version, "1.42.0");
        assert_eq!(registry.published.borrow().len(), 1);
    }

    #[test]
    fn dependencies_decode() {
        let info: GemInfo = serde_json::from_str(
            r#"{"name":"aws-sdk-s3","dependencies":{"development":[],"runtime":[{"name":"aws-sdk-core","requirements":"~> 3, >= 3.1"}]}}"#,
        )
        .unwrap();
        assert_eq!(info.dependencies.runtime[0].name, "aws-sdk-core");
        assert!(info.dependencies.development.is_empty());
    }
}
