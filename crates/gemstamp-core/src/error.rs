//! Error types shared across gemstamp-core.
//!
//! Each module owns its error enum; they are re-exported here so callers
//! can name them from one place.

use thiserror::Error;

pub use crate::bump::{BumpError, BumpResult};
pub use crate::changelog::{ChangelogError, ChangelogResult};
pub use crate::classify::{ClassifyError, ClassifyResult};
pub use crate::git::{GitError, GitResult};
pub use crate::manifest::{ManifestError, ManifestResult};
pub use crate::registry::{RegistryError, RegistryResult};
pub use crate::version::{VersionError, VersionResult};

/// Errors that can occur when working with configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("invalid configuration: {0}")]
    Deserialize(#[from] Box<figment::Error>),

    /// Configuration file not found after searching all locations.
    #[error("no configuration file found")]
    NotFound,
}

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;
