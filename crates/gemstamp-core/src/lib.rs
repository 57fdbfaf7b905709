//! Core library for gemstamp.
//!
//! Release automation for a repository of many independently versioned
//! packages that share a generated API catalog. The `gemstamp` CLI is a thin
//! display layer over this crate.
//!
//! # Modules
//!
//! - [`version`] - Package versions with pre-release labels
//! - [`changelog`] - Per-package Markdown changelogs
//! - [`classify`] - Changed paths to release-note entries
//! - [`bump`] - Version bumps driven by unreleased entries
//! - [`manifest`] - Service manifest reconciliation
//! - [`registry`] - Package registry client with rate-limit retry
//! - [`git`] - Diffs for content-level classification
//! - [`config`] - Configuration loading and management
//! - [`error`] - Error types and result aliases
//!
//! # Quick Start
//!
//! ```no_run
//! use camino::Utf8Path;
//! use gemstamp_core::ConfigLoader;
//! use gemstamp_core::bump::{BumpRequest, run_bumps};
//!
//! let root = Utf8Path::new(".");
//! let config = ConfigLoader::new()
//!     .with_project_search(root)
//!     .load()
//!     .expect("Failed to load configuration");
//! let layout = config.layout(root);
//!
//! let outcomes = run_bumps(&BumpRequest {
//!     gems_root: layout.gems_root,
//!     dry_run: true,
//!     ..BumpRequest::default()
//! })
//! .expect("bump failed");
//! println!("{} packages checked", outcomes.len());
//! ```
#![deny(unsafe_code)]

pub mod bump;

pub mod changelog;

pub mod classify;

pub mod config;

pub mod error;

pub mod git;

pub mod manifest;

pub mod registry;

pub mod version;

pub use config::{Config, ConfigLoader, Layout, LogLevel, RegistrySettings};

pub use error::{ConfigError, ConfigResult};

pub use version::ReleaseVersion;

// Re-export semver so downstream crates don't need a direct dependency.
pub use semver;
