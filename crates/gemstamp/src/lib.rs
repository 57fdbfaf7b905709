//! Library interface for the `gemstamp` CLI.
//!
//! The argument parser and command implementations are exposed here for
//! documentation generation and testing. The entry point is in `main.rs`.
//!
//! # Structure
//!
//! - [`Cli`] - The root argument parser (clap derive)
//! - [`Commands`] - Available subcommands
//! - [`commands`] - Command implementations
//!
//! The [`command()`] function returns the clap `Command` used by `xtask` to
//! render man pages and shell completions.

pub mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

/// Color output preference.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Detect terminal capabilities automatically.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

impl ColorChoice {
    /// Set the global color mode. Call once at startup.
    pub fn apply(self) {
        match self {
            Self::Auto => {}
            Self::Always => owo_colors::set_override(true),
            Self::Never => owo_colors::set_override(false),
        }
    }
}

const ENV_HELP: &str = "\
ENVIRONMENT VARIABLES:
    RUST_LOG             Log filter (e.g., debug, gemstamp_core=trace)
    GEMSTAMP_LOG_PATH    Explicit log file path
    GEMSTAMP_LOG_DIR     Log directory
    RUBYGEMS_API_KEY     Registry key used by `publish` (name configurable)
";

/// Command-line interface definition for gemstamp.
#[derive(Parser)]
#[command(name = "gemstamp")]
#[command(
    about = "Changelog, version, and service manifest automation for SDK releases",
    long_about = None
)]
#[command(version)]
#[command(after_long_help = ENV_HELP)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as if started in DIR
    #[arg(short = 'C', long, global = true)]
    pub chdir: Option<PathBuf>,

    /// Only print errors (suppresses warnings/info)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// More detail (repeatable; e.g. -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Colorize output
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorChoice,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands for the CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Diagnose configuration and environment
    Doctor(commands::doctor::DoctorArgs),

    /// Show the resolved repository layout
    Info(commands::info::InfoArgs),

    /// Turn changed paths into unreleased changelog entries
    Changelog(commands::changelog::ChangelogArgs),

    /// Release unreleased changelog entries under new versions
    Bump(commands::bump::BumpArgs),

    /// Maintain the service manifest
    Manifest(commands::manifest::ManifestArgs),

    /// Publish built gems the registry does not have yet
    Publish(commands::publish::PublishArgs),

    /// Show the latest published version and dependencies of packages
    Registry(commands::registry::RegistryArgs),
}

/// Returns the clap command for documentation generation
pub fn command() -> clap::Command {
    Cli::command()
}
