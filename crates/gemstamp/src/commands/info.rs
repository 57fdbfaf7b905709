//! Info command: show the resolved configuration and repository layout.

use camino::Utf8Path;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use gemstamp_core::bump;
use gemstamp_core::config::{self, Config, Layout};

/// Arguments for the `info` subcommand.
#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct PackageInfo {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    license: &'static str,
}

impl PackageInfo {
    const fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            license: env!("CARGO_PKG_LICENSE"),
        }
    }
}

#[derive(Serialize)]
struct ConfigInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    config_file: Option<String>,
    log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_dir: Option<String>,
    registry: String,
}

impl ConfigInfo {
    fn from_config(config: &Config, cwd: &Utf8Path) -> Self {
        Self {
            config_file: config::find_project_config(cwd).map(|p| p.to_string()),
            log_level: config.log_level.as_str().to_string(),
            log_dir: config.log_dir.as_ref().map(|p| p.to_string()),
            registry: config.registry().url,
        }
    }
}

#[derive(Serialize)]
struct RepositoryInfo {
    #[serde(flatten)]
    layout: Layout,
    manifest_exists: bool,
    /// `None` when the gems directory cannot be read.
    packages: Option<usize>,
}

impl RepositoryInfo {
    fn gather(layout: Layout) -> Self {
        let packages = bump::discover_packages(&layout.gems_root)
            .ok()
            .map(|found| found.len());
        Self {
            manifest_exists: layout.manifest_path.is_file(),
            packages,
            layout,
        }
    }
}

#[derive(Serialize)]
struct FullInfo {
    #[serde(flatten)]
    package: PackageInfo,
    config: ConfigInfo,
    repository: RepositoryInfo,
}

/// Print tool, configuration, and repository information.
#[instrument(name = "cmd_info", skip_all, fields(json_output))]
pub fn cmd_info(
    _args: InfoArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing info command");

    let info = FullInfo {
        package: PackageInfo::new(),
        config: ConfigInfo::from_config(config, cwd),
        repository: RepositoryInfo::gather(super::resolve_layout(config, cwd)),
    };

    if global_json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{} {}", info.package.name.bold(), info.package.version.green());
    if !info.package.description.is_empty() {
        println!("{}", info.package.description);
    }
    if !info.package.license.is_empty() {
        println!("{}: {}", "License".dimmed(), info.package.license);
    }

    println!();
    println!("{}", "Configuration".bold().underline());
    match info.config.config_file {
        Some(ref path) => println!("{}: {}", "Config file".dimmed(), path.cyan()),
        None => println!("{}: {}", "Config file".dimmed(), "none loaded".yellow()),
    }
    println!("{}: {}", "Log level".dimmed(), info.config.log_level);
    if let Some(ref dir) = info.config.log_dir {
        println!("{}: {}", "Log directory".dimmed(), dir);
    }
    println!("{}: {}", "Registry".dimmed(), info.config.registry.cyan());

    let repo = &info.repository;
    println!();
    println!("{}", "Repository".bold().underline());
    println!("{}: {}", "Root".dimmed(), repo.layout.root.cyan());
    match repo.packages {
        Some(count) => println!(
            "{}: {} ({count} packages)",
            "Gems".dimmed(),
            repo.layout.gems_root.cyan()
        ),
        None => println!(
            "{}: {} {}",
            "Gems".dimmed(),
            repo.layout.gems_root.cyan(),
            "(missing)".yellow()
        ),
    }
    let manifest_note = if repo.manifest_exists {
        String::new()
    } else {
        format!(" {}", "(missing)".yellow())
    };
    println!(
        "{}: {}{manifest_note}",
        "Manifest".dimmed(),
        repo.layout.manifest_path.cyan()
    );
    println!("{}: {}", "API definitions".dimmed(), repo.layout.apis_dir.cyan());
    println!(
        "{}: core {}, resources {}, partitions {}",
        "Package roles".dimmed(),
        repo.layout.roles.core.cyan(),
        repo.layout.roles.resources.cyan(),
        repo.layout.roles.partitions.cyan()
    );

    Ok(())
}
