//! Doctor command: diagnose configuration and environment.

use camino::Utf8Path;
use clap::Args;
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use gemstamp_core::config::{self, Config};
use gemstamp_core::git;

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct DoctorReport {
    directories: DirectoryPaths,
    config: ConfigStatus,
    repository: RepositoryStatus,
    environment: EnvironmentInfo,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    cache: Option<String>,
    data: Option<String>,
}

#[derive(Serialize)]
struct ConfigStatus {
    /// Path to the project config file, if any
    file: Option<String>,
    found: bool,
}

#[derive(Serialize)]
struct RepositoryStatus {
    root: String,
    git_available: bool,
    inside_work_tree: bool,
    gems_dir_exists: bool,
    manifest_exists: bool,
    apis_dir_exists: bool,
    /// Whether the registry key variable is set; its value is never reported.
    api_key_set: bool,
    api_key_env: String,
}

#[derive(Serialize)]
struct EnvironmentInfo {
    cwd: Option<String>,
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    value: Option<String>,
    description: &'static str,
}

fn env_var(name: &'static str, description: &'static str) -> EnvVar {
    EnvVar {
        name,
        value: std::env::var(name).ok(),
        description,
    }
}

impl DoctorReport {
    fn gather(config: &Config, cwd: &Utf8Path) -> Self {
        let config_file = config::find_project_config(cwd);
        let layout = super::resolve_layout(config, cwd);
        let registry = config.registry();
        let git_available = git::git_available();

        Self {
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                cache: config::user_cache_dir().map(|p| p.to_string()),
                data: config::user_data_dir().map(|p| p.to_string()),
            },
            config: ConfigStatus {
                found: config_file.is_some(),
                file: config_file.map(|p| p.to_string()),
            },
            repository: RepositoryStatus {
                inside_work_tree: git_available
                    && git::is_inside_repo(&layout.root).unwrap_or(false),
                git_available,
                gems_dir_exists: layout.gems_root.is_dir(),
                manifest_exists: layout.manifest_path.is_file(),
                apis_dir_exists: layout.apis_dir.is_dir(),
                api_key_set: std::env::var(&registry.api_key_env).is_ok_and(|v| !v.is_empty()),
                api_key_env: registry.api_key_env,
                root: layout.root.to_string(),
            },
            environment: EnvironmentInfo {
                cwd: Some(cwd.to_string()),
                env_vars: vec![
                    env_var("XDG_CONFIG_HOME", "Override config directory"),
                    env_var("XDG_CACHE_HOME", "Override cache directory"),
                    env_var("XDG_DATA_HOME", "Override data directory"),
                    env_var("RUST_LOG", "Log filter directive"),
                    env_var("GEMSTAMP_LOG_PATH", "Explicit log file path"),
                    env_var("GEMSTAMP_LOG_DIR", "Log directory"),
                ],
            },
        }
    }
}

/// Run diagnostics and report configuration status.
#[instrument(name = "cmd_doctor", skip_all, fields(json_output))]
pub fn cmd_doctor(
    _args: DoctorArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing doctor command");

    let spinner = super::spinner("Gathering diagnostics...", global_json);
    let report = DoctorReport::gather(config, cwd);
    spinner.finish_and_clear();

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Configuration".bold().underline());
    if report.config.found {
        println!(
            "  {} Config file: {}",
            "✓".green(),
            report.config.file.as_deref().unwrap_or("").cyan()
        );
    } else {
        println!("  {} No config file found", "○".yellow());
        offer_config_creation()?;
    }
    println!();

    let repo = &report.repository;
    println!("{}", "Repository".bold().underline());
    println!("  {}: {}", "Root".dimmed(), repo.root.cyan());
    check("git on PATH", repo.git_available);
    check("Inside a git work tree", repo.inside_work_tree);
    check("Gems directory present", repo.gems_dir_exists);
    check("Service manifest present", repo.manifest_exists);
    check("API definitions present", repo.apis_dir_exists);
    check(&format!("{} set", repo.api_key_env), repo.api_key_set);
    println!();

    println!("{}", "Directories".bold().underline());
    print_dir("  Config", report.directories.config.as_deref());
    print_dir("  Cache", report.directories.cache.as_deref());
    print_dir("  Data", report.directories.data.as_deref());
    println!();

    println!("{}", "Environment".bold().underline());
    println!("  {}: {}", "Working directory".dimmed(), cwd.cyan());
    let set_vars: Vec<_> = report
        .environment
        .env_vars
        .iter()
        .filter(|v| v.value.is_some())
        .collect();
    if set_vars.is_empty() {
        println!("  {} No XDG/logging overrides set", "○".dimmed());
    } else {
        for var in set_vars {
            println!(
                "  {}: {}",
                var.name.dimmed(),
                var.value.as_deref().unwrap_or("").cyan()
            );
        }
    }

    Ok(())
}

fn check(label: &str, ok: bool) {
    if ok {
        println!("  {} {label}", "✓".green());
    } else {
        println!("  {} {label}", "○".yellow());
    }
}

fn print_dir(label: &str, path: Option<&str>) {
    print!("{}: ", label.dimmed());
    match path {
        Some(p) => println!("{}", p.cyan()),
        None => println!("{}", "(unavailable)".yellow()),
    }
}

/// Offer to create a default config file when none exists.
fn offer_config_creation() -> anyhow::Result<()> {
    let Some(config_dir) = config::user_config_dir() else {
        return Ok(());
    };
    let config_path = config_dir.join("config.yaml");

    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) || config_path.exists() {
        return Ok(());
    }

    let create = Confirm::new("Create a default config file?")
        .with_default(false)
        .with_help_message(&format!("Will create {config_path}"))
        .prompt();

    // Declined or interrupted prompts leave the filesystem alone.
    if let Ok(true) = create {
        std::fs::create_dir_all(&config_dir)?;
        let yaml = serde_saphyr::to_string(&Config::default())?;
        std::fs::write(&config_path, yaml)?;
        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }
    Ok(())
}
