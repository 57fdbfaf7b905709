//! Manifest command: reconcile the service manifest with the API definitions.

use anyhow::{Context, bail};
use camino::Utf8Path;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use gemstamp_core::config::{Config, Layout};
use gemstamp_core::manifest::{ManifestReconciler, ReconcileReport};

/// Arguments for the `manifest` subcommand.
#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Manifest operation
    #[command(subcommand)]
    pub action: ManifestAction,
}

/// Manifest operations.
#[derive(Subcommand, Debug)]
pub enum ManifestAction {
    /// Point every service at its newest API definition folder
    Sync {
        /// Show the changes without rewriting the manifest
        #[arg(long)]
        dry_run: bool,
    },

    /// Pin a service to the released version of a dependency package
    Dependency {
        /// Service module name as it appears in the manifest
        #[arg(value_name = "MODULE")]
        module_name: String,

        /// Dependency packages whose VERSION is pinned
        #[arg(value_name = "PACKAGE", required = true)]
        packages: Vec<String>,
    },

    /// Append hand-written release notes to a service's changelog
    Notes {
        /// Model folder, e.g. `s3/2006-03-01`
        #[arg(value_name = "MODEL")]
        model: String,

        /// Release notes text
        #[arg(value_name = "NOTES")]
        notes: String,
    },
}

#[derive(Serialize)]
struct SyncReport<'a> {
    manifest: &'a Utf8Path,
    dry_run: bool,
    #[serde(flatten)]
    report: &'a ReconcileReport,
}

#[derive(Serialize)]
struct PinnedDependency {
    module_name: String,
    package: String,
    constraint: String,
}

/// Execute the manifest command.
#[instrument(name = "cmd_manifest", skip_all, fields(json_output))]
pub fn cmd_manifest(
    args: ManifestArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, action = ?args.action, "executing manifest command");

    let layout = super::resolve_layout(config, cwd);
    let reconciler = ManifestReconciler::new(
        &layout.apis_dir,
        &layout.manifest_path,
        layout.overrides.clone(),
    );

    match args.action {
        ManifestAction::Sync { dry_run } => sync(&reconciler, &layout, dry_run, global_json),
        ManifestAction::Dependency {
            module_name,
            packages,
        } => pin_dependencies(&reconciler, &layout, module_name, packages, global_json),
        ManifestAction::Notes { model, notes } => {
            record_notes(&reconciler, &layout, &model, &notes, global_json)
        }
    }
}

fn sync(
    reconciler: &ManifestReconciler,
    layout: &Layout,
    dry_run: bool,
    global_json: bool,
) -> anyhow::Result<()> {
    let spinner = super::spinner("Scanning API definitions...", global_json);
    let result = if dry_run {
        reconciler.plan().map(|(_, report)| report)
    } else {
        reconciler.run()
    };
    spinner.finish_and_clear();
    let report = result.context("manifest sync failed")?;

    if global_json {
        let output = SyncReport {
            manifest: &layout.manifest_path,
            dry_run,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "Service manifest".bold().underline());
    println!("  {}: {}", "File".dimmed(), layout.manifest_path.cyan());
    for module_name in &report.added {
        println!("  {} added {}", "✓".green(), module_name.cyan());
    }
    for (module_name, models) in &report.updated {
        println!("  {} {} → {}", "✓".green(), module_name.cyan(), models.dimmed());
    }
    if report.has_changes() {
        println!("  {} {} unchanged", "○".dimmed(), report.unchanged);
    } else {
        println!("  {} Up to date ({} services)", "○".yellow(), report.unchanged);
    }
    if dry_run {
        println!();
        println!("{}", "Dry run: manifest not rewritten.".yellow());
    }
    Ok(())
}

fn pin_dependencies(
    reconciler: &ManifestReconciler,
    layout: &Layout,
    module_name: String,
    packages: Vec<String>,
    global_json: bool,
) -> anyhow::Result<()> {
    if packages.is_empty() {
        bail!("at least one dependency package is required");
    }
    let pairs: Vec<(String, String)> = packages
        .into_iter()
        .map(|package| (module_name.clone(), package))
        .collect();
    let pinned = reconciler
        .update_dependencies(&pairs, &layout.gems_root)
        .context("dependency update failed")?;

    if global_json {
        let pinned: Vec<PinnedDependency> = pinned
            .into_iter()
            .map(|(module_name, package, constraint)| PinnedDependency {
                module_name,
                package,
                constraint,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&pinned)?);
        return Ok(());
    }

    for (module_name, package, constraint) in &pinned {
        println!(
            "  {} {}: {} {}",
            "✓".green(),
            module_name.cyan(),
            package,
            constraint.green().bold()
        );
    }
    Ok(())
}

fn record_notes(
    reconciler: &ManifestReconciler,
    layout: &Layout,
    model: &str,
    notes: &str,
    global_json: bool,
) -> anyhow::Result<()> {
    let written = reconciler
        .record_service_notes(model, notes, &layout.gems_root, &layout.service_prefix)
        .with_context(|| format!("failed to record notes for {model}"))?;

    if global_json {
        let output = serde_json::json!({
            "model": model,
            "changelog": written,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match written {
        Some(path) => println!("  {} Notes added to {}", "✓".green(), path.cyan()),
        None => println!("  {} No notes recorded", "○".yellow()),
    }
    Ok(())
}
