//! Bump command: thin CLI layer over `gemstamp_core::bump`.

use std::collections::BTreeSet;

use anyhow::{Context, bail};
use camino::Utf8Path;
use clap::Args;
use inquire::Confirm;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use gemstamp_core::bump::{self, BumpMode, BumpOutcome, BumpRequest};
use gemstamp_core::config::Config;

/// Arguments for the `bump` subcommand.
#[derive(Args, Debug, Default)]
pub struct BumpArgs {
    /// Packages to bump (default: every package with a VERSION file)
    #[arg(value_name = "PACKAGE")]
    pub packages: Vec<String>,

    /// Package released for the first time; its declared version is kept (repeatable)
    #[arg(long = "new-service", value_name = "PACKAGE")]
    pub new_services: Vec<String>,

    /// Promote the named pre-release packages to their first stable release
    #[arg(long, requires = "packages")]
    pub ga: bool,

    /// Skip the confirmation prompt for --ga
    #[arg(short, long)]
    pub yes: bool,

    /// Run without making changes (show what would happen)
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the bump command.
#[instrument(name = "cmd_bump", skip_all, fields(json_output))]
pub fn cmd_bump(
    args: BumpArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, ga = args.ga, dry_run = args.dry_run, "executing bump command");

    if args.ga && args.packages.is_empty() {
        bail!("--ga needs the packages to promote named explicitly");
    }

    let layout = super::resolve_layout(config, cwd);
    let mode = if args.ga { BumpMode::Ga } else { BumpMode::Update };
    let mut request = BumpRequest {
        gems_root: layout.gems_root,
        packages: args.packages,
        new_services: args.new_services.into_iter().collect::<BTreeSet<_>>(),
        mode,
        dry_run: true,
    };

    // Always plan first; GA promotion is confirmed against the plan.
    let planned = bump::run_bumps(&request).context("bump planning failed")?;
    if args.dry_run {
        return report(&planned, global_json, true);
    }
    if mode == BumpMode::Ga && !args.yes && !global_json && !confirm_ga(&planned)? {
        println!("{}", "Cancelled.".yellow());
        return Ok(());
    }

    request.dry_run = false;
    let outcomes = bump::run_bumps(&request).context("bump failed")?;
    report(&outcomes, global_json, false)
}

fn confirm_ga(planned: &[BumpOutcome]) -> anyhow::Result<bool> {
    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Ok(true);
    }
    let packages = planned.iter().filter(|o| o.bump.is_some()).count();
    let answer = Confirm::new(&format!("Promote {packages} package(s) to GA?"))
        .with_default(false)
        .prompt();
    Ok(answer.unwrap_or(false))
}

fn report(outcomes: &[BumpOutcome], global_json: bool, dry_run: bool) -> anyhow::Result<()> {
    if global_json {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
        return Ok(());
    }

    println!("{}", "Versions".bold().underline());
    for outcome in outcomes {
        match outcome.bump {
            Some(ref plan) => {
                let marker = if outcome.written {
                    "✓".green().to_string()
                } else {
                    "→".dimmed().to_string()
                };
                let note = if plan.new_service {
                    " (new service)".dimmed().to_string()
                } else {
                    String::new()
                };
                println!(
                    "  {marker} {}: {} → {}{note} {}",
                    outcome.package.cyan(),
                    plan.previous.to_string().dimmed(),
                    plan.next.to_string().green().bold(),
                    format!("[{} entries]", plan.entries).dimmed()
                );
            }
            None => println!(
                "  {} {}: {}",
                "○".yellow(),
                outcome.package.cyan(),
                "no unreleased changes".dimmed()
            ),
        }
    }

    if dry_run {
        println!();
        println!("{}", "Dry run: no changes made.".yellow());
    }
    Ok(())
}
