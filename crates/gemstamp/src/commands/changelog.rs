//! Changelog command: classify changed paths and record unreleased entries.

use std::io::Read;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use gemstamp_core::classify::{self, ChangeSet, Classification, Classifier};
use gemstamp_core::config::Config;
use gemstamp_core::git::GitDiff;

/// Arguments for the `changelog` subcommand.
#[derive(Args, Debug, Default)]
pub struct ChangelogArgs {
    /// File listing changed paths, one per line (reads stdin when omitted or `-`)
    #[arg(value_name = "FILE")]
    pub changes: Option<Utf8PathBuf>,

    /// Directory holding the packages, relative to the repository root
    #[arg(long, value_name = "DIR")]
    pub gems_dir: Option<Utf8PathBuf>,

    /// Classify without writing any changelog
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the changelog command.
#[instrument(name = "cmd_changelog", skip_all, fields(json_output))]
pub fn cmd_changelog(
    args: ChangelogArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, dry_run = args.dry_run, "executing changelog command");

    let mut layout = super::resolve_layout(config, cwd);
    if let Some(gems_dir) = args.gems_dir {
        layout.gems_root = layout.root.join(&gems_dir);
        layout.gems_dir = gems_dir;
    }

    let raw = read_changes(args.changes.as_deref())?;
    let changes =
        ChangeSet::parse(&raw, layout.gems_dir.as_str()).context("failed to parse changed paths")?;

    let diff = GitDiff::new(&layout.root);
    let classifier = Classifier::new(&layout.roles, &diff, layout.gems_dir.clone());
    let classifications = if args.dry_run {
        changes
            .packages()
            .iter()
            .map(|package| classifier.classify(package))
            .collect::<Result<Vec<_>, _>>()
            .context("classification failed")?
    } else {
        classify::update_changelogs(&changes, &classifier, &layout.gems_root)
            .context("changelog update failed")?
    };

    if global_json {
        println!("{}", serde_json::to_string_pretty(&classifications)?);
        return Ok(());
    }

    if classifications.is_empty() {
        println!("{}", "No package changes.".dimmed());
        return Ok(());
    }
    println!("{}", "Changelogs".bold().underline());
    for classification in &classifications {
        print_classification(classification);
    }
    if args.dry_run {
        println!();
        println!("{}", "Dry run: no changelogs written.".yellow());
    }
    Ok(())
}

fn read_changes(source: Option<&Utf8Path>) -> anyhow::Result<String> {
    match source {
        Some(path) if path.as_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read changed paths from {path}")),
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read changed paths from stdin")?;
            Ok(raw)
        }
    }
}

fn print_classification(classification: &Classification) {
    let marker = if classification.entries.is_empty() && !classification.new_package {
        "○".yellow().to_string()
    } else {
        "✓".green().to_string()
    };
    println!(
        "  {marker} {} {}",
        classification.package.cyan(),
        format!("({})", classification.kind).dimmed()
    );
    if classification.new_package {
        println!("      {}", "new package: unreleased section added".dimmed());
    }
    for entry in &classification.entries {
        let first_line = entry.text.lines().next().unwrap_or_default();
        println!("      {} {}", format!("{}:", entry.kind).dimmed(), first_line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_changes_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().join("changes.txt")).unwrap();
        std::fs::write(&path, "gems/aws-sdk-s3/lib/x.rb\n").unwrap();
        assert_eq!(read_changes(Some(&path)).unwrap(), "gems/aws-sdk-s3/lib/x.rb\n");
    }

    #[test]
    fn missing_changes_file_is_an_error() {
        let err = read_changes(Some(Utf8Path::new("/nonexistent/changes.txt"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/changes.txt"));
    }

    #[test]
    fn dry_run_leaves_changelogs_untouched() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        let package = root.join("gems").join("aws-sdk-s3");
        std::fs::create_dir_all(&package).unwrap();
        let changes = root.join("changes.txt");
        std::fs::write(&changes, "gems/aws-sdk-s3/lib/aws-sdk-s3/client.rb\n").unwrap();

        let args = ChangelogArgs {
            changes: Some(changes),
            gems_dir: None,
            dry_run: true,
        };
        cmd_changelog(args, true, &Config::default(), &root).unwrap();
        assert!(!package.join("CHANGELOG.md").exists());
    }

    #[test]
    fn service_change_writes_generated_entry() {
        let tmp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        let package = root.join("gems").join("aws-sdk-s3");
        std::fs::create_dir_all(&package).unwrap();
        let changes = root.join("changes.txt");
        std::fs::write(&changes, "gems/aws-sdk-s3/lib/aws-sdk-s3/client.rb\n").unwrap();

        let args = ChangelogArgs {
            changes: Some(changes),
            gems_dir: None,
            dry_run: false,
        };
        cmd_changelog(args, true, &Config::default(), &root).unwrap();
        let written = std::fs::read_to_string(package.join("CHANGELOG.md")).unwrap();
        assert!(written.contains("Unreleased Changes"));
        assert!(written.contains("Code Generated Changes"));
    }
}
