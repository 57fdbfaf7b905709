//! Publish command: push built gems whose version the registry lacks.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use gemstamp_core::config::Config;
use gemstamp_core::registry::{self, GemArtifact, PublishOutcome, RegistryClient, RubyGemsClient};

/// Arguments for the `publish` subcommand.
#[derive(Args, Debug, Default)]
pub struct PublishArgs {
    /// Built gem files, named `<package>-<version>.gem`
    #[arg(value_name = "GEM", required = true)]
    pub artifacts: Vec<Utf8PathBuf>,

    /// Registry base URL (overrides configuration)
    #[arg(long, value_name = "URL")]
    pub registry: Option<String>,

    /// Query the registry but upload nothing
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the publish command.
#[instrument(name = "cmd_publish", skip_all, fields(json_output))]
pub fn cmd_publish(
    args: PublishArgs,
    global_json: bool,
    config: &Config,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, dry_run = args.dry_run, "executing publish command");

    let artifacts = parse_artifacts(&args.artifacts, cwd)?;
    let settings = config.registry();
    let url = args.registry.unwrap_or(settings.url);
    let client = RubyGemsClient::new(&url, settings.policy)
        .with_api_key_from_env(&settings.api_key_env);
    debug!(%url, artifacts = artifacts.len(), "registry client ready");

    let spinner = super::spinner("Checking registry...", global_json);
    let outcomes = publish_all(&client, &artifacts, args.dry_run, |artifact| {
        spinner.set_message(format!("Publishing {}...", artifact.name));
    });
    spinner.finish_and_clear();
    let outcomes = outcomes?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    println!("{}", "Publish".bold().underline());
    for outcome in &outcomes {
        if outcome.published {
            println!(
                "  {} {} {}",
                "✓".green(),
                outcome.package.cyan(),
                outcome.version.green().bold()
            );
        } else {
            println!(
                "  {} {} {} {}",
                "○".yellow(),
                outcome.package.cyan(),
                outcome.version,
                format!("(registry has {})", outcome.registry_version).dimmed()
            );
        }
    }
    if args.dry_run {
        println!();
        println!("{}", "Dry run: nothing uploaded.".yellow());
    }
    Ok(())
}

/// Parse every artifact name before any network traffic.
fn parse_artifacts(paths: &[Utf8PathBuf], cwd: &Utf8Path) -> anyhow::Result<Vec<GemArtifact>> {
    paths
        .iter()
        .map(|path| {
            let path = cwd.join(path);
            if !path.is_file() {
                anyhow::bail!("artifact not found: {path}");
            }
            GemArtifact::from_path(&path).with_context(|| format!("cannot publish {path}"))
        })
        .collect()
}

fn publish_all(
    client: &impl RegistryClient,
    artifacts: &[GemArtifact],
    dry_run: bool,
    mut on_artifact: impl FnMut(&GemArtifact),
) -> anyhow::Result<Vec<PublishOutcome>> {
    let mut outcomes = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        on_artifact(artifact);
        let outcome = registry::publish_if_new(client, artifact, dry_run)
            .with_context(|| format!("failed to publish {}", artifact.path))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
