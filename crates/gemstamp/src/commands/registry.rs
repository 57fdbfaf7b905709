//! Registry command: query what the registry has for packages.

use camino::Utf8Path;
use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use gemstamp_core::config::Config;
use gemstamp_core::registry::{Dependencies, RegistryClient, RegistryResult, RubyGemsClient};

/// Arguments for the `registry` subcommand.
#[derive(Args, Debug, Default)]
pub struct RegistryArgs {
    /// Package names to look up
    #[arg(value_name = "PACKAGE", required = true)]
    pub packages: Vec<String>,

    /// Registry base URL (overrides configuration)
    #[arg(long, value_name = "URL")]
    pub registry: Option<String>,
}

#[derive(Debug, Serialize)]
struct PackageStatus {
    package: String,
    latest_version: String,
    dependencies: Dependencies,
}

/// Execute the registry command.
#[instrument(name = "cmd_registry", skip_all, fields(json_output))]
pub fn cmd_registry(
    args: RegistryArgs,
    global_json: bool,
    config: &Config,
    _cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, packages = args.packages.len(), "executing registry command");

    let settings = config.registry();
    let url = args.registry.unwrap_or(settings.url);
    let client = RubyGemsClient::new(&url, settings.policy);

    let spinner = super::spinner("Querying registry...", global_json);
    let statuses = lookup(&client, &args.packages);
    spinner.finish_and_clear();
    let statuses = statuses?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    for status in &statuses {
        println!(
            "{} {}",
            status.package.cyan().bold(),
            status.latest_version.green()
        );
        if status.dependencies.runtime.is_empty() {
            println!("  {}", "no runtime dependencies".dimmed());
        }
        for dep in &status.dependencies.runtime {
            println!("  {} {}", dep.name, dep.requirements.dimmed());
        }
    }
    Ok(())
}

fn lookup(
    client: &impl RegistryClient,
    packages: &[String],
) -> RegistryResult<Vec<PackageStatus>> {
    packages
        .iter()
        .map(|package| {
            Ok(PackageStatus {
                package: package.clone(),
                latest_version: client.latest_version(package)?,
                dependencies: client.dependencies(package)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemstamp_core::registry::{Dependency, RegistryError};

    struct FakeRegistry;

    impl RegistryClient for FakeRegistry {
        fn latest_version(&self, package: &str) -> RegistryResult<String> {
            match package {
                "aws-sdk-s3" => Ok("1.42.0".into()),
                _ => Err(RegistryError::Status {
                    operation: format!("get latest version of {package}"),
                    status: 404,
                    body: "This rubygem could not be found.".into(),
                }),
            }
        }

        fn dependencies(&self, _package: &str) -> RegistryResult<Dependencies> {
            Ok(Dependencies {
                runtime: vec![Dependency {
                    name: "aws-sdk-core".into(),
                    requirements: "~> 3".into(),
                }],
                development: Vec::new(),
            })
        }

        fn publish(&self, _artifact: &Utf8Path) -> RegistryResult<String> {
            unreachable!("lookups never upload")
        }
    }

    #[test]
    fn lookup_reports_version_and_dependencies() {
        let statuses = lookup(&FakeRegistry, &["aws-sdk-s3".to_string()]).unwrap();
        assert_eq!(statuses[0].latest_version, "1.42.0");
        assert_eq!(statuses[0].dependencies.runtime[0].name, "aws-sdk-core");
    }

    #[test]
    fn lookup_stops_at_first_failure() {
        let packages = ["aws-sdk-s3".to_string(), "missing".to_string()];
        assert!(lookup(&FakeRegistry, &packages).is_err());
    }
}
