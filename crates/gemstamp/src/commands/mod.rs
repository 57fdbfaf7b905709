//! Command implementations

pub mod bump;

pub mod changelog;

pub mod doctor;

pub mod info;

pub mod manifest;

pub mod publish;

pub mod registry;

use camino::Utf8Path;
use gemstamp_core::config::{self, Config, Layout};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

/// Resolve the repository layout for a command run from `cwd`.
///
/// The layout is rooted at the nearest enclosing repository (a `.git` or a
/// gemstamp config file); outside a repository, `cwd` itself is the root.
pub fn resolve_layout(config: &Config, cwd: &Utf8Path) -> Layout {
    let root = config::find_repo_root(cwd).unwrap_or_else(|| cwd.to_path_buf());
    debug!(%root, "repository root resolved");
    config.layout(&root)
}

/// A steady spinner on stderr, hidden when output is JSON.
fn spinner(message: &str, json: bool) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout_rooted_at_repository() {
        let tmp = TempDir::new().unwrap();
        let root = camino::Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir(root.join(".git")).unwrap();
        let nested = root.join("gems").join("aws-sdk-s3");
        std::fs::create_dir_all(&nested).unwrap();

        let layout = resolve_layout(&Config::default(), &nested);
        assert_eq!(layout.root, root);
        assert_eq!(layout.gems_root, root.join("gems"));
    }
}
