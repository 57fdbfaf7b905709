use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;

#[derive(Args, Debug)]
pub struct ManArgs {
    /// Output directory (default: dist/share/man/man1)
    #[arg(long = "out-dir", default_value = "dist/share/man/man1")]
    pub out_dir: PathBuf,
}

pub fn cmd_man(args: ManArgs) -> Result<(), String> {
    let out_dir = crate::workspace_root().join(args.out_dir);
    fs::create_dir_all(&out_dir).map_err(|e| format!("{}: {e}", out_dir.display()))?;

    let cmd = gemstamp::command();
    render_tree(&cmd, crate::BIN_NAME, &out_dir)
}

/// Write `<prefix>.1` for `cmd`, then `<prefix>-<sub>.1` for each subcommand,
/// recursing so `manifest sync` becomes `gemstamp-manifest-sync.1`.
fn render_tree(cmd: &clap::Command, prefix: &str, out_dir: &Path) -> Result<(), String> {
    let man = clap_mangen::Man::new(cmd.clone()).title(prefix.to_uppercase());
    let mut buffer: Vec<u8> = Vec::new();
    man.render(&mut buffer)
        .map_err(|e| format!("render manpage for {prefix}: {e}"))?;

    let man_path = out_dir.join(format!("{prefix}.1"));
    fs::write(&man_path, buffer).map_err(|e| format!("{}: {e}", man_path.display()))?;
    println!("wrote {}", man_path.display());

    for subcommand in cmd.get_subcommands().filter(|s| s.get_name() != "help") {
        render_tree(subcommand, &format!("{prefix}-{}", subcommand.get_name()), out_dir)?;
    }
    Ok(())
}
