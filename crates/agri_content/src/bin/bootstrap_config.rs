use std::env;
use std::path::PathBuf;

use agri_content::fixtures;
use anyhow::{Context, Result};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let target = if let Some(path) = args.get(1) {
        PathBuf::from(path)
    } else {
        env::current_dir().context("resolving current directory")?
    };

    let installed = fixtures::install_default_config(&target)?;
    println!(
        "Default config installed at {:?}. Set AGRI_APP_ROOT to this path before starting the server.",
        installed
    );
    Ok(())
}
