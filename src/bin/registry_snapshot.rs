//! Dumps a live registry subtree as NDJSON observations, or the component
//! categories found in it with `--categories`.

use anyhow::Result;
use clap::Parser;
use ecfg_harvest::{PredefinedKey, RegistryValue, extract};
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "registry-snapshot")]
struct Cli {
    /// Root to start from (HKCR, HKCU, HKLM, HKU or the full HKEY_* name).
    root: String,
    /// Subkey below the root, backslash separated.
    subkey: Option<String>,
    /// Print the category map instead of raw observations.
    #[arg(long)]
    categories: bool,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = PredefinedKey::parse(&cli.root)?;
    let observations = snapshot(root, cli.subkey.as_deref().unwrap_or_default())?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.categories {
        let categories = extract(&observations)?;
        serde_json::to_writer_pretty(&mut out, &categories)?;
        writeln!(out)?;
    } else {
        for observation in &observations {
            serde_json::to_writer(&mut out, observation)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Walk `subkey` below `root`; each intermediate key is released as soon as
/// the next one is open.
#[cfg(windows)]
fn snapshot(root: PredefinedKey, subkey: &str) -> Result<Vec<RegistryValue>> {
    use ecfg_harvest::{RegistryHost, RegistryNode, walk};
    use ecfg_harvest::windows::WindowsRegistry;

    let host = WindowsRegistry::new()?;
    let mut key = host.open_predefined(root)?;
    for segment in subkey.split('\\').filter(|segment| !segment.is_empty()) {
        key = key.open_subkey(segment)?;
    }
    walk(&key)
}

#[cfg(not(windows))]
fn snapshot(root: PredefinedKey, subkey: &str) -> Result<Vec<RegistryValue>> {
    anyhow::bail!("cannot read {root}\\{subkey}: the live registry is only available on Windows")
}
