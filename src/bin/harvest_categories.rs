//! Registers a component inside a private registry scope and writes the
//! component categories it implements to `<{GUID}>_<name>.ecfg`.
//!
//! Missing arguments or paths are reported and end the run with status 0;
//! registry and data errors exit non-zero so build automation notices.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use ecfg_harvest::manifest::{braced_upper, describe};
use ecfg_harvest::{
    HarvestOptions, HarvestResults, assembly_guid_from_env, assembly_short_name, check_inputs,
    default_output_folder, parse_guid, write_ecfg,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "harvest-categories",
    about = "Harvest the component categories a COM component registers into an .ecfg manifest"
)]
struct Cli {
    /// Component library to register.
    input: Option<PathBuf>,
    /// Destination folder; defaults to the folder holding this executable.
    output_folder: Option<PathBuf>,
    /// Assembly GUID used to name the manifest (also ECFG_HARVEST_GUID).
    #[arg(long)]
    guid: Option<String>,
    /// Register against the live registry instead of a private scope.
    #[arg(long)]
    no_remap: bool,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        let input = cli
            .input
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        eprintln!("Error Harvesting Categories in {input}: {err}");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let Some(input) = cli.input.as_deref() else {
        println!("ERROR: Incorrect number of arguments.");
        println!();
        println!("{}", Cli::command().render_usage());
        return Ok(());
    };

    let output_folder = match &cli.output_folder {
        Some(folder) => folder.clone(),
        None => default_output_folder()?,
    };

    println!(
        "Harvesting Categories for {}. Output folder: {}",
        input.display(),
        output_folder.display()
    );

    if let Err(problem) = check_inputs(input, &output_folder) {
        println!("{problem}");
        return Ok(());
    }

    let assembly_guid = match cli.guid.as_deref() {
        Some(raw) => Some(parse_guid(raw)?),
        None => assembly_guid_from_env()?,
    };
    let options = HarvestOptions {
        remap: !cli.no_remap,
        assembly_guid,
    };

    let Some(results) = harvest(input, &options)? else {
        println!(
            "Assembly {} does not have a GUID",
            assembly_short_name(input)
        );
        return Ok(());
    };

    println!(
        "Assembly {}_{}",
        braced_upper(&results.assembly_guid),
        results.assembly_name
    );
    for line in describe(&results) {
        println!("{line}");
    }

    let written = write_ecfg(&results, &output_folder)?;
    println!("Wrote {}", written.display());
    Ok(())
}

#[cfg(windows)]
fn harvest(input: &Path, options: &HarvestOptions) -> Result<Option<HarvestResults>> {
    use ecfg_harvest::harvest_assembly;
    use ecfg_harvest::windows::{SelfRegistrar, WindowsRegistry};

    let host = WindowsRegistry::new()?;
    harvest_assembly(&host, &SelfRegistrar, input, options)
}

#[cfg(not(windows))]
fn harvest(input: &Path, _options: &HarvestOptions) -> Result<Option<HarvestResults>> {
    anyhow::bail!(
        "registering {} requires the Windows registry; this build has no registry backend",
        input.display()
    )
}
