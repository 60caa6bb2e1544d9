use anyhow::{Context, Result, bail};
use std::env::{self, VarError};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub mod extract;
pub mod harvest;
pub mod host;
pub mod manifest;
pub mod memory;
pub mod root;
pub mod scope;
pub mod value;
pub mod walker;
#[cfg(windows)]
pub mod windows;

pub use extract::{CategoryMap, EXCLUDED_CATEGORIES, extract};
pub use harvest::{
    CategoryHarvester, HarvestOptions, HarvestResults, Registrar, assembly_short_name,
    harvest_assembly,
};
pub use host::{RegistryError, RegistryHost, RegistryNode};
pub use manifest::{ecfg_file_name, render_config_xml, write_ecfg};
pub use memory::MemoryRegistry;
pub use root::{LogicalRoot, PredefinedKey, ResolvedPath, resolve};
pub use scope::{RegistryScope, ScopeHandle};
pub use value::{RegistryValue, ValueData};
pub use walker::walk;

const ENV_ASSEMBLY_GUID: &str = "ECFG_HARVEST_GUID";

/// Reasons to stop before touching the registry. These are reported to the
/// user and end the run without an error status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputProblem {
    MissingAssembly(PathBuf),
    MissingOutputFolder(PathBuf),
}

impl std::fmt::Display for InputProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputProblem::MissingAssembly(path) => {
                write!(f, "File {} does not exist", path.display())
            }
            InputProblem::MissingOutputFolder(path) => {
                write!(f, "Folder {} does not exist", path.display())
            }
        }
    }
}

pub fn check_inputs(assembly: &Path, output_folder: &Path) -> Result<(), InputProblem> {
    if !assembly.is_file() {
        return Err(InputProblem::MissingAssembly(assembly.to_path_buf()));
    }
    if !output_folder.is_dir() {
        return Err(InputProblem::MissingOutputFolder(
            output_folder.to_path_buf(),
        ));
    }
    Ok(())
}

/// Directory holding the running executable.
pub fn default_output_folder() -> Result<PathBuf> {
    let exe = env::current_exe().context("locating the running executable")?;
    match exe.parent() {
        Some(dir) => Ok(dir.to_path_buf()),
        None => bail!("executable path {} has no parent", exe.display()),
    }
}

/// Parse a GUID in any of the usual textual forms (braced, hyphenated,
/// simple).
pub fn parse_guid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).with_context(|| format!("'{value}' is not a valid GUID"))
}

/// Assembly GUID from `ECFG_HARVEST_GUID`, if set and non-empty.
pub fn assembly_guid_from_env() -> Result<Option<Uuid>> {
    match env::var(ENV_ASSEMBLY_GUID) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => parse_guid(&value)
            .with_context(|| format!("reading {ENV_ASSEMBLY_GUID}"))
            .map(Some),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => bail!("{ENV_ASSEMBLY_GUID} is not valid UTF-8"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn check_inputs_reports_missing_paths() {
        let folder = TempDir::new().unwrap();
        let assembly = NamedTempFile::new_in(folder.path()).unwrap();
        assert_eq!(check_inputs(assembly.path(), folder.path()), Ok(()));

        let missing = folder.path().join("absent.dll");
        assert_eq!(
            check_inputs(&missing, folder.path()),
            Err(InputProblem::MissingAssembly(missing.clone()))
        );

        let missing_dir = folder.path().join("out");
        let problem = check_inputs(assembly.path(), &missing_dir).unwrap_err();
        assert_eq!(
            problem.to_string(),
            format!("Folder {} does not exist", missing_dir.display())
        );
    }

    #[test]
    fn parse_guid_accepts_common_forms() {
        let expected = parse_guid("62c8fe65-4ebb-45e7-b440-6e39b2cdbf29").unwrap();
        assert_eq!(
            parse_guid("{62C8FE65-4EBB-45E7-B440-6E39B2CDBF29}").unwrap(),
            expected
        );
        assert_eq!(parse_guid(" 62c8fe654ebb45e7b4406e39b2cdbf29 ").unwrap(), expected);
        assert!(parse_guid("62c8fe65").is_err());
    }
}
