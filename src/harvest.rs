//! Harvest orchestration: redirect, register, snapshot, extract, restore.

use crate::extract::{CategoryMap, discover_type_library, extract};
use crate::host::RegistryHost;
use crate::root::PredefinedKey;
use crate::scope::{RegistryScope, ScopeHandle};
use crate::value::RegistryValue;
use crate::walker::walk;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Something that performs registration side effects for a component.
pub trait Registrar {
    fn register(&self, assembly: &Path) -> Result<()>;
}

impl<F> Registrar for F
where
    F: Fn(&Path) -> Result<()>,
{
    fn register(&self, assembly: &Path) -> Result<()> {
        self(assembly)
    }
}

#[derive(Clone, Debug)]
pub struct HarvestOptions {
    /// Redirect the registry into a private scope while registering.
    pub remap: bool,
    /// Assembly identity; discovered from the registered type library when
    /// absent.
    pub assembly_guid: Option<Uuid>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            remap: true,
            assembly_guid: None,
        }
    }
}

/// Category map plus the identity of the assembly that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarvestResults {
    pub assembly_guid: Uuid,
    pub assembly_name: String,
    pub categories: CategoryMap,
}

/// Owns a redirection scope for the duration of one harvest.
///
/// Dropping the harvester without calling `close` still tears the scope
/// down; errors during that implicit close are only logged.
pub struct CategoryHarvester<'h, H: RegistryHost> {
    host: &'h H,
    scope: Option<ScopeHandle>,
}

impl<'h, H: RegistryHost> CategoryHarvester<'h, H> {
    pub fn new(host: &'h H, remap: bool) -> Result<Self> {
        let scope = RegistryScope::open(host, remap).context("opening registry redirection")?;
        Ok(Self {
            host,
            scope: Some(scope),
        })
    }

    /// Snapshot `HKEY_CLASSES_ROOT`.
    pub fn snapshot(&self) -> Result<Vec<RegistryValue>> {
        let root = self
            .host
            .open_predefined(PredefinedKey::ClassesRoot)
            .context("opening HKEY_CLASSES_ROOT")?;
        let observations = walk(&root)?;
        debug!(count = observations.len(), "captured registry observations");
        Ok(observations)
    }

    /// Snapshot `HKEY_CLASSES_ROOT` and extract its category registrations.
    pub fn harvest_registry(&self) -> Result<CategoryMap> {
        extract(&self.snapshot()?)
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        match self.scope.take() {
            Some(scope) => {
                RegistryScope::close(self.host, scope).context("removing registry redirection")
            }
            None => Ok(()),
        }
    }
}

impl<H: RegistryHost> Drop for CategoryHarvester<'_, H> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %format!("{err:#}"), "registry redirection cleanup failed");
        }
    }
}

/// Register `assembly` inside a redirection scope and collect its categories.
///
/// Returns `Ok(None)` when no assembly GUID is available. The scope is closed
/// on every path; a registration or harvest error takes precedence over a
/// cleanup error.
pub fn harvest_assembly<H: RegistryHost, R: Registrar + ?Sized>(
    host: &H,
    registrar: &R,
    assembly: &Path,
    options: &HarvestOptions,
) -> Result<Option<HarvestResults>> {
    let assembly_name = assembly_short_name(assembly);
    let harvester = CategoryHarvester::new(host, options.remap)?;

    let harvested = registrar
        .register(assembly)
        .with_context(|| format!("registering {}", assembly.display()))
        .and_then(|()| harvester.snapshot())
        .and_then(|observations| {
            let categories = extract(&observations)?;
            Ok((categories, discover_type_library(&observations)))
        });
    let closed = harvester.close();

    let (categories, type_library) = harvested?;
    closed?;

    let Some(assembly_guid) = options.assembly_guid.or(type_library) else {
        return Ok(None);
    };
    info!(
        assembly = %assembly_name,
        guid = %assembly_guid,
        categories = categories.len(),
        "harvested component categories"
    );
    Ok(Some(HarvestResults {
        assembly_guid,
        assembly_name,
        categories,
    }))
}

/// File stem of the assembly path.
pub fn assembly_short_name(assembly: &Path) -> String {
    assembly
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
