//! Process-private registry redirection.
//!
//! `RegistryScope::open` redirects the four predefined roots into
//! `<base>\SOFTWARE\EcfgHarvest\<pid>\<ROOT NAME>` so that registration side
//! effects land in a throwaway tree. The base is `HKEY_CURRENT_USER` on NT 6
//! and later (no elevation needed) and `HKEY_LOCAL_MACHINE` before that.
//!
//! Overrides are process-wide, so only one scope may be live per process.
//! Ordering matters in both directions: the base root must be redirected last
//! (otherwise later redirection targets are created inside the already
//! redirected base) and un-redirected first on teardown.

use crate::host::{RegistryError, RegistryHost};
use crate::root::{HKCR_PATH_IN_HKLM, PredefinedKey};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Parent key of every private redirection path.
pub const SCOPE_NAMESPACE: &str = r"SOFTWARE\EcfgHarvest";

/// First OS major version that redirects into `HKEY_CURRENT_USER`.
const MODERN_OS_MAJOR: u32 = 6;

static SCOPE_ACTIVE: AtomicBool = AtomicBool::new(false);

const LEGACY_REDIRECT_ORDER: [PredefinedKey; 4] = [
    PredefinedKey::ClassesRoot,
    PredefinedKey::CurrentUser,
    PredefinedKey::Users,
    PredefinedKey::LocalMachine,
];

const MODERN_REDIRECT_ORDER: [PredefinedKey; 4] = [
    PredefinedKey::ClassesRoot,
    PredefinedKey::LocalMachine,
    PredefinedKey::Users,
    PredefinedKey::CurrentUser,
];

const LEGACY_RESTORE_ORDER: [PredefinedKey; 4] = [
    PredefinedKey::LocalMachine,
    PredefinedKey::ClassesRoot,
    PredefinedKey::CurrentUser,
    PredefinedKey::Users,
];

const MODERN_RESTORE_ORDER: [PredefinedKey; 4] = [
    PredefinedKey::CurrentUser,
    PredefinedKey::ClassesRoot,
    PredefinedKey::LocalMachine,
    PredefinedKey::Users,
];

/// Which redirection layout applies to a host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsGeneration {
    Legacy,
    Modern,
}

impl OsGeneration {
    pub fn from_major(major: u32) -> Self {
        if major >= MODERN_OS_MAJOR {
            OsGeneration::Modern
        } else {
            OsGeneration::Legacy
        }
    }

    /// Hive that holds the private redirection tree.
    pub fn override_base(self) -> PredefinedKey {
        match self {
            OsGeneration::Legacy => PredefinedKey::LocalMachine,
            OsGeneration::Modern => PredefinedKey::CurrentUser,
        }
    }

    pub fn redirect_order(self) -> [PredefinedKey; 4] {
        match self {
            OsGeneration::Legacy => LEGACY_REDIRECT_ORDER,
            OsGeneration::Modern => MODERN_REDIRECT_ORDER,
        }
    }

    pub fn restore_order(self) -> [PredefinedKey; 4] {
        match self {
            OsGeneration::Legacy => LEGACY_RESTORE_ORDER,
            OsGeneration::Modern => MODERN_RESTORE_ORDER,
        }
    }
}

/// Private path for a process id, relative to the override base.
pub fn private_path(process_id: u32) -> String {
    format!(r"{SCOPE_NAMESPACE}\{process_id}")
}

/// Token for an established redirection.
///
/// Returned by `RegistryScope::open` and consumed by `RegistryScope::close`.
/// `remapped == false` means no redirection was installed.
#[derive(Debug)]
#[must_use = "an open scope must be closed to remove its overrides"]
pub struct ScopeHandle {
    generation: OsGeneration,
    private_path: Option<String>,
    installed: Vec<PredefinedKey>,
}

impl ScopeHandle {
    pub fn is_remapped(&self) -> bool {
        self.private_path.is_some()
    }

    pub fn private_path(&self) -> Option<&str> {
        self.private_path.as_deref()
    }

    pub fn generation(&self) -> OsGeneration {
        self.generation
    }

    pub fn installed_overrides(&self) -> &[PredefinedKey] {
        &self.installed
    }
}

/// Open/close operations for the process-wide redirection.
pub struct RegistryScope;

impl RegistryScope {
    /// Establish the redirection. With `remap == false` the returned handle is
    /// inert and the live registry is used.
    pub fn open<H: RegistryHost>(host: &H, remap: bool) -> Result<ScopeHandle, RegistryError> {
        let generation = OsGeneration::from_major(host.os_major_version());
        if !remap {
            return Ok(ScopeHandle {
                generation,
                private_path: None,
                installed: Vec::new(),
            });
        }

        if SCOPE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RegistryError::ScopeActive);
        }

        let mut handle = ScopeHandle {
            generation,
            private_path: Some(private_path(host.process_id())),
            installed: Vec::new(),
        };

        match establish(host, &mut handle) {
            Ok(()) => {
                info!(
                    path = handle.private_path().unwrap_or_default(),
                    base = %generation.override_base(),
                    "registry redirection established"
                );
                Ok(handle)
            }
            Err(err) => {
                warn!(error = %err, "registry redirection failed; rolling back");
                if let Err(cleanup) = teardown(host, &handle) {
                    warn!(error = %cleanup, "rollback after failed redirection was incomplete");
                }
                SCOPE_ACTIVE.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Remove every installed override and delete the private tree.
    ///
    /// All four roots are restored even when one of them fails; the first
    /// error is returned.
    pub fn close<H: RegistryHost>(host: &H, handle: ScopeHandle) -> Result<(), RegistryError> {
        if !handle.is_remapped() {
            return Ok(());
        }
        let result = teardown(host, &handle);
        SCOPE_ACTIVE.store(false, Ordering::SeqCst);
        if result.is_ok() {
            info!("registry redirection removed");
        }
        result
    }

    /// Whether a redirection is live in this process.
    pub fn is_active() -> bool {
        SCOPE_ACTIVE.load(Ordering::SeqCst)
    }
}

fn establish<H: RegistryHost>(host: &H, handle: &mut ScopeHandle) -> Result<(), RegistryError> {
    let base = handle.generation.override_base();
    let path = handle.private_path.clone().unwrap_or_default();

    remove_private_tree(host, base, &path)?;

    for root in handle.generation.redirect_order() {
        remap_root(host, base, &path, root)?;
        handle.installed.push(root);
    }

    if handle.generation == OsGeneration::Modern {
        // Type library registration expects HKLM\Software\Classes to exist.
        host.create_key(PredefinedKey::LocalMachine, HKCR_PATH_IN_HKLM)?;
    }
    Ok(())
}

fn remap_root<H: RegistryHost>(
    host: &H,
    base: PredefinedKey,
    private_path: &str,
    root: PredefinedKey,
) -> Result<(), RegistryError> {
    let target_path = format!(r"{private_path}\{}", root.canonical_name());
    // The handle only needs to live until the override is installed.
    let target = host.create_key(base, &target_path)?;
    host.override_predefined(root, Some(&target))?;
    debug!(root = %root, target = %target_path, "installed registry override");
    Ok(())
}

fn teardown<H: RegistryHost>(host: &H, handle: &ScopeHandle) -> Result<(), RegistryError> {
    let mut first_error: Option<RegistryError> = None;

    for root in handle.generation.restore_order() {
        if !handle.installed.contains(&root) {
            continue;
        }
        match host.override_predefined(root, None) {
            Ok(()) => debug!(root = %root, "removed registry override"),
            Err(err) => {
                warn!(root = %root, error = %err, "failed to remove registry override");
                first_error.get_or_insert(err);
            }
        }
    }

    if let Some(path) = handle.private_path.as_deref() {
        if let Err(err) = remove_private_tree(host, handle.generation.override_base(), path) {
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn remove_private_tree<H: RegistryHost>(
    host: &H,
    base: PredefinedKey,
    path: &str,
) -> Result<(), RegistryError> {
    match host.delete_tree(base, path) {
        Ok(()) => {
            debug!(base = %base, path, "deleted private registry tree");
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err),
    }
}
