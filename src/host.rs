//! Registry seam shared by the Windows backend and the in-memory registry.
//!
//! The redirector, walker, and harvester only talk to these traits. Key
//! handles are owned values that release the underlying handle when dropped,
//! so every open is scoped to the call that performed it.

use crate::root::PredefinedKey;
use crate::value::ValueData;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry key not found: {path}")]
    NotFound { path: String },
    #[error("{op} failed for {path}: {source}")]
    Platform {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("a registry redirection scope is already active in this process")]
    ScopeActive,
    #[error("injected failure: {op} on {path}")]
    Injected { op: &'static str, path: String },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }

    /// Classify an OS error, keeping "file not found" distinct.
    pub fn from_io(op: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            return RegistryError::NotFound { path };
        }
        RegistryError::Platform { op, path, source }
    }
}

/// An open registry key.
pub trait RegistryNode: Sized {
    /// Full physical name, starting with the canonical root name.
    fn name(&self) -> &str;
    fn subkey_names(&self) -> Result<Vec<String>, RegistryError>;
    fn open_subkey(&self, name: &str) -> Result<Self, RegistryError>;
    fn values(&self) -> Result<Vec<(String, ValueData)>, RegistryError>;
}

/// Process-level registry operations.
///
/// `create_key` and `delete_tree` resolve `base` through any override that is
/// currently installed for it, the same way the OS does.
pub trait RegistryHost {
    type Key: RegistryNode;

    fn os_major_version(&self) -> u32;

    fn process_id(&self) -> u32 {
        std::process::id()
    }

    fn open_predefined(&self, root: PredefinedKey) -> Result<Self::Key, RegistryError>;

    /// Open `path` below `base`, creating missing keys.
    fn create_key(&self, base: PredefinedKey, path: &str) -> Result<Self::Key, RegistryError>;

    /// Install `target` as the storage for `root`, or remove the override when
    /// `target` is `None`.
    fn override_predefined(
        &self,
        root: PredefinedKey,
        target: Option<&Self::Key>,
    ) -> Result<(), RegistryError>;

    /// Delete `path` and everything below it.
    fn delete_tree(&self, base: PredefinedKey, path: &str) -> Result<(), RegistryError>;
}
