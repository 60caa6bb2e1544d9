//! Registry roots: the four predefined handles and the logical roots that
//! observations are reported under.
//!
//! Physical key names always begin with the canonical root name
//! (`HKEY_LOCAL_MACHINE\...`). `resolve` turns such a name into a
//! `LogicalRoot` plus the path below it, folding `HKLM\Software\Classes` into
//! `ClassesRoot` the way the shell and MSI treat it.

use anyhow::{Result, bail};
use serde::Serialize;
use std::fmt;

/// `HKLM` sub-path that aliases `HKEY_CLASSES_ROOT`.
pub const HKCR_PATH_IN_HKLM: &str = r"Software\Classes";

const SEPARATOR: char = '\\';

/// The predefined root handles that can be opened and overridden.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PredefinedKey {
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
}

impl PredefinedKey {
    pub const ALL: [PredefinedKey; 4] = [
        PredefinedKey::ClassesRoot,
        PredefinedKey::CurrentUser,
        PredefinedKey::LocalMachine,
        PredefinedKey::Users,
    ];

    /// Canonical name used as the first segment of physical key paths.
    pub fn canonical_name(self) -> &'static str {
        match self {
            PredefinedKey::ClassesRoot => "HKEY_CLASSES_ROOT",
            PredefinedKey::CurrentUser => "HKEY_CURRENT_USER",
            PredefinedKey::LocalMachine => "HKEY_LOCAL_MACHINE",
            PredefinedKey::Users => "HKEY_USERS",
        }
    }

    pub fn from_canonical_name(name: &str) -> Option<Self> {
        PredefinedKey::ALL
            .into_iter()
            .find(|root| root.canonical_name() == name)
    }

    /// Accepts canonical names as well as the usual `HKCR`/`HKLM` shorthands.
    pub fn parse(name: &str) -> Result<Self> {
        let upper = name.to_ascii_uppercase();
        let root = match upper.as_str() {
            "HKCR" => PredefinedKey::ClassesRoot,
            "HKCU" => PredefinedKey::CurrentUser,
            "HKLM" => PredefinedKey::LocalMachine,
            "HKU" => PredefinedKey::Users,
            other => match PredefinedKey::from_canonical_name(other) {
                Some(root) => root,
                None => bail!("Unknown registry root: {name}"),
            },
        };
        Ok(root)
    }
}

impl fmt::Display for PredefinedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Root column values for harvested registry observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum LogicalRoot {
    /// Per-user or per-machine depending on install context. Never produced
    /// by `resolve`.
    UserOrMachine,
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
}

impl fmt::Display for LogicalRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogicalRoot::UserOrMachine => "UserOrMachine",
            LogicalRoot::ClassesRoot => "ClassesRoot",
            LogicalRoot::CurrentUser => "CurrentUser",
            LogicalRoot::LocalMachine => "LocalMachine",
            LogicalRoot::Users => "Users",
        };
        f.write_str(label)
    }
}

/// Result of resolving a physical key name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    pub root: LogicalRoot,
    /// Path below the logical root; empty for the root itself.
    pub suffix: String,
}

/// Map a physical key name to its logical root and the path below it.
///
/// An unknown first segment is fatal: every key the walker visits descends
/// from one of the four predefined roots.
pub fn resolve(physical_path: &str) -> Result<ResolvedPath> {
    let (root_name, remainder) = match physical_path.split_once(SEPARATOR) {
        Some((root, rest)) => (root, rest),
        None => (physical_path, ""),
    };

    let root = match root_name {
        "HKEY_CLASSES_ROOT" => LogicalRoot::ClassesRoot,
        "HKEY_CURRENT_USER" => LogicalRoot::CurrentUser,
        "HKEY_USERS" => LogicalRoot::Users,
        "HKEY_LOCAL_MACHINE" => {
            if let Some(aliased) = strip_classes_prefix(remainder) {
                return Ok(ResolvedPath {
                    root: LogicalRoot::ClassesRoot,
                    suffix: aliased.to_string(),
                });
            }
            LogicalRoot::LocalMachine
        }
        other => bail!("Unrecognized registry root '{other}' in key {physical_path}"),
    };

    Ok(ResolvedPath {
        root,
        suffix: remainder.to_string(),
    })
}

/// Returns the remainder below `Software\Classes` when `path` starts with it
/// (ASCII case-insensitive), dropping one leading separator.
fn strip_classes_prefix(path: &str) -> Option<&str> {
    let prefix_len = HKCR_PATH_IN_HKLM.len();
    let head = path.get(..prefix_len)?;
    if !head.eq_ignore_ascii_case(HKCR_PATH_IN_HKLM) {
        return None;
    }
    let rest = &path[prefix_len..];
    Some(rest.strip_prefix(SEPARATOR).unwrap_or(rest))
}

/// Split a physical key name into its segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).collect()
}

/// Join a parent key name and a child segment.
pub fn join(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        return child.to_string();
    }
    if child.is_empty() {
        return parent.to_string();
    }
    format!("{parent}{SEPARATOR}{child}")
}
