//! Live Windows registry backend and in-process self-registration.
//!
//! Root overrides installed through `RegOverridePredefKey` only affect the
//! calling process, so registration has to run in-process as well:
//! `SelfRegistrar` loads the component and calls its `DllRegisterServer`.

use crate::harvest::Registrar;
use crate::host::{RegistryError, RegistryHost, RegistryNode};
use crate::root::{PredefinedKey, join};
use crate::value::ValueData;
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use tracing::debug;
use windows_sys::Win32::Foundation::FreeLibrary;
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows_sys::Win32::System::Registry::{
    HKEY, HKEY_CLASSES_ROOT, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, HKEY_USERS,
    RegOverridePredefKey,
};
use winreg::RegKey;
use winreg::enums::{
    KEY_ALL_ACCESS, REG_BINARY, REG_DWORD, REG_DWORD_BIG_ENDIAN, REG_EXPAND_SZ, REG_MULTI_SZ,
    REG_QWORD, REG_SZ,
};
use winreg::types::FromRegValue;

const CURRENT_VERSION_KEY: &str = r"SOFTWARE\Microsoft\Windows NT\CurrentVersion";

fn predefined_handle(root: PredefinedKey) -> HKEY {
    match root {
        PredefinedKey::ClassesRoot => HKEY_CLASSES_ROOT,
        PredefinedKey::CurrentUser => HKEY_CURRENT_USER,
        PredefinedKey::LocalMachine => HKEY_LOCAL_MACHINE,
        PredefinedKey::Users => HKEY_USERS,
    }
}

/// Registry host backed by the live Windows registry.
pub struct WindowsRegistry {
    os_major: u32,
}

impl WindowsRegistry {
    /// Reads the OS version once, before any override can hide it.
    pub fn new() -> Result<Self> {
        let os_major = detect_os_major().context("detecting Windows version")?;
        debug!(os_major, "detected Windows major version");
        Ok(Self { os_major })
    }
}

fn detect_os_major() -> Result<u32> {
    let key = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey(CURRENT_VERSION_KEY)
        .with_context(|| format!(r"opening HKEY_LOCAL_MACHINE\{CURRENT_VERSION_KEY}"))?;
    if let Ok(major) = key.get_value::<u32, _>("CurrentMajorVersionNumber") {
        return Ok(major);
    }
    let version: String = key
        .get_value("CurrentVersion")
        .context("reading CurrentVersion")?;
    let major = version.split('.').next().unwrap_or_default();
    major
        .parse()
        .with_context(|| format!("unexpected CurrentVersion '{version}'"))
}

/// Open key on the live registry.
pub struct WindowsKey {
    key: RegKey,
    name: String,
}

impl RegistryNode for WindowsKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn subkey_names(&self) -> Result<Vec<String>, RegistryError> {
        self.key
            .enum_keys()
            .collect::<io::Result<Vec<_>>>()
            .map_err(|err| RegistryError::from_io("enum_keys", &self.name, err))
    }

    fn open_subkey(&self, name: &str) -> Result<Self, RegistryError> {
        let path = join(&self.name, name);
        let key = self
            .key
            .open_subkey(name)
            .map_err(|err| RegistryError::from_io("open_subkey", &path, err))?;
        Ok(WindowsKey { key, name: path })
    }

    fn values(&self) -> Result<Vec<(String, ValueData)>, RegistryError> {
        self.key
            .enum_values()
            .map(|entry| -> io::Result<(String, ValueData)> {
                let (name, raw) = entry?;
                let data = convert_value(&raw)?;
                Ok((name, data))
            })
            .collect::<io::Result<Vec<_>>>()
            .map_err(|err| RegistryError::from_io("enum_values", &self.name, err))
    }
}

fn convert_value(raw: &winreg::RegValue) -> io::Result<ValueData> {
    let data = match raw.vtype {
        REG_SZ | REG_EXPAND_SZ => ValueData::Text(String::from_reg_value(raw)?),
        REG_MULTI_SZ => ValueData::TextSequence(Vec::<String>::from_reg_value(raw)?),
        REG_DWORD => ValueData::Int32(u32::from_reg_value(raw)? as i32),
        REG_DWORD_BIG_ENDIAN => match <[u8; 4]>::try_from(raw.bytes.as_slice()) {
            Ok(bytes) => ValueData::Int32(i32::from_be_bytes(bytes)),
            Err(_) => ValueData::Bytes(raw.bytes.clone()),
        },
        REG_QWORD => ValueData::Int64(u64::from_reg_value(raw)? as i64),
        REG_BINARY => ValueData::Bytes(raw.bytes.clone()),
        _ if raw.bytes.is_empty() => ValueData::Absent,
        _ => ValueData::Bytes(raw.bytes.clone()),
    };
    Ok(data)
}

impl RegistryHost for WindowsRegistry {
    type Key = WindowsKey;

    fn os_major_version(&self) -> u32 {
        self.os_major
    }

    fn open_predefined(&self, root: PredefinedKey) -> Result<WindowsKey, RegistryError> {
        Ok(WindowsKey {
            key: RegKey::predef(predefined_handle(root)),
            name: root.canonical_name().to_string(),
        })
    }

    fn create_key(&self, base: PredefinedKey, path: &str) -> Result<WindowsKey, RegistryError> {
        let name = join(base.canonical_name(), path);
        let (key, _disposition) = RegKey::predef(predefined_handle(base))
            .create_subkey_with_flags(path, KEY_ALL_ACCESS)
            .map_err(|err| RegistryError::from_io("create_key", &name, err))?;
        Ok(WindowsKey { key, name })
    }

    fn override_predefined(
        &self,
        root: PredefinedKey,
        target: Option<&WindowsKey>,
    ) -> Result<(), RegistryError> {
        let new_key: HKEY = target.map(|key| key.key.raw_handle()).unwrap_or(0);
        // SAFETY: both handles are predefined or owned by a live `RegKey`.
        let status = unsafe { RegOverridePredefKey(predefined_handle(root), new_key) };
        if status != 0 {
            return Err(RegistryError::Platform {
                op: "RegOverridePredefKey",
                path: root.canonical_name().to_string(),
                source: io::Error::from_raw_os_error(status as i32),
            });
        }
        Ok(())
    }

    fn delete_tree(&self, base: PredefinedKey, path: &str) -> Result<(), RegistryError> {
        RegKey::predef(predefined_handle(base))
            .delete_subkey_all(path)
            .map_err(|err| {
                RegistryError::from_io("delete_tree", join(base.canonical_name(), path), err)
            })
    }
}

type DllRegisterServer = unsafe extern "system" fn() -> i32;

/// Calls `DllRegisterServer` on a component library inside this process.
#[derive(Default)]
pub struct SelfRegistrar;

impl Registrar for SelfRegistrar {
    fn register(&self, assembly: &Path) -> Result<()> {
        let wide: Vec<u16> = OsStr::new(assembly)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let module = unsafe { LoadLibraryW(wide.as_ptr()) };
        if module == 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("loading {}", assembly.display()));
        }

        // SAFETY: `module` was returned by LoadLibraryW above; the export
        // name is NUL-terminated.
        let export = unsafe { GetProcAddress(module, b"DllRegisterServer\0".as_ptr()) };
        let result = match export {
            Some(proc) => {
                // SAFETY: DllRegisterServer takes no arguments and returns an
                // HRESULT.
                let register: DllRegisterServer = unsafe { std::mem::transmute(proc) };
                let hresult = unsafe { register() };
                if hresult < 0 {
                    Err(anyhow::anyhow!(
                        "DllRegisterServer in {} failed with HRESULT 0x{:08X}",
                        assembly.display(),
                        hresult as u32
                    ))
                } else {
                    debug!(assembly = %assembly.display(), "DllRegisterServer succeeded");
                    Ok(())
                }
            }
            None => Err(anyhow::anyhow!(
                "{} does not export DllRegisterServer",
                assembly.display()
            )),
        };

        // SAFETY: releases the reference taken by LoadLibraryW.
        unsafe { FreeLibrary(module) };
        result
    }
}
