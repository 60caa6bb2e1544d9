#![allow(dead_code)]

use ecfg_harvest::{MemoryRegistry, PredefinedKey, ValueData};
use std::sync::{Mutex, MutexGuard, OnceLock};
use uuid::Uuid;

pub const PROCESS_ID: u32 = 4242;

pub const CATID_MAP_COMMANDS: &str = "{B56A7C42-83D4-11D2-A2E9-080009B6F22B}";
pub const CATID_EXTENSIONS: &str = "{7DD95801-9882-11CF-9FA9-00AA006C42C4}";
pub const CATID_EXCLUDED: &str = "{62C8FE65-4EBB-45E7-B440-6E39B2CDBF29}";

pub const CLSID_ZOOM_TOOL: &str = "{0AE30A10-3A8B-4F83-9B5F-6C2D8E1A7B01}";
pub const CLSID_PAN_TOOL: &str = "{5C1B3E42-8D7F-4A60-B2C9-9E0F1A2B3C02}";

pub const LIBID_WIDGETS: &str = "{A1B2C3D4-0000-4000-8000-0000000000AA}";

// Serializes tests that open the process-wide redirection scope.
pub struct ScopeGuard {
    _guard: MutexGuard<'static, ()>,
}

pub fn scope_guard() -> ScopeGuard {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let mutex = LOCK.get_or_init(|| Mutex::new(()));
    let guard = mutex.lock().unwrap_or_else(|err| err.into_inner());
    ScopeGuard { _guard: guard }
}

pub fn guid(text: &str) -> Uuid {
    Uuid::parse_str(text).expect("fixture guid")
}

pub fn modern_registry() -> MemoryRegistry {
    MemoryRegistry::new()
        .with_os_major(10)
        .with_process_id(PROCESS_ID)
}

pub fn legacy_registry() -> MemoryRegistry {
    MemoryRegistry::new()
        .with_os_major(5)
        .with_process_id(PROCESS_ID)
}

/// Writes the keys a COM class registration produces, through whatever
/// overrides are installed on `HKEY_CLASSES_ROOT`.
pub fn register_class(registry: &MemoryRegistry, class_id: &str, categories: &[&str]) {
    let class_key = format!(r"CLSID\{class_id}");
    registry.set_value(
        PredefinedKey::ClassesRoot,
        &class_key,
        "",
        ValueData::Text("Acme.Widgets.Tool".into()),
    );
    registry.set_value(
        PredefinedKey::ClassesRoot,
        &format!(r"{class_key}\InprocServer32"),
        "ThreadingModel",
        ValueData::Text("Both".into()),
    );
    for category in categories {
        registry.create_path(
            PredefinedKey::ClassesRoot,
            &format!(r"{class_key}\Implemented Categories\{category}"),
        );
    }
}

pub fn register_type_library(registry: &MemoryRegistry, libid: &str) {
    registry.set_value(
        PredefinedKey::ClassesRoot,
        &format!(r"TypeLib\{libid}\1.0"),
        "",
        ValueData::Text("Acme Widgets".into()),
    );
}

pub fn private_root(process_id: u32) -> String {
    ecfg_harvest::scope::private_path(process_id)
}
