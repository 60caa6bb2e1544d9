// Registry redirection setup/teardown guard rails.
#[path = "support/common.rs"]
mod common;

use anyhow::Result;
use ecfg_harvest::scope::OsGeneration;
use ecfg_harvest::{
    PredefinedKey, RegistryError, RegistryHost, RegistryNode, RegistryScope, ValueData,
};

use common::{PROCESS_ID, legacy_registry, modern_registry, private_root, scope_guard};

fn target_names(order: [PredefinedKey; 4]) -> Vec<String> {
    order
        .iter()
        .map(|root| root.canonical_name().to_string())
        .collect()
}

#[test]
fn modern_round_trip_leaves_no_residue() -> Result<()> {
    let _guard = scope_guard();
    let registry = modern_registry();
    let private = private_root(PROCESS_ID);

    let handle = RegistryScope::open(&registry, true)?;
    assert!(RegistryScope::is_active());
    assert_eq!(handle.generation(), OsGeneration::Modern);
    assert_eq!(handle.private_path(), Some(private.as_str()));
    assert_eq!(registry.override_count(), 4);

    // Every redirection target sits directly under the private path.
    assert_eq!(
        registry.physical_subkeys(PredefinedKey::CurrentUser, &private),
        target_names(OsGeneration::Modern.redirect_order())
    );
    assert!(registry.exists_physical(
        PredefinedKey::CurrentUser,
        &format!(r"{private}\HKEY_LOCAL_MACHINE\Software\Classes")
    ));

    registry.set_value(
        PredefinedKey::ClassesRoot,
        r"CLSID\{00000000-0000-0000-0000-000000000001}",
        "",
        ValueData::Text("probe".into()),
    );
    assert!(!registry.exists_physical(PredefinedKey::ClassesRoot, "CLSID"));

    RegistryScope::close(&registry, handle)?;
    assert!(!RegistryScope::is_active());
    assert_eq!(registry.override_count(), 0);
    assert!(!registry.exists_physical(PredefinedKey::CurrentUser, &private));
    assert!(!registry.exists_physical(PredefinedKey::ClassesRoot, "CLSID"));
    Ok(())
}

#[test]
fn legacy_layout_redirects_into_local_machine() -> Result<()> {
    let _guard = scope_guard();
    let registry = legacy_registry();
    let private = private_root(PROCESS_ID);

    let handle = RegistryScope::open(&registry, true)?;
    assert_eq!(handle.generation(), OsGeneration::Legacy);
    assert_eq!(
        registry.physical_subkeys(PredefinedKey::LocalMachine, &private),
        target_names(OsGeneration::Legacy.redirect_order())
    );
    assert!(!registry.exists_physical(PredefinedKey::CurrentUser, &private));
    assert!(!registry.exists_physical(
        PredefinedKey::LocalMachine,
        &format!(r"{private}\HKEY_LOCAL_MACHINE\Software")
    ));

    RegistryScope::close(&registry, handle)?;
    assert_eq!(registry.override_count(), 0);
    assert!(!registry.exists_physical(PredefinedKey::LocalMachine, &private));
    Ok(())
}

// Redirecting the base hive early makes later targets land inside it.
#[test]
fn redirecting_base_hive_first_nests_targets() -> Result<()> {
    let registry = modern_registry();
    let private = private_root(PROCESS_ID);

    let base_target = registry.create_key(
        PredefinedKey::CurrentUser,
        &format!(r"{private}\HKEY_CURRENT_USER"),
    )?;
    registry.override_predefined(PredefinedKey::CurrentUser, Some(&base_target))?;
    drop(base_target);
    let classes_target = registry.create_key(
        PredefinedKey::CurrentUser,
        &format!(r"{private}\HKEY_CLASSES_ROOT"),
    )?;
    drop(classes_target);
    registry.override_predefined(PredefinedKey::CurrentUser, None)?;

    assert!(!registry.exists_physical(
        PredefinedKey::CurrentUser,
        &format!(r"{private}\HKEY_CLASSES_ROOT")
    ));
    assert!(registry.exists_physical(
        PredefinedKey::CurrentUser,
        &format!(r"{private}\HKEY_CURRENT_USER\{private}\HKEY_CLASSES_ROOT")
    ));
    Ok(())
}

#[test]
fn failed_override_rolls_back_installed_roots() -> Result<()> {
    let _guard = scope_guard();
    let private = private_root(PROCESS_ID);

    for failing in [PredefinedKey::Users, PredefinedKey::CurrentUser] {
        let registry = modern_registry();
        registry.fail_override_of(failing);

        let err = RegistryScope::open(&registry, true).unwrap_err();
        assert!(matches!(err, RegistryError::Injected { .. }), "{err}");
        assert_eq!(registry.override_count(), 0);
        assert!(!registry.exists_physical(PredefinedKey::CurrentUser, &private));
        assert!(!RegistryScope::is_active());
    }

    let registry = modern_registry();
    let handle = RegistryScope::open(&registry, true)?;
    RegistryScope::close(&registry, handle)?;
    Ok(())
}

#[test]
fn stale_private_tree_is_replaced() -> Result<()> {
    let _guard = scope_guard();
    let registry = modern_registry();
    let private = private_root(PROCESS_ID);
    registry.set_value(
        PredefinedKey::CurrentUser,
        &format!(r"{private}\HKEY_CLASSES_ROOT\Leftover"),
        "stale",
        ValueData::Int32(1),
    );

    let handle = RegistryScope::open(&registry, true)?;
    let classes = registry.open_predefined(PredefinedKey::ClassesRoot)?;
    assert!(classes.subkey_names()?.is_empty());

    RegistryScope::close(&registry, handle)?;
    assert!(!registry.exists_physical(PredefinedKey::CurrentUser, &private));
    Ok(())
}

#[test]
fn stale_tree_deletion_failure_is_fatal() {
    let _guard = scope_guard();
    let registry = modern_registry();
    registry.fail_deletes(true);

    let err = RegistryScope::open(&registry, true).unwrap_err();
    assert!(!err.is_not_found());
    assert_eq!(registry.override_count(), 0);
    assert!(!RegistryScope::is_active());
}

#[test]
fn close_restores_every_root_even_when_delete_fails() -> Result<()> {
    let _guard = scope_guard();
    let registry = modern_registry();
    let handle = RegistryScope::open(&registry, true)?;

    registry.fail_deletes(true);
    let err = RegistryScope::close(&registry, handle).unwrap_err();
    assert!(matches!(err, RegistryError::Injected { op: "delete_tree", .. }));
    assert_eq!(registry.override_count(), 0);
    assert!(!RegistryScope::is_active());
    Ok(())
}

#[test]
fn only_one_scope_per_process() -> Result<()> {
    let _guard = scope_guard();
    let first = modern_registry();
    let second = legacy_registry().with_process_id(PROCESS_ID + 1);

    let handle = RegistryScope::open(&first, true)?;
    let err = RegistryScope::open(&second, true).unwrap_err();
    assert!(matches!(err, RegistryError::ScopeActive));
    assert_eq!(second.override_count(), 0);

    RegistryScope::close(&first, handle)?;
    let handle = RegistryScope::open(&second, true)?;
    RegistryScope::close(&second, handle)?;
    Ok(())
}

#[test]
fn unmapped_scope_touches_nothing() -> Result<()> {
    let _guard = scope_guard();
    let registry = modern_registry();

    let handle = RegistryScope::open(&registry, false)?;
    assert!(!handle.is_remapped());
    assert!(handle.installed_overrides().is_empty());
    assert!(!RegistryScope::is_active());
    assert_eq!(registry.override_count(), 0);
    assert!(registry.physical_subkeys(PredefinedKey::CurrentUser, "").is_empty());

    RegistryScope::close(&registry, handle)?;
    Ok(())
}
