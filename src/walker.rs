//! Recursive registry snapshot.

use crate::host::RegistryNode;
use crate::root::{HKCR_PATH_IN_HKLM, resolve};
use crate::value::RegistryValue;
use anyhow::{Context, Result};

/// Capture `start` and everything below it.
///
/// Traversal is depth-first post-order: every subkey is captured before the
/// values of its parent. Keys without subkeys or values yield one empty-key
/// marker unless they resolve to a root or to `Software\Classes`.
pub fn walk<K: RegistryNode>(start: &K) -> Result<Vec<RegistryValue>> {
    let mut observations = Vec::new();
    walk_into(start, &mut observations)?;
    Ok(observations)
}

fn walk_into<K: RegistryNode>(key: &K, observations: &mut Vec<RegistryValue>) -> Result<()> {
    let subkeys = key
        .subkey_names()
        .with_context(|| format!("enumerating subkeys of {}", key.name()))?;
    for name in &subkeys {
        let subkey = key
            .open_subkey(name)
            .with_context(|| format!("opening {}\\{name}", key.name()))?;
        walk_into(&subkey, observations)?;
    }

    let resolved = resolve(key.name())?;
    let values = key
        .values()
        .with_context(|| format!("reading values of {}", key.name()))?;
    let value_count = values.len();

    for (value_name, data) in values {
        observations.push(RegistryValue::new(
            resolved.root,
            key.name(),
            &value_name,
            data,
        ));
    }

    if subkeys.is_empty()
        && value_count == 0
        && !resolved.suffix.is_empty()
        && !resolved.suffix.eq_ignore_ascii_case(HKCR_PATH_IN_HKLM)
    {
        observations.push(RegistryValue::empty_key(resolved.root, key.name()));
    }

    Ok(())
}
