//! Component category extraction from a registry snapshot.
//!
//! Category registrations have the physical shape
//! `...\<CLSID>\Implemented Categories\<CATID>`; both GUIDs are read
//! positionally from the end of the key name.

use crate::root::{LogicalRoot, path_segments, resolve};
use crate::value::RegistryValue;
use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use uuid::{Uuid, uuid};

/// Marker substring identifying category registrations.
pub const IMPLEMENTED_CATEGORIES: &str = "Implemented Categories";

/// Categories that are never reported.
pub const EXCLUDED_CATEGORIES: &[Uuid] = &[uuid!("62C8FE65-4EBB-45e7-B440-6E39B2CDBF29")];

const CATEGORY_OFFSET_FROM_END: usize = 0;
const CLASS_OFFSET_FROM_END: usize = 2;

/// Category GUID to implementing class GUIDs, in discovery order.
pub type CategoryMap = IndexMap<Uuid, Vec<Uuid>>;

/// Fold observations into a category map.
///
/// Duplicate class ids are kept. Any malformed GUID in a category
/// registration aborts the extraction.
pub fn extract(observations: &[RegistryValue]) -> Result<CategoryMap> {
    let mut categories = CategoryMap::new();

    for observation in observations {
        let key_name = observation.key_name.as_str();
        if !key_name.contains(IMPLEMENTED_CATEGORIES) {
            continue;
        }

        let category = guid_from_end(key_name, CATEGORY_OFFSET_FROM_END)
            .with_context(|| format!("reading category id from {key_name}"))?;
        if EXCLUDED_CATEGORIES.contains(&category) {
            continue;
        }

        let class_id = guid_from_end(key_name, CLASS_OFFSET_FROM_END)
            .with_context(|| format!("reading class id from {key_name}"))?;

        categories.entry(category).or_default().push(class_id);
    }

    Ok(categories)
}

/// Parse the path segment `offset` positions before the last one.
///
/// Fails when the path has too few segments or the segment is not a GUID.
pub fn guid_from_end(key_name: &str, offset: usize) -> Result<Uuid> {
    let segments = path_segments(key_name);
    if segments.len() <= offset {
        bail!(
            "key {key_name} has {} segments; expected at least {}",
            segments.len(),
            offset + 1
        );
    }
    let segment = segments[segments.len() - 1 - offset];
    Uuid::parse_str(segment).with_context(|| format!("'{segment}' is not a GUID"))
}

/// First type library id registered under `HKEY_CLASSES_ROOT\TypeLib`.
///
/// Used as the assembly identity when none is supplied.
pub fn discover_type_library(observations: &[RegistryValue]) -> Option<Uuid> {
    observations.iter().find_map(|observation| {
        if observation.root != LogicalRoot::ClassesRoot {
            return None;
        }
        let resolved = resolve(&observation.key_name).ok()?;
        let mut segments = resolved.suffix.split('\\');
        let head = segments.next()?;
        if !head.eq_ignore_ascii_case("TypeLib") {
            return None;
        }
        Uuid::parse_str(segments.next()?).ok()
    })
}
