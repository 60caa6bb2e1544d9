//! In-memory registry used by tests and dry runs.
//!
//! Keeps four physical hives as ordered trees (subkeys and values keep their
//! insertion order, names compare ASCII case-insensitively) and an override
//! table with the same semantics as `RegOverridePredefKey`: an override binds
//! a predefined root to the physical location of a key at install time, and
//! every later open of that root, including creates relative to it, lands
//! there.

use crate::host::{RegistryError, RegistryHost, RegistryNode};
use crate::root::{PredefinedKey, join};
use crate::value::ValueData;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

const DEFAULT_OS_MAJOR: u32 = 10;

#[derive(Clone, Debug, Default)]
struct Node {
    name: String,
    subkeys: Vec<Node>,
    values: Vec<(String, ValueData)>,
}

impl Node {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.subkeys
            .iter()
            .find(|node| node.name.eq_ignore_ascii_case(name))
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.subkeys
            .iter_mut()
            .find(|node| node.name.eq_ignore_ascii_case(name))
    }

    fn child_or_insert(&mut self, name: &str) -> &mut Node {
        let idx = match self
            .subkeys
            .iter()
            .position(|node| node.name.eq_ignore_ascii_case(name))
        {
            Some(idx) => idx,
            None => {
                self.subkeys.push(Node::named(name));
                self.subkeys.len() - 1
            }
        };
        &mut self.subkeys[idx]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Location {
    hive: PredefinedKey,
    segments: Vec<String>,
}

impl Location {
    fn hive_root(hive: PredefinedKey) -> Self {
        Self {
            hive,
            segments: Vec::new(),
        }
    }

    fn descend(&self, path: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            path.split('\\')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string),
        );
        Self {
            hive: self.hive,
            segments,
        }
    }

    fn display(&self) -> String {
        let mut path = self.hive.canonical_name().to_string();
        for segment in &self.segments {
            path = join(&path, segment);
        }
        path
    }
}

#[derive(Debug)]
struct State {
    hives: BTreeMap<PredefinedKey, Node>,
    overrides: BTreeMap<PredefinedKey, Location>,
    os_major: u32,
    process_id: u32,
    failing_overrides: BTreeSet<PredefinedKey>,
    failing_deletes: bool,
}

impl State {
    fn resolve(&self, base: PredefinedKey, path: &str) -> Location {
        self.overrides
            .get(&base)
            .cloned()
            .unwrap_or_else(|| Location::hive_root(base))
            .descend(path)
    }

    fn node(&self, location: &Location) -> Option<&Node> {
        let mut node = self.hives.get(&location.hive)?;
        for segment in &location.segments {
            node = node.child(segment)?;
        }
        Some(node)
    }

    fn node_mut_or_create(&mut self, location: &Location) -> &mut Node {
        let mut node = self
            .hives
            .entry(location.hive)
            .or_insert_with(|| Node::named(location.hive.canonical_name()));
        for segment in &location.segments {
            node = node.child_or_insert(segment);
        }
        node
    }

    fn remove(&mut self, location: &Location) -> Result<(), RegistryError> {
        let not_found = || RegistryError::NotFound {
            path: location.display(),
        };
        let Some((last, parents)) = location.segments.split_last() else {
            return Err(RegistryError::Platform {
                op: "delete_tree",
                path: location.display(),
                source: std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "cannot delete a hive root",
                ),
            });
        };
        let mut node = self.hives.get_mut(&location.hive).ok_or_else(not_found)?;
        for segment in parents {
            node = node.child_mut(segment).ok_or_else(not_found)?;
        }
        let idx = node
            .subkeys
            .iter()
            .position(|child| child.name.eq_ignore_ascii_case(last))
            .ok_or_else(not_found)?;
        node.subkeys.remove(idx);
        Ok(())
    }
}

/// Shared handle to an in-memory registry; clones see the same state.
#[derive(Clone, Debug)]
pub struct MemoryRegistry {
    state: Rc<RefCell<State>>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let hives = PredefinedKey::ALL
            .into_iter()
            .map(|hive| (hive, Node::named(hive.canonical_name())))
            .collect();
        Self {
            state: Rc::new(RefCell::new(State {
                hives,
                overrides: BTreeMap::new(),
                os_major: DEFAULT_OS_MAJOR,
                process_id: std::process::id(),
                failing_overrides: BTreeSet::new(),
                failing_deletes: false,
            })),
        }
    }

    pub fn with_os_major(self, major: u32) -> Self {
        self.state.borrow_mut().os_major = major;
        self
    }

    pub fn with_process_id(self, process_id: u32) -> Self {
        self.state.borrow_mut().process_id = process_id;
        self
    }

    /// Make the next attempts to install an override for `root` fail.
    pub fn fail_override_of(&self, root: PredefinedKey) {
        self.state.borrow_mut().failing_overrides.insert(root);
    }

    /// Make every `delete_tree` call fail with a platform-style error.
    pub fn fail_deletes(&self, enabled: bool) {
        self.state.borrow_mut().failing_deletes = enabled;
    }

    /// Write a value, resolving `root` through installed overrides.
    pub fn set_value(&self, root: PredefinedKey, path: &str, name: &str, data: ValueData) {
        let mut state = self.state.borrow_mut();
        let location = state.resolve(root, path);
        let node = state.node_mut_or_create(&location);
        match node
            .values
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, slot)) => *slot = data,
            None => node.values.push((name.to_string(), data)),
        }
    }

    /// Create a key (and its parents), resolving `root` through overrides.
    pub fn create_path(&self, root: PredefinedKey, path: &str) {
        let mut state = self.state.borrow_mut();
        let location = state.resolve(root, path);
        state.node_mut_or_create(&location);
    }

    /// Whether `path` exists in the physical hive, ignoring overrides.
    pub fn exists_physical(&self, hive: PredefinedKey, path: &str) -> bool {
        let state = self.state.borrow();
        state.node(&Location::hive_root(hive).descend(path)).is_some()
    }

    /// Subkey names of a physical key, ignoring overrides.
    pub fn physical_subkeys(&self, hive: PredefinedKey, path: &str) -> Vec<String> {
        let state = self.state.borrow();
        state
            .node(&Location::hive_root(hive).descend(path))
            .map(|node| node.subkeys.iter().map(|child| child.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_overridden(&self, root: PredefinedKey) -> bool {
        self.state.borrow().overrides.contains_key(&root)
    }

    pub fn override_count(&self) -> usize {
        self.state.borrow().overrides.len()
    }
}

/// Key handle into a `MemoryRegistry`.
#[derive(Debug)]
pub struct MemoryKey {
    registry: MemoryRegistry,
    location: Location,
    name: String,
}

impl MemoryKey {
    fn with_node<T>(&self, f: impl FnOnce(&Node) -> T) -> Result<T, RegistryError> {
        let state = self.registry.state.borrow();
        let node = state
            .node(&self.location)
            .ok_or_else(|| RegistryError::NotFound {
                path: self.name.clone(),
            })?;
        Ok(f(node))
    }
}

impl RegistryNode for MemoryKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn subkey_names(&self) -> Result<Vec<String>, RegistryError> {
        self.with_node(|node| node.subkeys.iter().map(|child| child.name.clone()).collect())
    }

    fn open_subkey(&self, name: &str) -> Result<Self, RegistryError> {
        let exists = self.with_node(|node| node.child(name).is_some())?;
        if !exists {
            return Err(RegistryError::NotFound {
                path: join(&self.name, name),
            });
        }
        Ok(MemoryKey {
            registry: self.registry.clone(),
            location: self.location.descend(name),
            name: join(&self.name, name),
        })
    }

    fn values(&self) -> Result<Vec<(String, ValueData)>, RegistryError> {
        self.with_node(|node| node.values.clone())
    }
}

impl RegistryHost for MemoryRegistry {
    type Key = MemoryKey;

    fn os_major_version(&self) -> u32 {
        self.state.borrow().os_major
    }

    fn process_id(&self) -> u32 {
        self.state.borrow().process_id
    }

    fn open_predefined(&self, root: PredefinedKey) -> Result<MemoryKey, RegistryError> {
        let location = self.state.borrow().resolve(root, "");
        let key = MemoryKey {
            registry: self.clone(),
            location,
            name: root.canonical_name().to_string(),
        };
        key.with_node(|_| ())?;
        Ok(key)
    }

    fn create_key(&self, base: PredefinedKey, path: &str) -> Result<MemoryKey, RegistryError> {
        let location = {
            let mut state = self.state.borrow_mut();
            let location = state.resolve(base, path);
            state.node_mut_or_create(&location);
            location
        };
        Ok(MemoryKey {
            registry: self.clone(),
            location,
            name: join(base.canonical_name(), path.trim_matches('\\')),
        })
    }

    fn override_predefined(
        &self,
        root: PredefinedKey,
        target: Option<&MemoryKey>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.borrow_mut();
        match target {
            Some(key) => {
                if state.failing_overrides.contains(&root) {
                    return Err(RegistryError::Injected {
                        op: "override_predefined",
                        path: root.canonical_name().to_string(),
                    });
                }
                state.overrides.insert(root, key.location.clone());
            }
            None => {
                state.overrides.remove(&root);
            }
        }
        Ok(())
    }

    fn delete_tree(&self, base: PredefinedKey, path: &str) -> Result<(), RegistryError> {
        let mut state = self.state.borrow_mut();
        if state.failing_deletes {
            return Err(RegistryError::Injected {
                op: "delete_tree",
                path: join(base.canonical_name(), path),
            });
        }
        let location = state.resolve(base, path);
        state.remove(&location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_ignore_ascii_case_and_keep_insertion_order() {
        let registry = MemoryRegistry::new();
        registry.create_path(PredefinedKey::ClassesRoot, r"CLSID\Zeta");
        registry.create_path(PredefinedKey::ClassesRoot, r"clsid\Alpha");
        assert_eq!(
            registry.physical_subkeys(PredefinedKey::ClassesRoot, "CLSID"),
            vec!["Zeta".to_string(), "Alpha".to_string()]
        );
        assert!(registry.exists_physical(PredefinedKey::ClassesRoot, r"Clsid\ZETA"));
    }

    #[test]
    fn override_redirects_opens_and_creates() {
        let registry = MemoryRegistry::new();
        let target = registry
            .create_key(PredefinedKey::CurrentUser, r"Sandbox\HKEY_CLASSES_ROOT")
            .unwrap();
        registry
            .override_predefined(PredefinedKey::ClassesRoot, Some(&target))
            .unwrap();
        drop(target);

        registry.set_value(
            PredefinedKey::ClassesRoot,
            "CLSID",
            "",
            ValueData::Text("x".into()),
        );
        assert!(!registry.exists_physical(PredefinedKey::ClassesRoot, "CLSID"));
        assert!(registry.exists_physical(
            PredefinedKey::CurrentUser,
            r"Sandbox\HKEY_CLASSES_ROOT\CLSID"
        ));

        let root = registry.open_predefined(PredefinedKey::ClassesRoot).unwrap();
        assert_eq!(root.name(), "HKEY_CLASSES_ROOT");
        assert_eq!(root.subkey_names().unwrap(), vec!["CLSID".to_string()]);

        registry
            .override_predefined(PredefinedKey::ClassesRoot, None)
            .unwrap();
        assert_eq!(registry.override_count(), 0);
    }

    #[test]
    fn delete_tree_reports_missing_keys() {
        let registry = MemoryRegistry::new();
        let err = registry
            .delete_tree(PredefinedKey::CurrentUser, r"Software\Missing")
            .unwrap_err();
        assert!(err.is_not_found());

        registry.create_path(PredefinedKey::CurrentUser, r"Software\Present\Child");
        registry
            .delete_tree(PredefinedKey::CurrentUser, r"Software\Present")
            .unwrap();
        assert!(!registry.exists_physical(PredefinedKey::CurrentUser, r"Software\Present"));
        assert!(registry.exists_physical(PredefinedKey::CurrentUser, "Software"));
    }

    #[test]
    fn deleted_key_handles_report_not_found() {
        let registry = MemoryRegistry::new();
        let key = registry
            .create_key(PredefinedKey::Users, r"S-1-5\Volatile")
            .unwrap();
        registry.delete_tree(PredefinedKey::Users, "S-1-5").unwrap();
        assert!(key.values().unwrap_err().is_not_found());
    }
}
