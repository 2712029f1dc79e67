//! Package records and the storage they live in.
//!
//! Storage is deliberately dumb: a [`PackageStore`] maps names to records and
//! nothing more. The only thing it adds is [`LockedStore`], a single
//! reader/writer lock over the whole mapping. The [`crate::indexer::Indexer`]
//! takes that lock once per logical operation and enforces every integrity
//! rule itself.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// One indexed package plus both directions of its dependency edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    name: String,
    dependencies: BTreeSet<String>,
    dependents: BTreeSet<String>,
}

impl Package {
    /// Creates a record with the given dependencies and no dependents.
    pub fn new(name: impl Into<String>, dependencies: BTreeSet<String>) -> Self {
        Self {
            name: name.into(),
            dependencies,
            dependents: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names this package declared when it was indexed. Never changes afterwards.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Names of stored packages that list this one as a dependency.
    pub fn dependents(&self) -> &BTreeSet<String> {
        &self.dependents
    }

    pub fn has_dependents(&self) -> bool {
        !self.dependents.is_empty()
    }

    pub(crate) fn insert_dependent(&mut self, dependent: &str) {
        self.dependents.insert(dependent.to_string());
    }

    pub(crate) fn remove_dependent(&mut self, dependent: &str) {
        self.dependents.remove(dependent);
    }
}

/// Name-keyed storage for package records.
///
/// Implementations hold no business rules and do no locking of their own;
/// wrap them in a [`LockedStore`] to share them. Alternate backings (sharded,
/// persistent) only need to provide these calls.
pub trait PackageStore: Send + Sync {
    fn get(&self, name: &str) -> Option<&Package>;

    fn get_mut(&mut self, name: &str) -> Option<&mut Package>;

    /// Inserts the record, replacing any existing record with the same name.
    fn put(&mut self, package: Package);

    /// Removes the record if present; absent names are a no-op.
    fn delete(&mut self, name: &str) -> Option<Package>;

    fn size(&self) -> usize;

    /// Every stored record, in no particular order.
    fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_>;

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// [`PackageStore`] backed by a standard `HashMap`.
#[derive(Debug, Default)]
pub struct MapStore {
    packages: HashMap<String, Package>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageStore for MapStore {
    fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.get_mut(name)
    }

    fn put(&mut self, package: Package) {
        self.packages.insert(package.name.clone(), package);
    }

    fn delete(&mut self, name: &str) -> Option<Package> {
        self.packages.remove(name)
    }

    fn size(&self) -> usize {
        self.packages.len()
    }

    fn packages(&self) -> Box<dyn Iterator<Item = &Package> + '_> {
        Box::new(self.packages.values())
    }
}

/// A store behind one reader/writer lock covering the entire mapping.
///
/// `read` hands out the shared lock, `write` the exclusive one. Callers are
/// expected to hold a single guard for a whole check-then-mutate sequence.
#[derive(Debug, Default)]
pub struct LockedStore<S> {
    inner: RwLock<S>,
}

impl<S: PackageStore> LockedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: RwLock::new(store),
        }
    }

    /// A poisoned lock means a writer panicked on a broken invariant, so the
    /// contents can no longer be trusted.
    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.inner.read().expect("package store lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.inner.write().expect("package store lock poisoned")
    }
}
