//! Dependency-aware package index.
//!
//! The [`Indexer`] is the only code that mutates a [`PackageStore`]. Each of
//! [`Indexer::add`], [`Indexer::query`] and [`Indexer::remove`] takes the
//! store lock exactly once and makes its check and its mutation under that
//! one guard, so no other operation can slip in between them.
//!
//! After every completed operation:
//!
//! 1. every dependency of a stored package is itself stored;
//! 2. each package's dependents are exactly the stored packages that list it
//!    as a dependency;
//! 3. a package is only removed while it has no dependents.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use crate::store::{LockedStore, MapStore, Package, PackageStore};

pub struct Indexer<S = MapStore> {
    store: LockedStore<S>,
}

impl Indexer<MapStore> {
    /// Creates an empty index backed by a [`MapStore`].
    pub fn new() -> Self {
        Self::with_store(MapStore::new())
    }
}

impl Default for Indexer<MapStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PackageStore> Indexer<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store: LockedStore::new(store),
        }
    }

    /// Indexes `name` with the given dependencies.
    ///
    /// Returns `false` without touching anything when a dependency is not
    /// indexed. Re-indexing an existing name succeeds and changes nothing,
    /// even if the dependency list differs from the original one.
    pub fn add<I, D>(&self, name: &str, dependencies: I) -> bool
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        let dependencies: BTreeSet<String> = dependencies.into_iter().map(Into::into).collect();
        let mut store = self.store.write();

        if let Some(missing) = dependencies.iter().find(|dep| !store.contains(dep)) {
            debug!(package = name, dependency = %missing, "index rejected, dependency missing");
            return false;
        }

        if store.contains(name) {
            return true;
        }

        for dependency in &dependencies {
            stored_mut(&mut *store, dependency, name).insert_dependent(name);
        }
        store.put(Package::new(name, dependencies));
        true
    }

    /// Reports whether `name` is indexed.
    pub fn query(&self, name: &str) -> bool {
        self.store.read().contains(name)
    }

    /// Removes `name` from the index.
    ///
    /// Absent names succeed as a no-op. Returns `false` without touching
    /// anything while another indexed package still depends on `name`.
    pub fn remove(&self, name: &str) -> bool {
        let mut store = self.store.write();

        match store.get(name) {
            None => return true,
            Some(package) if package.has_dependents() => {
                debug!(
                    package = name,
                    dependents = package.dependents().len(),
                    "remove rejected, package has dependents"
                );
                return false;
            }
            Some(_) => {}
        }

        let Some(removed) = store.delete(name) else {
            return true;
        };
        for dependency in removed.dependencies() {
            stored_mut(&mut *store, dependency, name).remove_dependent(name);
        }
        true
    }

    /// Number of indexed packages.
    pub fn len(&self) -> usize {
        self.store.read().size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every record out under the shared lock, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, Package> {
        self.store
            .read()
            .packages()
            .map(|package| (package.name().to_string(), package.clone()))
            .collect()
    }

    /// Checks that forward and reverse edges agree across the whole index.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let store = self.store.read();

        for package in store.packages() {
            for dependency in package.dependencies() {
                match store.get(dependency) {
                    None => {
                        return Err(IntegrityError::DanglingDependency {
                            package: package.name().to_string(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(target) if !target.dependents().contains(package.name()) => {
                        return Err(IntegrityError::MissingDependent {
                            package: dependency.clone(),
                            dependent: package.name().to_string(),
                        });
                    }
                    Some(_) => {}
                }
            }

            for dependent in package.dependents() {
                let declares_edge = store
                    .get(dependent)
                    .is_some_and(|source| source.dependencies().contains(package.name()));
                if !declares_edge {
                    return Err(IntegrityError::StaleDependent {
                        package: package.name().to_string(),
                        dependent: dependent.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A disagreement between the forward and reverse dependency edges.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("{package} depends on {dependency}, which is not indexed")]
    DanglingDependency { package: String, dependency: String },
    #[error("{dependent} depends on {package}, but {package} does not list it as a dependent")]
    MissingDependent { package: String, dependent: String },
    #[error("{package} lists {dependent} as a dependent, but {dependent} does not depend on it")]
    StaleDependent { package: String, dependent: String },
}

/// Looks up a record that the integrity rules guarantee is present.
///
/// Must only be called while holding the write guard. A miss means the
/// locking discipline is broken, so it panics instead of carrying on.
fn stored_mut<'a, S: PackageStore>(
    store: &'a mut S,
    name: &str,
    referenced_by: &str,
) -> &'a mut Package {
    match store.get_mut(name) {
        Some(package) => package,
        None => panic!(
            "index invariant violated: {name} (referenced by {referenced_by}) is not stored"
        ),
    }
}
