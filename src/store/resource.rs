//! Lease-guarded resource store
//!
//! Values live in a backing file; the file's path doubles as the lock name.
//! Reads and writes are only reachable through a [`StoreGuard`], which holds
//! the lease for as long as it lives.

use super::backing::{BackingStore, JsonFileStore, KvHandle};
use crate::error::{DirLeaseError, IoResultExt, Result};
use crate::lock::{Lease, LeaseLock, ReleaseOutcome};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Extension of generated backing files
pub const STORE_EXTENSION: &str = "store";

static PATH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A keyed persistent store whose access is serialized by a [`LeaseLock`]
#[derive(Debug)]
pub struct ResourceStore<B: BackingStore = JsonFileStore> {
    path: PathBuf,
    lock: LeaseLock,
    backing: B,
    closed: AtomicBool,
}

impl<B: BackingStore + Clone> Clone for ResourceStore<B> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            lock: self.lock.clone(),
            backing: self.backing.clone(),
            closed: AtomicBool::new(self.is_closed()),
        }
    }
}

impl ResourceStore<JsonFileStore> {
    /// Create a store with a freshly generated path under `dir`.
    ///
    /// Nothing is written until the first `set`.
    pub fn create<P: AsRef<Path>>(dir: P, identity: &str, lock: LeaseLock) -> Self {
        Self::attach(generate_path(dir.as_ref(), identity), lock)
    }

    /// Attach to an existing (or not yet written) backing path
    pub fn attach<P: Into<PathBuf>>(path: P, lock: LeaseLock) -> Self {
        Self {
            path: path.into(),
            lock,
            backing: JsonFileStore,
            closed: AtomicBool::new(false),
        }
    }
}

impl<B: BackingStore> ResourceStore<B> {
    /// Use a different backing store implementation
    pub fn with_backing<C: BackingStore>(self, backing: C) -> ResourceStore<C> {
        ResourceStore {
            path: self.path,
            lock: self.lock,
            backing,
            closed: self.closed,
        }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock name guarding this store
    pub fn lock_name(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Whether the backing file has been written
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether a guard of this instance destroyed the store
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Acquire the store's lease.
    ///
    /// Fails with [`DirLeaseError::StoreClosed`] once the store was closed.
    pub fn acquire(&self) -> Result<StoreGuard<'_, B>> {
        if self.is_closed() {
            return Err(DirLeaseError::StoreClosed(self.path.clone()));
        }
        let guard = StoreGuard {
            store: self,
            lease: Some(self.lock.acquire(&self.lock_name())?),
        };
        // Closed by another guard while we waited
        if self.is_closed() {
            return Err(DirLeaseError::StoreClosed(self.path.clone()));
        }
        Ok(guard)
    }

    /// Acquire the lease, delete the backing file and release.
    ///
    /// Fails with [`DirLeaseError::StoreMissing`] if nothing was ever written.
    pub fn close(self) -> Result<()> {
        if !self.exists() {
            return Err(DirLeaseError::StoreMissing(self.path.clone()));
        }
        let guard = self.acquire()?;
        guard.close()
    }
}

/// Access to a [`ResourceStore`] while its lease is held.
///
/// Dropping the guard releases the lease.
#[derive(Debug)]
pub struct StoreGuard<'a, B: BackingStore = JsonFileStore> {
    store: &'a ResourceStore<B>,
    lease: Option<Lease>,
}

impl<'a, B: BackingStore> StoreGuard<'a, B> {
    /// The held lease
    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Read the value bound to `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let handle = self.store.backing.open(&self.store.path)?;
        let value = handle.get(key);
        handle.close()?;
        Ok(serde_json::from_value(value?)?)
    }

    /// Bind `key` to `value`
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut handle = self.store.backing.open(&self.store.path)?;
        handle.set(key, value)?;
        handle.close()
    }

    /// Unbind `key`; returns whether it was bound
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut handle = self.store.backing.open(&self.store.path)?;
        let removed = handle.remove(key)?;
        handle.close()?;
        Ok(removed)
    }

    /// Whether `key` is bound
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.keys()?.iter().any(|k| k == key))
    }

    /// All bound keys, sorted
    pub fn keys(&self) -> Result<Vec<String>> {
        let handle = self.store.backing.open(&self.store.path)?;
        let keys = handle.keys();
        handle.close()?;
        Ok(keys)
    }

    /// Release the lease
    pub fn release(mut self) -> ReleaseOutcome {
        self.finish()
    }

    /// Delete the backing file, then release the lease.
    ///
    /// The store is unusable afterwards. If the lease was reclaimed by
    /// someone else the file is left alone and
    /// [`DirLeaseError::LeaseLost`] is returned.
    pub fn close(mut self) -> Result<()> {
        let store = self.store;
        let owned = match &self.lease {
            Some(lease) => store.lock.is_owner(lease),
            None => false,
        };
        if !owned {
            // Nothing of ours left to release
            self.lease = None;
            tracing::warn!("Lease on {:?} was lost, not closing the store", store.path);
            return Err(DirLeaseError::LeaseLost(store.lock_name()));
        }

        let path = &store.path;
        if !path.exists() {
            return Err(DirLeaseError::StoreMissing(path.clone()));
        }
        std::fs::remove_file(path).with_path(path)?;
        store.closed.store(true, Ordering::SeqCst);
        tracing::info!("Closed store {:?}", path);
        self.finish();
        Ok(())
    }

    fn finish(&mut self) -> ReleaseOutcome {
        match self.lease.take() {
            Some(lease) => self.store.lock.release(&lease),
            None => ReleaseOutcome::NotOwner,
        }
    }
}

impl<B: BackingStore> Drop for StoreGuard<'_, B> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Generate a collision-resistant backing path for `identity` under `dir`
pub fn generate_path(dir: &Path, identity: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    PATH_COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
        .hash(&mut hasher);

    let stem: String = identity
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}_{:016x}.{}", stem, hasher.finish(), STORE_EXTENSION))
}
