//! # dirlease - Advisory Leases for Shared Filesystems
//!
//! dirlease provides a named mutual-exclusion lease that works between
//! processes on different hosts which share nothing but a filesystem, plus
//! a small key-value store whose access is serialized by that lease.
//!
//! ## Features
//!
//! - **Directory markers**: `mkdir` is the only atomic primitive required,
//!   so leases work over NFS, Lustre, GPFS and SMB
//! - **Liveness over safety**: a holder that stops renewing is reclaimed
//!   once its markers are older than the waiter's window
//! - **Safe release**: releasing checks ownership first, and never fails
//! - **Guarded store**: values are only reachable while the lease is held
//!
//! ## Quick Start
//!
//! ```no_run
//! use dirlease::lock::{LeaseLock, LockOptions};
//!
//! let lock = LeaseLock::with_options(LockOptions::from_wait_minutes(1.0));
//! let lease = lock.acquire("/shared/locks/jobA").unwrap();
//!
//! // ... exclusive work ...
//!
//! lock.release(&lease);
//! ```
//!
//! ## Guarded Store
//!
//! ```no_run
//! use dirlease::lock::LeaseLock;
//! use dirlease::store::ResourceStore;
//!
//! let store = ResourceStore::create("/shared/stores", "sweep", LeaseLock::new());
//! let guard = store.acquire().unwrap();
//! guard.set("ints", &[1, 2, 3]).unwrap();
//! let ints: Vec<i32> = guard.get("ints").unwrap();
//! guard.release();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod lock;
pub mod store;

// Re-export commonly used types
pub use config::LeaseConfig;
pub use error::{DirLeaseError, Result};
pub use lock::{AcquireOutcome, Lease, LeaseLock, LockOptions, ReleaseOutcome};
pub use store::{ResourceStore, StoreGuard};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use dirlease::prelude::*;
    //! ```

    pub use crate::config::LeaseConfig;
    pub use crate::error::{DirLeaseError, Result};
    pub use crate::lock::{
        AcquireOutcome, Clock, Lease, LeaseLock, LockOptions, LockStatus, ManualClock,
        ReleaseOutcome, SystemClock,
    };
    pub use crate::store::{BackingStore, JsonFileStore, KvHandle, ResourceStore, StoreGuard};
}
