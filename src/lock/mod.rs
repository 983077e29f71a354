//! Cross-host advisory lease lock
//!
//! Provides a named lock that works on any shared filesystem where
//! directory creation is atomic (NFS, Lustre, GPFS, SMB):
//! - Two marker directories per lock name
//! - Timeout-based reclaim of abandoned leases
//! - Ownership checked on release, so a stale holder never removes a new
//!   holder's markers
//! - Injectable clock for deterministic polling

mod clock;
mod lease;
mod marker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use lease::{
    AcquireOutcome, Lease, LeaseLock, LockOptions, LockStatus, ReleaseOutcome,
    DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT,
};
pub use marker::{is_stale, Epoch, MarkerPaths, MarkerTimes, PRIMARY_SUFFIX, SECONDARY_SUFFIX};
