//! Lease lock built on marker directories
//!
//! Acquisition creates the primary then the secondary marker. A holder that
//! disappears is reclaimed once both markers are older than the caller's
//! window. Ownership is the secondary marker's [`Epoch`] captured at
//! acquisition: release only removes markers whose epoch still matches.
//! Both markers' mtimes are stamped with the lock's clock on creation and
//! renewal, so staleness is measured in the same time base as "now".

use super::clock::{Clock, SystemClock};
use super::marker::{is_stale, remove_marker, stamp_markers, Epoch, MarkerPaths};
use crate::error::{DirLeaseError, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Default acquisition window (five minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default delay between acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for a [`LeaseLock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// Acquisition window, also used as the staleness threshold
    pub timeout: Duration,
    /// Sleep between attempts
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LockOptions {
    /// Options with a window expressed in minutes.
    ///
    /// Negative or NaN values mean no waiting; values too large for a
    /// [`Duration`] saturate to [`Duration::MAX`].
    pub fn from_wait_minutes(minutes: f64) -> Self {
        let timeout = if minutes.is_nan() || minutes <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(minutes * 60.0).unwrap_or(Duration::MAX)
        };
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Set the acquisition window
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// How a lease was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireOutcome {
    /// Markers were free and created normally
    Acquired,
    /// Stale markers were forcibly taken over
    Reclaimed,
}

/// Result of releasing a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    /// Markers belonged to this lease and were removed
    Released,
    /// The lease had already been reclaimed or released; nothing was touched
    NotOwner,
}

/// Proof of holding a lock, returned by [`LeaseLock::acquire`]
#[derive(Debug, Clone)]
pub struct Lease {
    name: String,
    markers: MarkerPaths,
    epoch: Epoch,
    outcome: AcquireOutcome,
    acquired_at: SystemTime,
    holder: String,
}

impl Lease {
    /// Lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marker directories of the lock
    pub fn markers(&self) -> &MarkerPaths {
        &self.markers
    }

    /// Secondary marker identity recorded at acquisition (or last renewal)
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether the lease was acquired normally or by reclaiming
    pub fn outcome(&self) -> AcquireOutcome {
        self.outcome
    }

    /// Whether the lease was obtained by reclaiming a stale lock
    pub fn was_reclaimed(&self) -> bool {
        self.outcome == AcquireOutcome::Reclaimed
    }

    /// Clock time when the lease was obtained
    pub fn acquired_at(&self) -> SystemTime {
        self.acquired_at
    }

    /// `hostname:pid` of the process that obtained the lease
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

/// Snapshot of a lock's on-disk state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatus {
    /// Lock name
    pub name: String,
    /// Primary marker path
    pub primary: PathBuf,
    /// Secondary marker path
    pub secondary: PathBuf,
    /// Primary marker mtime, if it exists
    pub primary_modified: Option<SystemTime>,
    /// Secondary marker mtime, if it exists
    pub secondary_modified: Option<SystemTime>,
    /// Age of the newest marker
    pub age: Option<Duration>,
    /// Window the staleness verdict was computed against
    pub window: Duration,
    /// Whether the lock is held (primary marker exists)
    pub held: bool,
    /// Whether a waiter would reclaim it right now
    pub stale: bool,
}

enum Attempt {
    Won(Epoch),
    Busy(String),
}

/// A named, timeout-based lock over marker directories on a shared filesystem.
///
/// Cloning is cheap; clones share the clock.
#[derive(Debug, Clone)]
pub struct LeaseLock {
    options: LockOptions,
    clock: Arc<dyn Clock>,
}

impl Default for LeaseLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseLock {
    /// Lock with default options and the system clock
    pub fn new() -> Self {
        Self::with_options(LockOptions::default())
    }

    /// Lock with custom options and the system clock
    pub fn with_options(options: LockOptions) -> Self {
        Self {
            options,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured options
    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquire `name` within the configured window
    pub fn acquire(&self, name: &str) -> Result<Lease> {
        self.acquire_within(name, self.options.timeout)
    }

    /// Acquire `name`, polling for at most `timeout`.
    ///
    /// The same `timeout` is the staleness threshold: markers whose newest
    /// mtime is older than `timeout` are deleted and recreated, and the
    /// lease is returned with [`AcquireOutcome::Reclaimed`].
    pub fn acquire_within(&self, name: &str, timeout: Duration) -> Result<Lease> {
        let markers = MarkerPaths::for_name(name)?;
        let start = self.clock.now();
        let mut attempts = 0u64;
        let mut last_state = None;

        loop {
            attempts += 1;
            tracing::debug!("Attempt {} to acquire '{}'", attempts, name);

            match self.try_create(&markers)? {
                Attempt::Won(epoch) => {
                    return Ok(self.grant(name, markers, epoch, AcquireOutcome::Acquired));
                }
                Attempt::Busy(state) => last_state = Some(state),
            }

            match self.try_reclaim(&markers, timeout)? {
                Attempt::Won(epoch) => {
                    return Ok(self.grant(name, markers, epoch, AcquireOutcome::Reclaimed));
                }
                Attempt::Busy(state) => last_state = Some(state),
            }

            let elapsed = self.elapsed_since(start);
            if elapsed >= timeout {
                break;
            }
            // Last sleep ends at the deadline so one final attempt lands on it
            self.clock.sleep(self.options.poll_interval.min(timeout - elapsed));
        }

        tracing::debug!("Giving up on '{}' after {} attempts", name, attempts);
        Err(DirLeaseError::AcquireTimeout {
            name: name.to_string(),
            waited: timeout,
            last_error: last_state,
        })
    }

    /// Release a lease. Never fails.
    ///
    /// Markers are removed only if the secondary marker still carries the
    /// lease's epoch; a lease that was reclaimed by someone else, or already
    /// released, yields [`ReleaseOutcome::NotOwner`].
    pub fn release(&self, lease: &Lease) -> ReleaseOutcome {
        if !self.is_owner(lease) {
            tracing::debug!("Lease on '{}' no longer owned, release is a no-op", lease.name);
            return ReleaseOutcome::NotOwner;
        }

        if let Err(e) = remove_marker(&lease.markers.secondary) {
            tracing::warn!("Failed to remove {:?}: {}", lease.markers.secondary, e);
        }
        if let Err(e) = remove_marker(&lease.markers.primary) {
            tracing::warn!("Failed to remove {:?}: {}", lease.markers.primary, e);
        }

        tracing::info!("Released lease on '{}'", lease.name);
        ReleaseOutcome::Released
    }

    /// Whether the on-disk secondary marker still matches the lease
    pub fn is_owner(&self, lease: &Lease) -> bool {
        matches!(Epoch::read(&lease.markers.secondary), Ok(epoch) if epoch == lease.epoch)
    }

    /// Push back the staleness deadline of a held lease.
    ///
    /// Returns `Ok(false)` when the lease is no longer owned. Touching the
    /// markers changes the secondary epoch, so the lease is updated in place.
    pub fn renew(&self, lease: &mut Lease) -> Result<bool> {
        if !self.is_owner(lease) {
            return Ok(false);
        }

        stamp_markers(&lease.markers, self.clock.now()).with_path(&lease.markers.secondary)?;
        lease.epoch = Epoch::read(&lease.markers.secondary).with_path(&lease.markers.secondary)?;

        tracing::debug!("Renewed lease on '{}'", lease.name);
        Ok(true)
    }

    /// Report the on-disk state of `name` against the configured window
    pub fn inspect(&self, name: &str) -> Result<LockStatus> {
        let markers = MarkerPaths::for_name(name)?;
        let times = markers.times();
        let now = self.clock.now();
        let held = times.primary.is_some();

        Ok(LockStatus {
            name: name.to_string(),
            age: times.newest().and_then(|t| now.duration_since(t).ok()),
            stale: held && is_stale(now, &times, self.options.timeout),
            window: self.options.timeout,
            held,
            primary_modified: times.primary,
            secondary_modified: times.secondary,
            primary: markers.primary,
            secondary: markers.secondary,
        })
    }

    fn try_create(&self, markers: &MarkerPaths) -> Result<Attempt> {
        match fs::create_dir(&markers.primary) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(Attempt::Busy(format!("{:?} exists", markers.primary)));
            }
            Err(e) => return Err(DirLeaseError::io(&markers.primary, e)),
        }

        match fs::create_dir(&markers.secondary) {
            Ok(()) => {}
            Err(e) => {
                // The primary is ours; never leave it behind on a failed attempt
                let _ = remove_marker(&markers.primary);
                if e.kind() == io::ErrorKind::AlreadyExists {
                    return Ok(Attempt::Busy(format!("{:?} left over", markers.secondary)));
                }
                return Err(DirLeaseError::io(&markers.secondary, e));
            }
        }

        match stamp_markers(markers, self.clock.now()) {
            Ok(()) => read_epoch(markers),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(Attempt::Busy("markers vanished while stamping".to_string()))
            }
            Err(e) => Err(DirLeaseError::io(&markers.secondary, e)),
        }
    }

    fn try_reclaim(&self, markers: &MarkerPaths, window: Duration) -> Result<Attempt> {
        let observed = markers.times();
        if observed.is_empty() {
            // Released between our failed create and the stat
            return Ok(Attempt::Busy("released while polling".to_string()));
        }

        let now = self.clock.now();
        if !is_stale(now, &observed, window) {
            let age = observed
                .newest()
                .and_then(|t| now.duration_since(t).ok())
                .unwrap_or_default();
            return Ok(Attempt::Busy(format!(
                "held, newest marker {} old",
                humantime::format_duration(Duration::from_secs(age.as_secs()))
            )));
        }

        // Best effort only: catches a reclaimer that finished between the two
        // stats. Release stays safe either way through the epoch check.
        if markers.times() != observed {
            return Ok(Attempt::Busy("reclaimed concurrently".to_string()));
        }

        tracing::warn!(
            "Reclaiming stale lock {:?} (older than {})",
            markers.primary,
            humantime::format_duration(window)
        );
        remove_marker(&markers.secondary).with_path(&markers.secondary)?;
        remove_marker(&markers.primary).with_path(&markers.primary)?;

        match self.try_create(markers)? {
            Attempt::Won(epoch) => Ok(Attempt::Won(epoch)),
            Attempt::Busy(_) => Ok(Attempt::Busy("lost reclaim race".to_string())),
        }
    }

    fn grant(
        &self,
        name: &str,
        markers: MarkerPaths,
        epoch: Epoch,
        outcome: AcquireOutcome,
    ) -> Lease {
        match outcome {
            AcquireOutcome::Acquired => {
                tracing::info!("Acquired lease on '{}'", name);
            }
            AcquireOutcome::Reclaimed => {
                tracing::warn!("Acquired lease on '{}' by reclaiming a stale holder", name);
            }
        }

        Lease {
            name: name.to_string(),
            markers,
            epoch,
            outcome,
            acquired_at: self.clock.now(),
            holder: holder_id(),
        }
    }

    fn elapsed_since(&self, start: SystemTime) -> Duration {
        self.clock.now().duration_since(start).unwrap_or_default()
    }
}

fn read_epoch(markers: &MarkerPaths) -> Result<Attempt> {
    match Epoch::read(&markers.secondary) {
        Ok(epoch) => Ok(Attempt::Won(epoch)),
        // A racing reclaimer removed it already
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok(Attempt::Busy(format!("{:?} vanished", markers.secondary)))
        }
        Err(e) => Err(DirLeaseError::io(&markers.secondary, e)),
    }
}

fn holder_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}:{}", host, std::process::id())
}
