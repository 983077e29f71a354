//! Lease-guarded key-value store
//!
//! Provides small persistent values shared between processes:
//! - Every access goes through a held lease on the backing path
//! - Each call is its own open/modify/close transaction
//! - Pluggable backing format, JSON document by default

mod backing;
mod resource;

pub use backing::{BackingStore, JsonFileStore, JsonHandle, KvHandle};
pub use resource::{generate_path, ResourceStore, StoreGuard, STORE_EXTENSION};
