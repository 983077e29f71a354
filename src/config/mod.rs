//! Configuration module for dirlease
//!
//! Provides CLI arguments and the lease settings derived from them.

mod settings;

pub use settings::*;
