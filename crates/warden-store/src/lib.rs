//! # warden-store
//!
//! The storage seam of the warden permission engine.
//!
//! - [`DataStore`]: async interface every backend implements (load, save,
//!   enumerate, bulk writes, change listeners)
//! - [`MemoryDataStore`]: in-process backend with optional JSON snapshot file,
//!   used as the transient store and as the reference backend in tests
//! - [`StoreError`]: cloneable error so coalesced waiters can share one failure

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod store;

pub use errors::{Result, StoreError};
pub use memory::MemoryDataStore;
pub use store::{BulkOperation, DataStore, StoreListener};
