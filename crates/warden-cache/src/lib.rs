//! # warden-cache
//!
//! The asynchronous data layer between the resolution engine and a
//! [`DataStore`](warden_store::DataStore):
//!
//! - [`ListenerRegistry`]: identifier-keyed fan-out with strong and weak
//!   registrations and per-listener panic isolation
//! - [`SubjectDataCache`]: one per subject type; coalesced loads, serialized
//!   per-identifier updates, bounded LRU eviction, hot backend replacement
//! - [`SubjectDataReference`]: a mutable cell over one identifier with an
//!   optimistic compare-and-swap update loop

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod listeners;
pub mod reference;

pub use cache::SubjectDataCache;
pub use errors::{CacheError, Result};
pub use listeners::{Listener, ListenerHandle, ListenerRegistry};
pub use reference::{Change, ListenerMode, SubjectDataReference};
