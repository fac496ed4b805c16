//! # warden-engine
//!
//! Permission resolution for warden.
//!
//! - [`PermissionsEngine`]: owns the context registry, context inheritance,
//!   per-type caches and the memo of baked results; answers
//!   `effective_permission`, `effective_option` and `effective_parents`
//! - [`bake`](bake::bake): the inheritance-graph walk with magnitude-priority
//!   merging, usable against any [`SubjectDataSource`]
//! - [`CalculatedSubject`]: a subject handle bound to its engine
//! - [`SubjectType`]: the persistent and transient caches of one type

#![deny(unsafe_code)]

pub mod bake;
pub mod baked;
pub mod calculated;
pub mod engine;
pub mod errors;
pub mod subject_type;

pub use bake::{SubjectDataSource, SubjectLayers};
pub use baked::BakedSubjectData;
pub use calculated::CalculatedSubject;
pub use engine::PermissionsEngine;
pub use errors::{EngineError, Result};
pub use subject_type::SubjectType;
