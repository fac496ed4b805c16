//! # warden-core
//!
//! Foundation types for the warden permission engine.
//!
//! This crate provides the shared vocabulary that all other warden crates depend on:
//!
//! - **Subjects**: [`SubjectRef`] identity `(type, identifier)` used as map key and parent reference
//! - **Contexts**: [`ContextValue`], [`ContextSet`], typed [`ContextDefinition`]s and their
//!   name-keyed [`ContextDefinitionRegistry`], plus [`ContextInheritance`] expansion
//! - **Subject data**: immutable [`Segment`] and [`ImmutableSubjectData`] with copy-on-write updates
//! - **Node tree**: [`NodeTree`] dotted-prefix permission index used by baked results
//! - **Logging**: subscriber setup and a capture layer for asserting on warnings in tests

#![deny(unsafe_code)]

pub mod context;
pub mod data;
pub mod errors;
pub mod logging;
pub mod node_tree;
pub mod segment;
pub mod subject;

pub use context::definition::{
    ContextDefinition, ContextDefinitionProvider, ContextDefinitionRegistry, DynContextDefinition,
};
pub use context::inheritance::ContextInheritance;
pub use context::{ContextSet, ContextValue};
pub use data::ImmutableSubjectData;
pub use errors::CoreError;
pub use node_tree::NodeTree;
pub use segment::Segment;
pub use subject::SubjectRef;
