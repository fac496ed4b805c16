//! The [`DataStore`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use warden_core::ImmutableSubjectData;

use crate::errors::Result;

/// Callback fired when a store observes a change to one subject's data that
/// did not arrive through [`DataStore::set_data`].
pub type StoreListener = Arc<dyn Fn(ImmutableSubjectData) + Send + Sync>;

/// A batch of writes run by [`DataStore::perform_bulk`].
pub type BulkOperation<'a> = BoxFuture<'a, Result<()>>;

/// Persistent storage for subject data, keyed by `(subject type, identifier)`.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Load the data for one subject. Unknown subjects yield empty data.
    ///
    /// When `listener` is given it is retained and fired on later
    /// out-of-band changes to this subject.
    async fn get_data(
        &self,
        subject_type: &str,
        identifier: &str,
        listener: Option<StoreListener>,
    ) -> Result<ImmutableSubjectData>;

    /// Persist data for one subject. `None` (or empty data) deletes it.
    /// Returns the data as stored.
    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<ImmutableSubjectData>;

    /// Whether any data is stored for the subject.
    async fn is_registered(&self, subject_type: &str, identifier: &str) -> Result<bool>;

    /// Every identifier with stored data for `subject_type`.
    async fn all_identifiers(&self, subject_type: &str) -> Result<Vec<String>>;

    /// Every subject type with stored data.
    async fn registered_types(&self) -> Result<Vec<String>>;

    /// Run `op` as one batch. Backends that persist incrementally defer
    /// persistence until the batch finishes.
    async fn perform_bulk<'a>(&'a self, op: BulkOperation<'a>) -> Result<()> {
        op.await
    }
}
