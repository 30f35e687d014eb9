//! Interfaces of the stores the checker talks to.
//!
//! The loop and the window reconciler only see these traits; Postgres
//! implementations live in [`crate::db`], in-memory ones in the test fakes.

use std::future::Future;

use driftwatch_engine::{CloudRecord, LocalRecord, RecordId, Window};

use crate::error::Result;

/// The authoritative source of records.
pub trait LocalStore: Send + Sync {
    /// Records modified in `[window.start, window.end)`, ordered by
    /// modification time then id.
    fn range(&self, window: &Window) -> impl Future<Output = Result<Vec<LocalRecord>>> + Send;
}

/// The replicated target being checked.
pub trait CloudStore: Send + Sync {
    /// Miss-tolerant bulk read. Ids without a cloud record are simply absent
    /// from the result; an `Err` means the whole call failed.
    fn batch_get(
        &self,
        ids: &[RecordId],
    ) -> impl Future<Output = Result<Vec<CloudRecord>>> + Send;

    /// Authoritative read used to resolve pending records.
    fn get(&self, ids: &[RecordId]) -> impl Future<Output = Result<Vec<CloudRecord>>> + Send;

    /// Blindly overwrite a cloud record with local values, creating it when
    /// absent. The stored revision is bumped, whatever it currently is.
    /// `original` is the cloud copy the divergence was judged against.
    fn put(
        &self,
        record: &CloudRecord,
        original: Option<&CloudRecord>,
    ) -> impl Future<Output = Result<()>> + Send;
}
