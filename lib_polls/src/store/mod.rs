//! # Poll Store
//!
//! The persistence seam of the voting core. The engine never mutates a stored
//! document in place: it loads a copy, changes the copy, and hands the whole
//! document back through `save`. A document is only ever visible to other
//! callers once a backend has confirmed that `save`.

use std::future::Future;
use std::sync::Arc;

use crate::core::poll::Poll;
use crate::error::StoreError;

/// In-process backend.
pub mod memory;
/// PostgreSQL backend storing each poll as a JSONB document.
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryPollStore;
#[cfg(feature = "postgres")]
pub use postgres::PgPollStore;

/// Durable keyed storage of poll documents.
pub trait PollStore: Send + Sync {
    fn get(&self, id: &str) -> impl Future<Output = Result<Poll, StoreError>> + Send;

    /// All polls, newest `created_at` first.
    fn list(&self) -> impl Future<Output = Result<Vec<Poll>, StoreError>> + Send;

    /// Stores a poll under a fresh id.
    fn insert(&self, poll: Poll) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replaces an existing document. `NotFound` if it was deleted meanwhile.
    fn save(&self, poll: Poll) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S: PollStore> PollStore for Arc<S> {
    fn get(&self, id: &str) -> impl Future<Output = Result<Poll, StoreError>> + Send {
        (**self).get(id)
    }

    fn list(&self) -> impl Future<Output = Result<Vec<Poll>, StoreError>> + Send {
        (**self).list()
    }

    fn insert(&self, poll: Poll) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).insert(poll)
    }

    fn save(&self, poll: Poll) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).save(poll)
    }

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).delete(id)
    }
}
