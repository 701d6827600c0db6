use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use staffdesk_core::domain::change::{ChangeId, ChangeStatus, ChangeTrail, PendingChange};

pub mod change;
pub mod entity;
pub mod memory;

pub use change::SqlChangeRepository;
pub use entity::SqlEntityStore;
pub use memory::{InMemoryChangeRepository, InMemoryEntityStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeCount {
    pub change_type: String,
    pub count: i64,
}

/// Store of deferred change requests. Records are append-mostly: inserted
/// once, finalized at most once, never deleted.
#[async_trait]
pub trait ChangeRepository: Send + Sync {
    async fn insert(&self, change: PendingChange) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ChangeId) -> Result<Option<PendingChange>, RepositoryError>;

    async fn list(&self, status: Option<ChangeStatus>)
        -> Result<Vec<PendingChange>, RepositoryError>;

    /// The compare-and-swap transition: sets the terminal status and the
    /// review trio in one conditional update guarded on `status = pending`.
    /// Returns `false` when the guard fails, i.e. another reviewer won.
    async fn finalize_review(
        &self,
        id: &ChangeId,
        status: ChangeStatus,
        reviewed_by: &str,
        reviewed_at: DateTime<Utc>,
        comments: &str,
    ) -> Result<bool, RepositoryError>;

    /// Compensation for an approval whose apply step failed: move the record
    /// back to `pending` and clear the review trio. Guarded on the record
    /// still being `approved` so a concurrent retry cannot be clobbered.
    async fn reopen(&self, id: &ChangeId) -> Result<bool, RepositoryError>;

    async fn count_by_status(&self) -> Result<StatusCounts, RepositoryError>;

    async fn count_by_type(&self) -> Result<Vec<TypeCount>, RepositoryError>;

    async fn count_pending_requested_by(&self, actor: &str) -> Result<i64, RepositoryError>;
}

/// One record in a dynamically addressed entity collection.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    pub collection: String,
    pub id: String,
    pub fields: Map<String, Value>,
    pub last_change: Option<ChangeTrail>,
    pub updated_at: DateTime<Utc>,
}

/// Document-store style access to the target entity collections.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn fetch(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<EntityRecord>, RepositoryError>;

    async fn upsert(&self, record: EntityRecord) -> Result<(), RepositoryError>;
}
