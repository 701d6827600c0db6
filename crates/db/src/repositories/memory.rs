use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use staffdesk_core::domain::change::{ChangeId, ChangeStatus, PendingChange};

use super::{
    ChangeRepository, EntityRecord, EntityStore, RepositoryError, StatusCounts, TypeCount,
};

#[derive(Default)]
pub struct InMemoryChangeRepository {
    changes: RwLock<HashMap<String, PendingChange>>,
}

#[async_trait::async_trait]
impl ChangeRepository for InMemoryChangeRepository {
    async fn insert(&self, change: PendingChange) -> Result<(), RepositoryError> {
        let mut changes = self.changes.write().await;
        changes.insert(change.id.0.clone(), change);
        Ok(())
    }

    async fn find_by_id(&self, id: &ChangeId) -> Result<Option<PendingChange>, RepositoryError> {
        let changes = self.changes.read().await;
        Ok(changes.get(&id.0).cloned())
    }

    async fn list(
        &self,
        status: Option<ChangeStatus>,
    ) -> Result<Vec<PendingChange>, RepositoryError> {
        let changes = self.changes.read().await;
        let mut matching: Vec<PendingChange> = changes
            .values()
            .filter(|change| status.map_or(true, |wanted| change.status == wanted))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.requested_at.cmp(&b.requested_at).then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(matching)
    }

    async fn finalize_review(
        &self,
        id: &ChangeId,
        status: ChangeStatus,
        reviewed_by: &str,
        reviewed_at: DateTime<Utc>,
        comments: &str,
    ) -> Result<bool, RepositoryError> {
        // Check and set under one write lock: the in-memory equivalent of
        // the SQL conditional update.
        let mut changes = self.changes.write().await;
        match changes.get_mut(&id.0) {
            Some(change) if change.status == ChangeStatus::Pending => {
                change.status = status;
                change.reviewed_by = Some(reviewed_by.to_string());
                change.reviewed_at = Some(reviewed_at);
                change.review_comments = Some(comments.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reopen(&self, id: &ChangeId) -> Result<bool, RepositoryError> {
        let mut changes = self.changes.write().await;
        match changes.get_mut(&id.0) {
            Some(change) if change.status == ChangeStatus::Approved => {
                change.status = ChangeStatus::Pending;
                change.reviewed_by = None;
                change.reviewed_at = None;
                change.review_comments = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_status(&self) -> Result<StatusCounts, RepositoryError> {
        let changes = self.changes.read().await;
        let mut counts = StatusCounts::default();
        for change in changes.values() {
            match change.status {
                ChangeStatus::Pending => counts.pending += 1,
                ChangeStatus::Approved => counts.approved += 1,
                ChangeStatus::Rejected => counts.rejected += 1,
            }
        }
        Ok(counts)
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>, RepositoryError> {
        let changes = self.changes.read().await;
        let mut by_type: HashMap<&'static str, i64> = HashMap::new();
        for change in changes.values() {
            *by_type.entry(change.change_type.as_str()).or_default() += 1;
        }
        let mut counts: Vec<TypeCount> = by_type
            .into_iter()
            .map(|(change_type, count)| TypeCount {
                change_type: change_type.to_string(),
                count,
            })
            .collect();
        counts.sort_by(|a, b| a.change_type.cmp(&b.change_type));
        Ok(counts)
    }

    async fn count_pending_requested_by(&self, actor: &str) -> Result<i64, RepositoryError> {
        let changes = self.changes.read().await;
        Ok(changes
            .values()
            .filter(|change| {
                change.status == ChangeStatus::Pending && change.requested_by == actor
            })
            .count() as i64)
    }
}

#[derive(Default)]
pub struct InMemoryEntityStore {
    records: RwLock<HashMap<(String, String), EntityRecord>>,
}

#[async_trait::async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn fetch(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<EntityRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&(collection.to_string(), id.to_string())).cloned())
    }

    async fn upsert(&self, record: EntityRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert((record.collection.clone(), record.id.clone()), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use staffdesk_core::domain::change::{
        ChangeId, ChangeStatus, ChangeType, PendingChange, TargetAddress, TargetEntity,
    };

    use crate::repositories::{
        ChangeRepository, EntityRecord, EntityStore, InMemoryChangeRepository,
        InMemoryEntityStore,
    };

    fn sample_change(id: &str) -> PendingChange {
        PendingChange {
            id: ChangeId(id.to_string()),
            change_type: ChangeType::EmployeeUpdate,
            status: ChangeStatus::Pending,
            requested_by: "U-104".to_string(),
            requested_by_role: "data-operations".to_string(),
            requested_at: Utc::now(),
            change_data: json!({"name": "A"}).as_object().expect("object").clone(),
            target: TargetAddress::new(TargetEntity::Employees, Some("EMP-9".to_string())),
            description: "Employee update for A".to_string(),
            reviewed_by: None,
            reviewed_at: None,
            review_comments: None,
        }
    }

    #[tokio::test]
    async fn in_memory_change_repo_round_trip() {
        let repo = InMemoryChangeRepository::default();
        let change = sample_change("CHG-1");

        repo.insert(change.clone()).await.expect("insert");
        let found = repo.find_by_id(&change.id).await.expect("find");

        assert_eq!(found, Some(change));
    }

    #[tokio::test]
    async fn in_memory_cas_admits_a_single_winner() {
        let repo = InMemoryChangeRepository::default();
        let change = sample_change("CHG-1");
        repo.insert(change.clone()).await.expect("insert");

        let first = repo
            .finalize_review(&change.id, ChangeStatus::Approved, "REV-1", Utc::now(), "")
            .await
            .expect("first");
        let second = repo
            .finalize_review(&change.id, ChangeStatus::Rejected, "REV-2", Utc::now(), "late")
            .await
            .expect("second");

        assert!(first);
        assert!(!second);
        let found = repo.find_by_id(&change.id).await.expect("find").expect("exists");
        assert_eq!(found.status, ChangeStatus::Approved);
    }

    #[tokio::test]
    async fn in_memory_entity_store_round_trip() {
        let store = InMemoryEntityStore::default();
        let record = EntityRecord {
            collection: "employees".to_string(),
            id: "EMP-9".to_string(),
            fields: json!({"name": "B"}).as_object().expect("object").clone(),
            last_change: None,
            updated_at: Utc::now(),
        };

        store.upsert(record.clone()).await.expect("upsert");
        let found = store.fetch("employees", "EMP-9").await.expect("fetch");

        assert_eq!(found, Some(record));
    }
}
