use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use staffdesk_core::domain::change::{
    ChangeId, ChangeStatus, ChangeType, PendingChange, TargetAddress, TargetEntity,
};

use super::{ChangeRepository, RepositoryError, StatusCounts, TypeCount};
use crate::DbPool;

pub struct SqlChangeRepository {
    pool: DbPool,
}

impl SqlChangeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, change_type, status, requested_by, requested_by_role, \
     requested_at, change_data, target_collection, target_document_id, description, \
     reviewed_by, reviewed_at, review_comments";

#[async_trait::async_trait]
impl ChangeRepository for SqlChangeRepository {
    async fn insert(&self, change: PendingChange) -> Result<(), RepositoryError> {
        let change_data = serde_json::to_string(&change.change_data)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO pending_change (
                id, change_type, status, requested_by, requested_by_role, requested_at,
                change_data, target_collection, target_document_id, description,
                reviewed_by, reviewed_at, review_comments
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&change.id.0)
        .bind(change.change_type.as_str())
        .bind(change.status.as_str())
        .bind(&change.requested_by)
        .bind(&change.requested_by_role)
        .bind(change.requested_at.to_rfc3339())
        .bind(change_data)
        .bind(change.target.collection())
        .bind(change.target.document_id.as_deref())
        .bind(&change.description)
        .bind(change.reviewed_by.as_deref())
        .bind(change.reviewed_at.map(|value| value.to_rfc3339()))
        .bind(change.review_comments.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &ChangeId) -> Result<Option<PendingChange>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM pending_change WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(change_from_row).transpose()
    }

    async fn list(
        &self,
        status: Option<ChangeStatus>,
    ) -> Result<Vec<PendingChange>, RepositoryError> {
        let rows = if let Some(status) = status {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM pending_change \
                 WHERE status = ? ORDER BY requested_at ASC, id ASC"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM pending_change \
                 ORDER BY requested_at ASC, id ASC"
            ))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(change_from_row).collect()
    }

    async fn finalize_review(
        &self,
        id: &ChangeId,
        status: ChangeStatus,
        reviewed_by: &str,
        reviewed_at: DateTime<Utc>,
        comments: &str,
    ) -> Result<bool, RepositoryError> {
        // The `status = 'pending'` guard is the race arbiter: of N
        // concurrent reviews exactly one update matches a row.
        let result = sqlx::query(
            "UPDATE pending_change
             SET status = ?, reviewed_by = ?, reviewed_at = ?, review_comments = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(reviewed_by)
        .bind(reviewed_at.to_rfc3339())
        .bind(comments)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reopen(&self, id: &ChangeId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE pending_change
             SET status = 'pending', reviewed_by = NULL, reviewed_at = NULL,
                 review_comments = NULL
             WHERE id = ? AND status = 'approved'",
        )
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM pending_change GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match ChangeStatus::parse(&status) {
                Some(ChangeStatus::Pending) => counts.pending = count,
                Some(ChangeStatus::Approved) => counts.approved = count,
                Some(ChangeStatus::Rejected) => counts.rejected = count,
                None => {
                    return Err(RepositoryError::Decode(format!(
                        "unknown change status `{status}`"
                    )))
                }
            }
        }
        Ok(counts)
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT change_type, COUNT(*) AS count FROM pending_change \
             GROUP BY change_type ORDER BY change_type ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TypeCount {
                    change_type: row.try_get("change_type")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn count_pending_requested_by(&self, actor: &str) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM pending_change \
             WHERE status = 'pending' AND requested_by = ?",
        )
        .bind(actor)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }
}

fn change_from_row(row: SqliteRow) -> Result<PendingChange, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ChangeStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown change status `{status_raw}`")))?;

    let type_raw = row.try_get::<String, _>("change_type")?;
    let change_type = ChangeType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown change type `{type_raw}`")))?;

    let collection_raw = row.try_get::<String, _>("target_collection")?;
    let entity = TargetEntity::parse_collection(&collection_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown target collection `{collection_raw}`"))
    })?;

    let change_data_raw = row.try_get::<String, _>("change_data")?;
    let change_data = serde_json::from_str(&change_data_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid change_data: {error}")))?;

    Ok(PendingChange {
        id: ChangeId(row.try_get("id")?),
        change_type,
        status,
        requested_by: row.try_get("requested_by")?,
        requested_by_role: row.try_get("requested_by_role")?,
        requested_at: parse_timestamp("requested_at", row.try_get("requested_at")?)?,
        change_data,
        target: TargetAddress::new(entity, row.try_get("target_document_id")?),
        description: row.try_get("description")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: parse_optional_timestamp("reviewed_at", row.try_get("reviewed_at")?)?,
        review_comments: row.try_get("review_comments")?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use staffdesk_core::domain::change::{
        ChangeId, ChangeStatus, ChangeType, PendingChange, TargetAddress, TargetEntity,
    };

    use super::SqlChangeRepository;
    use crate::repositories::ChangeRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_change(id: &str, change_type: ChangeType) -> PendingChange {
        PendingChange {
            id: ChangeId(id.to_string()),
            change_type,
            status: ChangeStatus::Pending,
            requested_by: "U-104".to_string(),
            requested_by_role: "data-operations".to_string(),
            requested_at: Utc::now(),
            change_data: json!({"name": "A", "esicNumber": "123"})
                .as_object()
                .expect("object literal")
                .clone(),
            target: TargetAddress::new(TargetEntity::Employees, Some("EMP-9".to_string())),
            description: "Employee update for A".to_string(),
            reviewed_by: None,
            reviewed_at: None,
            review_comments: None,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlChangeRepository::new(pool.clone());
        let change = sample_change("CHG-1", ChangeType::EmployeeUpdate);

        repo.insert(change.clone()).await.expect("insert");
        let found = repo.find_by_id(&change.id).await.expect("find");

        assert_eq!(found.as_ref().map(|c| &c.id), Some(&change.id));
        let found = found.expect("should exist");
        assert_eq!(found.change_type, ChangeType::EmployeeUpdate);
        assert_eq!(found.status, ChangeStatus::Pending);
        assert_eq!(found.change_data, change.change_data);
        assert_eq!(found.target, change.target);
        assert!(found.reviewed_by.is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn attendance_target_round_trips_through_collection_name() {
        let pool = setup_pool().await;
        let repo = SqlChangeRepository::new(pool.clone());

        let mut change = sample_change("CHG-2", ChangeType::AttendanceMark);
        change.target =
            TargetAddress::new(TargetEntity::attendance("Plant 2"), Some("EMP-9-2026-07".into()));

        repo.insert(change.clone()).await.expect("insert");
        let found = repo.find_by_id(&change.id).await.expect("find").expect("exists");

        assert_eq!(found.target.collection(), "attendance_plant_2");
        assert_eq!(found.target.document_id.as_deref(), Some("EMP-9-2026-07"));

        pool.close().await;
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let pool = setup_pool().await;
        let repo = SqlChangeRepository::new(pool.clone());

        repo.insert(sample_change("CHG-1", ChangeType::EmployeeUpdate)).await.expect("insert 1");
        repo.insert(sample_change("CHG-2", ChangeType::UnitUpdate)).await.expect("insert 2");
        repo.finalize_review(
            &ChangeId("CHG-2".to_string()),
            ChangeStatus::Rejected,
            "REV-1",
            Utc::now(),
            "duplicate",
        )
        .await
        .expect("finalize");

        let pending = repo.list(Some(ChangeStatus::Pending)).await.expect("list pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.0, "CHG-1");

        let all = repo.list(None).await.expect("list all");
        assert_eq!(all.len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn finalize_review_is_a_single_winner_cas() {
        let pool = setup_pool().await;
        let repo = SqlChangeRepository::new(pool.clone());
        let change = sample_change("CHG-1", ChangeType::EmployeeUpdate);
        repo.insert(change.clone()).await.expect("insert");

        let now = Utc::now();
        let first = repo
            .finalize_review(&change.id, ChangeStatus::Approved, "REV-1", now, "")
            .await
            .expect("first finalize");
        let second = repo
            .finalize_review(&change.id, ChangeStatus::Rejected, "REV-2", now, "too late")
            .await
            .expect("second finalize");

        assert!(first);
        assert!(!second);

        let found = repo.find_by_id(&change.id).await.expect("find").expect("exists");
        assert_eq!(found.status, ChangeStatus::Approved);
        assert_eq!(found.reviewed_by.as_deref(), Some("REV-1"));
        assert!(found.reviewed_at.is_some());

        pool.close().await;
    }

    #[tokio::test]
    async fn concurrent_finalizes_produce_exactly_one_winner() {
        let pool = setup_pool().await;
        let repo = Arc::new(SqlChangeRepository::new(pool.clone()));
        let change = sample_change("CHG-RACE", ChangeType::EmployeeUpdate);
        repo.insert(change.clone()).await.expect("insert");

        let mut handles = Vec::new();
        for reviewer in 0..8 {
            let repo = Arc::clone(&repo);
            let id = change.id.clone();
            handles.push(tokio::spawn(async move {
                repo.finalize_review(
                    &id,
                    ChangeStatus::Approved,
                    &format!("REV-{reviewer}"),
                    Utc::now(),
                    "",
                )
                .await
                .expect("finalize")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn reopen_reverts_an_approved_record_to_pending() {
        let pool = setup_pool().await;
        let repo = SqlChangeRepository::new(pool.clone());
        let change = sample_change("CHG-1", ChangeType::EmployeeUpdate);
        repo.insert(change.clone()).await.expect("insert");

        repo.finalize_review(&change.id, ChangeStatus::Approved, "REV-1", Utc::now(), "")
            .await
            .expect("finalize");
        let reopened = repo.reopen(&change.id).await.expect("reopen");
        assert!(reopened);

        let found = repo.find_by_id(&change.id).await.expect("find").expect("exists");
        assert_eq!(found.status, ChangeStatus::Pending);
        assert!(found.reviewed_by.is_none());
        assert!(found.reviewed_at.is_none());
        assert!(found.review_comments.is_none());

        // A rejected record is terminal for good; reopen does not touch it.
        let rejected = sample_change("CHG-2", ChangeType::UnitUpdate);
        repo.insert(rejected.clone()).await.expect("insert 2");
        repo.finalize_review(&rejected.id, ChangeStatus::Rejected, "REV-1", Utc::now(), "no")
            .await
            .expect("finalize 2");
        assert!(!repo.reopen(&rejected.id).await.expect("reopen rejected"));

        pool.close().await;
    }

    #[tokio::test]
    async fn counts_group_by_status_type_and_requester() {
        let pool = setup_pool().await;
        let repo = SqlChangeRepository::new(pool.clone());

        repo.insert(sample_change("CHG-1", ChangeType::EmployeeUpdate)).await.expect("insert 1");
        repo.insert(sample_change("CHG-2", ChangeType::EmployeeUpdate)).await.expect("insert 2");
        let mut other = sample_change("CHG-3", ChangeType::UnitRegistration);
        other.requested_by = "U-200".to_string();
        repo.insert(other).await.expect("insert 3");
        repo.finalize_review(
            &ChangeId("CHG-2".to_string()),
            ChangeStatus::Approved,
            "REV-1",
            Utc::now(),
            "",
        )
        .await
        .expect("finalize");

        let by_status = repo.count_by_status().await.expect("count by status");
        assert_eq!(by_status.pending, 2);
        assert_eq!(by_status.approved, 1);
        assert_eq!(by_status.rejected, 0);

        let by_type = repo.count_by_type().await.expect("count by type");
        assert_eq!(by_type.len(), 2);
        assert!(by_type
            .iter()
            .any(|entry| entry.change_type == "employee-update" && entry.count == 2));

        let mine = repo.count_pending_requested_by("U-104").await.expect("count mine");
        assert_eq!(mine, 1);

        pool.close().await;
    }
}
