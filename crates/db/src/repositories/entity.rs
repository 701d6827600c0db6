use sqlx::{sqlite::SqliteRow, Row};

use staffdesk_core::domain::change::ChangeTrail;

use super::{change::parse_timestamp, EntityRecord, EntityStore, RepositoryError};
use crate::DbPool;

/// SQL-backed emulation of the dynamically addressed entity collections:
/// every collection shares one table keyed by `(collection, id)`, with the
/// record body and the optional `last_change` trail as JSON text.
pub struct SqlEntityStore {
    pool: DbPool,
}

impl SqlEntityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EntityStore for SqlEntityStore {
    async fn fetch(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<EntityRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT collection, id, fields, last_change, updated_at
             FROM entity_record WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn upsert(&self, record: EntityRecord) -> Result<(), RepositoryError> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let last_change = record
            .last_change
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO entity_record (collection, id, fields, last_change, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(collection, id) DO UPDATE SET
                fields = excluded.fields,
                last_change = excluded.last_change,
                updated_at = excluded.updated_at",
        )
        .bind(&record.collection)
        .bind(&record.id)
        .bind(fields)
        .bind(last_change)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn record_from_row(row: SqliteRow) -> Result<EntityRecord, RepositoryError> {
    let fields_raw = row.try_get::<String, _>("fields")?;
    let fields = serde_json::from_str(&fields_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid fields: {error}")))?;

    let last_change = row
        .try_get::<Option<String>, _>("last_change")?
        .map(|raw| {
            serde_json::from_str::<ChangeTrail>(&raw)
                .map_err(|error| RepositoryError::Decode(format!("invalid last_change: {error}")))
        })
        .transpose()?;

    Ok(EntityRecord {
        collection: row.try_get("collection")?,
        id: row.try_get("id")?,
        fields,
        last_change,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
