use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use staffdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use staffdesk_core::errors::DomainError;
use staffdesk_core::workflow::WorkflowEngine;
use staffdesk_db::repositories::{SqlChangeRepository, SqlEntityStore};
use staffdesk_db::{connect_with_settings, migrations, DbPool};

use crate::workflow::{ChangeWorkflowService, TracingAuditSink};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ChangeWorkflowService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("workflow policy is invalid: {0}")]
    WorkflowPolicy(#[source] DomainError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let engine_config =
        config.workflow.engine_config().map_err(BootstrapError::WorkflowPolicy)?;

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = Arc::new(ChangeWorkflowService::new(
        WorkflowEngine::new(engine_config),
        Arc::new(SqlChangeRepository::new(db_pool.clone())),
        Arc::new(SqlEntityStore::new(db_pool.clone())),
        Arc::new(TracingAuditSink),
    ));

    Ok(Application { config, db_pool, service })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use staffdesk_core::config::{ConfigOverrides, LoadOptions};
    use staffdesk_core::domain::actor::{ActorContext, Role};
    use staffdesk_core::domain::change::{ChangeType, TargetAddress, TargetEntity};
    use staffdesk_core::workflow::ChangeSubmission;

    use crate::bootstrap::bootstrap;

    fn memory_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_privileged_roles() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                privileged_roles: Some(vec!["superuser".to_string()]),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("superuser"));
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_a_working_service() {
        let app = bootstrap(memory_options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('pending_change', 'entity_record')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected workflow tables after bootstrap");
        assert_eq!(table_count, 2, "bootstrap should expose workflow tables");

        // End-to-end through the bootstrapped service: an admin registration
        // applies directly against the SQL-backed stores.
        let actor = ActorContext::new("U-1", Role::Admin);
        let outcome = app
            .service
            .submit(
                &actor,
                ChangeSubmission {
                    change_type: ChangeType::EmployeeRegistration,
                    target: TargetAddress::new(TargetEntity::Employees, Some("EMP-1".into())),
                    fields: json!({"name": "A", "esicNumber": "123"})
                        .as_object()
                        .expect("object")
                        .clone(),
                },
                "req-bootstrap",
            )
            .await
            .expect("submit should succeed");
        assert!(outcome.applied);

        let (record_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM entity_record WHERE collection = 'employees' AND id = 'EMP-1'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count entity records");
        assert_eq!(record_count, 1);

        app.db_pool.close().await;
    }
}
