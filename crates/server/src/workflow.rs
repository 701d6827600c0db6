//! Orchestration of the change-approval workflow over the repository layer.
//!
//! The service routes every mutating submission through the workflow engine:
//! privileged actors mutate the target collection directly and get a
//! `last_change` trail stamped; everyone else gets a pending record and no
//! target mutation. Reviews run through the store-level CAS so concurrent
//! reviewers cannot double-apply a change.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use staffdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use staffdesk_core::domain::actor::ActorContext;
use staffdesk_core::domain::change::{
    ApplyMode, ChangeId, ChangeStatus, ChangeType, PendingChange, TargetAddress,
};
use staffdesk_core::errors::{ApplicationError, DomainError};
use staffdesk_core::workflow::{ChangeSubmission, ReviewVerdict, SubmitRoute, WorkflowEngine};
use staffdesk_db::repositories::{
    ChangeRepository, EntityRecord, EntityStore, RepositoryError, StatusCounts, TypeCount,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub applied: bool,
    pub pending_id: Option<ChangeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub id: ChangeId,
    pub status: ChangeStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeStats {
    pub total: StatusCounts,
    pub by_type: Vec<TypeCount>,
    pub my_pending: i64,
}

pub struct ChangeWorkflowService {
    engine: WorkflowEngine,
    changes: Arc<dyn ChangeRepository>,
    entities: Arc<dyn EntityStore>,
    audit: Arc<dyn AuditSink>,
}

impl ChangeWorkflowService {
    pub fn new(
        engine: WorkflowEngine,
        changes: Arc<dyn ChangeRepository>,
        entities: Arc<dyn EntityStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { engine, changes, entities, audit }
    }

    /// The change interceptor: apply directly or defer into the queue.
    pub async fn submit(
        &self,
        actor: &ActorContext,
        submission: ChangeSubmission,
        correlation_id: &str,
    ) -> Result<SubmitOutcome, ApplicationError> {
        self.engine.validate_submission(&submission)?;

        match self.engine.route(actor.role) {
            SubmitRoute::DirectApply => {
                let now = Utc::now();
                let document_id = self
                    .apply_to_target(
                        submission.change_type,
                        &submission.target,
                        &submission.fields,
                        &actor.actor,
                        now,
                    )
                    .await?;

                self.audit.emit(
                    AuditEvent::new(
                        None,
                        correlation_id,
                        "change.direct_applied",
                        AuditCategory::Workflow,
                        actor.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("change_type", submission.change_type.as_str())
                    .with_metadata("collection", submission.target.collection())
                    .with_metadata("document_id", document_id),
                );

                Ok(SubmitOutcome { applied: true, pending_id: None })
            }
            SubmitRoute::Defer => {
                let pending = self.engine.build_pending(actor, submission, Utc::now())?;
                self.changes.insert(pending.clone()).await.map_err(persistence)?;

                self.audit.emit(
                    AuditEvent::new(
                        Some(pending.id.clone()),
                        correlation_id,
                        "change.submitted",
                        AuditCategory::Workflow,
                        actor.actor.clone(),
                        AuditOutcome::Deferred,
                    )
                    .with_metadata("change_type", pending.change_type.as_str())
                    .with_metadata("description", pending.description.clone()),
                );

                Ok(SubmitOutcome { applied: false, pending_id: Some(pending.id) })
            }
        }
    }

    /// Approve a deferred change: win the CAS, then apply the captured
    /// payload to the target. On apply failure the claim is compensated back
    /// to `pending`; a failed compensation is logged for reconciliation
    /// rather than silently retried.
    pub async fn approve(
        &self,
        id: &ChangeId,
        actor: &ActorContext,
        comments: Option<&str>,
        correlation_id: &str,
    ) -> Result<ReviewOutcome, ApplicationError> {
        let record = self.load_actionable(id, ReviewVerdict::Approve, actor, comments).await?;

        let now = Utc::now();
        let comments = comments.map(str::trim).unwrap_or_default();
        let claimed = self
            .changes
            .finalize_review(&record.id, ChangeStatus::Approved, &actor.actor, now, comments)
            .await
            .map_err(persistence)?;
        if !claimed {
            return Err(already_processed(&self.changes, &record.id).await);
        }

        // The trail credits the approver; the original requester stays on
        // the pending record itself.
        let applied = self
            .apply_to_target(
                record.change_type,
                &record.target,
                &record.change_data,
                &actor.actor,
                now,
            )
            .await;

        match applied {
            Ok(document_id) => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(record.id.clone()),
                        correlation_id,
                        "change.approved",
                        AuditCategory::Workflow,
                        actor.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("change_type", record.change_type.as_str())
                    .with_metadata("document_id", document_id),
                );
                Ok(ReviewOutcome { id: record.id.clone(), status: ChangeStatus::Approved })
            }
            Err(error) => {
                match self.changes.reopen(&record.id).await {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        tracing::error!(
                            event_name = "change.reconciliation_needed",
                            correlation_id = %correlation_id,
                            change_id = %record.id,
                            error = %error,
                            "apply failed and compensation could not re-pend the record"
                        );
                    }
                }
                self.audit.emit(
                    AuditEvent::new(
                        Some(record.id.clone()),
                        correlation_id,
                        "change.apply_failed",
                        AuditCategory::Persistence,
                        actor.actor.clone(),
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// Reject a deferred change. Comments are mandatory; no target mutation.
    pub async fn reject(
        &self,
        id: &ChangeId,
        actor: &ActorContext,
        comments: Option<&str>,
        correlation_id: &str,
    ) -> Result<ReviewOutcome, ApplicationError> {
        let comments = comments.map(str::trim).unwrap_or_default();
        if comments.is_empty() {
            // Surfaced before any store access.
            return Err(DomainError::MissingReviewComments.into());
        }

        let record =
            self.load_actionable(id, ReviewVerdict::Reject, actor, Some(comments)).await?;
        let claimed = self
            .changes
            .finalize_review(&record.id, ChangeStatus::Rejected, &actor.actor, Utc::now(), comments)
            .await
            .map_err(persistence)?;
        if !claimed {
            return Err(already_processed(&self.changes, &record.id).await);
        }

        self.audit.emit(
            AuditEvent::new(
                Some(record.id.clone()),
                correlation_id,
                "change.rejected",
                AuditCategory::Workflow,
                actor.actor.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("change_type", record.change_type.as_str())
            .with_metadata("comments", comments),
        );

        Ok(ReviewOutcome { id: record.id.clone(), status: ChangeStatus::Rejected })
    }

    pub async fn list(
        &self,
        status: Option<ChangeStatus>,
    ) -> Result<Vec<PendingChange>, ApplicationError> {
        self.changes.list(status).await.map_err(persistence)
    }

    pub async fn stats(&self, actor: &ActorContext) -> Result<ChangeStats, ApplicationError> {
        let total = self.changes.count_by_status().await.map_err(persistence)?;
        let by_type = self.changes.count_by_type().await.map_err(persistence)?;
        let my_pending = self
            .changes
            .count_pending_requested_by(&actor.actor)
            .await
            .map_err(persistence)?;

        Ok(ChangeStats { total, by_type, my_pending })
    }

    /// Fetch a review target and run the pure transition checks (comments
    /// present for rejections, record still pending) before touching state.
    async fn load_actionable(
        &self,
        id: &ChangeId,
        verdict: ReviewVerdict,
        actor: &ActorContext,
        comments: Option<&str>,
    ) -> Result<PendingChange, ApplicationError> {
        let record = self
            .changes
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| ApplicationError::NotFound { resource: "change", id: id.0.clone() })?;

        if record.status.is_terminal() {
            return Err(ApplicationError::AlreadyProcessed {
                id: record.id.0.clone(),
                status: record.status,
            });
        }

        self.engine.finalize_review(&record, verdict, &actor.actor, comments, Utc::now())?;
        Ok(record)
    }

    /// The shared apply step for the direct path and the approval path:
    /// fetch the existing record per the change type's apply mode, diff it,
    /// and write the merged fields with a fresh `last_change` trail in one
    /// upsert.
    async fn apply_to_target(
        &self,
        change_type: ChangeType,
        target: &TargetAddress,
        proposed: &Map<String, Value>,
        updated_by: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ApplicationError> {
        let collection = target.collection();
        let document_id = match (change_type.apply_mode(), &target.document_id) {
            (_, Some(id)) => id.clone(),
            (ApplyMode::Create, None) => Uuid::new_v4().to_string(),
            // Update-shaped types without a document id are rejected at
            // validation; this is unreachable through the public surface.
            (_, None) => {
                return Err(ApplicationError::NotFound {
                    resource: "target record",
                    id: String::new(),
                })
            }
        };

        let existing = self
            .entities
            .fetch(&collection, &document_id)
            .await
            .map_err(persistence)?;

        match (change_type.apply_mode(), &existing) {
            (ApplyMode::Update, None) => {
                return Err(ApplicationError::NotFound {
                    resource: "target record",
                    id: document_id,
                });
            }
            (ApplyMode::Create, Some(_)) => {
                return Err(ApplicationError::Persistence(format!(
                    "record `{document_id}` already exists in `{collection}`"
                )));
            }
            _ => {}
        }

        let existing_fields = existing.as_ref().map(|record| &record.fields);
        let trail =
            self.engine.build_trail(existing_fields, proposed, change_type, updated_by, now);

        let mut fields = existing.map(|record| record.fields).unwrap_or_default();
        for (key, value) in proposed {
            fields.insert(key.clone(), value.clone());
        }

        self.entities
            .upsert(EntityRecord {
                collection,
                id: document_id.clone(),
                fields,
                last_change: Some(trail),
                updated_at: now,
            })
            .await
            .map_err(persistence)?;

        Ok(document_id)
    }
}

/// Tracing-backed audit sink for the running server. Tests use the core
/// in-memory sink instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            change_id = event.change_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            actor = %event.actor,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

/// Report the terminal status a lost race actually settled on.
async fn already_processed(
    changes: &Arc<dyn ChangeRepository>,
    id: &ChangeId,
) -> ApplicationError {
    let status = match changes.find_by_id(id).await {
        Ok(Some(record)) => record.status,
        // The record was pending moments ago; treat an unreadable row as
        // approved-by-someone-else for reporting purposes.
        _ => ChangeStatus::Approved,
    };
    ApplicationError::AlreadyProcessed { id: id.0.clone(), status }
}
