//! Deterministic change-approval engine.
//!
//! Pure decision and transition logic for the approval workflow: routing a
//! submission to the direct-apply or defer path, validating it, constructing
//! the pending record, and enforcing the `pending -> approved | rejected`
//! state machine. Persistence (including the CAS guard that arbitrates
//! concurrent reviews) lives behind the repository layer; everything here is
//! a pure function of its inputs.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::diff::{diff_fields, watched_keys};
use crate::domain::actor::{ActorContext, Role};
use crate::domain::change::{
    ChangeId, ChangeStatus, ChangeTrail, ChangeType, PendingChange, TargetAddress,
};
use crate::errors::DomainError;

/// Deployment policy for the workflow engine.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Roles whose submissions bypass review and apply directly.
    pub privileged_roles: Vec<Role>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { privileged_roles: vec![Role::Admin] }
    }
}

/// Which path a submission takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitRoute {
    DirectApply,
    Defer,
}

/// A validated mutating request, ready for routing.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSubmission {
    pub change_type: ChangeType,
    pub target: TargetAddress,
    pub fields: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approve,
    Reject,
}

impl ReviewVerdict {
    pub fn target_status(&self) -> ChangeStatus {
        match self {
            Self::Approve => ChangeStatus::Approved,
            Self::Reject => ChangeStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine {
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn route(&self, role: Role) -> SubmitRoute {
        if self.config.privileged_roles.contains(&role) {
            SubmitRoute::DirectApply
        } else {
            SubmitRoute::Defer
        }
    }

    /// Rejects malformed submissions before any store access.
    pub fn validate_submission(&self, submission: &ChangeSubmission) -> Result<(), DomainError> {
        if submission.fields.is_empty() {
            return Err(DomainError::EmptyChangePayload);
        }
        if submission.change_type.requires_document_id() && submission.target.document_id.is_none()
        {
            return Err(DomainError::MissingTargetDocument {
                change_type: submission.change_type,
            });
        }
        Ok(())
    }

    /// Construct the deferred record for a submission taking the defer path.
    /// The payload is captured verbatim; the actor and role are snapshotted.
    pub fn build_pending(
        &self,
        actor: &ActorContext,
        submission: ChangeSubmission,
        now: DateTime<Utc>,
    ) -> Result<PendingChange, DomainError> {
        self.validate_submission(&submission)?;

        let description = describe(submission.change_type, &submission.fields, &submission.target);

        Ok(PendingChange {
            id: ChangeId(Uuid::new_v4().to_string()),
            change_type: submission.change_type,
            status: ChangeStatus::Pending,
            requested_by: actor.actor.clone(),
            requested_by_role: actor.role.as_str().to_string(),
            requested_at: now,
            change_data: submission.fields,
            target: submission.target,
            description,
            reviewed_by: None,
            reviewed_at: None,
            review_comments: None,
        })
    }

    /// The `pending -> approved | rejected` transition, as a pure function.
    ///
    /// Returns the finalized copy with the review trio set together. The
    /// store-level CAS must still arbitrate races; this enforces the rules a
    /// single caller can violate: no transition out of a terminal state, and
    /// no rejection without comments.
    pub fn finalize_review(
        &self,
        record: &PendingChange,
        verdict: ReviewVerdict,
        reviewer: &str,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PendingChange, DomainError> {
        let comments = comments.map(str::trim).unwrap_or_default();
        if matches!(verdict, ReviewVerdict::Reject) && comments.is_empty() {
            return Err(DomainError::MissingReviewComments);
        }
        if record.status.is_terminal() {
            return Err(DomainError::InvalidChangeTransition {
                from: record.status,
                to: verdict.target_status(),
            });
        }

        let mut finalized = record.clone();
        finalized.status = verdict.target_status();
        finalized.reviewed_by = Some(reviewer.to_string());
        finalized.reviewed_at = Some(now);
        finalized.review_comments = Some(comments.to_string());
        Ok(finalized)
    }

    /// Audit trail for an applied mutation: the watched-key diff of the
    /// proposed payload against the record being replaced.
    pub fn build_trail(
        &self,
        existing: Option<&Map<String, Value>>,
        proposed: &Map<String, Value>,
        change_type: ChangeType,
        updated_by: &str,
        now: DateTime<Utc>,
    ) -> ChangeTrail {
        ChangeTrail {
            updated_by: updated_by.to_string(),
            updated_at: now,
            changes: diff_fields(existing, proposed, watched_keys(change_type)),
        }
    }
}

/// Human-readable summary, generated once at submission time.
pub fn describe(
    change_type: ChangeType,
    fields: &Map<String, Value>,
    target: &TargetAddress,
) -> String {
    let label = match change_type {
        ChangeType::EmployeeRegistration => "Employee registration",
        ChangeType::EmployeeUpdate => "Employee update",
        ChangeType::UnitRegistration => "Unit registration",
        ChangeType::UnitUpdate => "Unit update",
        ChangeType::AttendanceMark => "Attendance mark",
        ChangeType::BulkUpload => "Bulk upload",
    };

    let subject = ["name", "unitName", "employeeId", "source"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| target.document_id.clone())
        .unwrap_or_else(|| "new record".to_string());

    format!("{label} for {subject}")
}
