pub mod audit;
pub mod config;
pub mod diff;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use chrono;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::actor::{ActorContext, Role};
pub use domain::change::{
    ApplyMode, ChangeId, ChangeStatus, ChangeTrail, ChangeType, FieldChange, PendingChange,
    TargetAddress, TargetEntity,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use workflow::{
    ChangeSubmission, ReviewVerdict, SubmitRoute, WorkflowConfig, WorkflowEngine,
};
