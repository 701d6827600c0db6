//! JSON API for the change-approval workflow.
//!
//! Endpoints:
//! - `POST /api/v1/changes`              — submit a mutating request
//! - `GET  /api/v1/changes?status=...`   — list change records
//! - `GET  /api/v1/changes/stats`        — queue statistics for the caller
//! - `POST /api/v1/changes/{id}/approve` — approve a pending change
//! - `POST /api/v1/changes/{id}/reject`  — reject a pending change

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use staffdesk_core::domain::change::{
    ChangeId, ChangeStatus, ChangeType, PendingChange, TargetAddress, TargetEntity,
};
use staffdesk_core::errors::{ApplicationError, InterfaceError};
use staffdesk_core::workflow::ChangeSubmission;

use crate::actor::ResolvedActor;
use crate::workflow::ChangeWorkflowService;

#[derive(Clone)]
pub struct ApiState {
    service: Arc<ChangeWorkflowService>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub change_type: String,
    pub target: TargetRequest,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
    /// One of `employees`, `units`, `attendance`.
    pub entity: String,
    /// Unit name; required when entity is `attendance`.
    pub unit: Option<String>,
    pub document_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeResponse {
    pub id: String,
    pub change_type: &'static str,
    pub status: &'static str,
    pub requested_by: String,
    pub requested_by_role: String,
    pub requested_at: String,
    pub change_data: Map<String, Value>,
    pub target_collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_document_id: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_comments: Option<String>,
}

impl From<PendingChange> for ChangeResponse {
    fn from(change: PendingChange) -> Self {
        Self {
            id: change.id.0,
            change_type: change.change_type.as_str(),
            status: change.status.as_str(),
            requested_by: change.requested_by,
            requested_by_role: change.requested_by_role,
            requested_at: change.requested_at.to_rfc3339(),
            change_data: change.change_data,
            target_collection: change.target.collection(),
            target_document_id: change.target.document_id,
            description: change.description,
            reviewed_by: change.reviewed_by,
            reviewed_at: change.reviewed_at.map(|value| value.to_rfc3339()),
            review_comments: change.review_comments,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total: StatusTotals,
    pub by_type: Vec<TypeCountResponse>,
    pub my_pending: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusTotals {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

#[derive(Debug, Serialize)]
pub struct TypeCountResponse {
    #[serde(rename = "type")]
    pub change_type: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub comments: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub success: bool,
    pub id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

type ApiRejection = (StatusCode, Json<ApiError>);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(service: Arc<ChangeWorkflowService>) -> Router {
    Router::new()
        .route("/api/v1/changes", post(submit_change).get(list_changes))
        .route("/api/v1/changes/stats", get(change_stats))
        .route("/api/v1/changes/{id}/approve", post(approve_change))
        .route("/api/v1/changes/{id}/reject", post(reject_change))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn submit_change(
    State(state): State<ApiState>,
    ResolvedActor(actor): ResolvedActor,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiRejection> {
    let correlation_id = new_correlation_id();
    let submission = parse_submission(request)?;

    let outcome = state
        .service
        .submit(&actor, submission, &correlation_id)
        .await
        .map_err(|error| error_response(error, &correlation_id))?;

    // Direct applies answer 200; a deferred submission creates a reviewable
    // resource and answers 201.
    let status = if outcome.applied { StatusCode::OK } else { StatusCode::CREATED };
    Ok((
        status,
        Json(SubmitResponse {
            applied: outcome.applied,
            pending_id: outcome.pending_id.map(|id| id.0),
        }),
    ))
}

async fn list_changes(
    State(state): State<ApiState>,
    _actor: ResolvedActor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ChangeResponse>>, ApiRejection> {
    let correlation_id = new_correlation_id();
    let status = parse_status_filter(query.status.as_deref())?;

    let changes = state
        .service
        .list(status)
        .await
        .map_err(|error| error_response(error, &correlation_id))?;

    Ok(Json(changes.into_iter().map(ChangeResponse::from).collect()))
}

async fn change_stats(
    State(state): State<ApiState>,
    ResolvedActor(actor): ResolvedActor,
) -> Result<Json<StatsResponse>, ApiRejection> {
    let correlation_id = new_correlation_id();

    let stats = state
        .service
        .stats(&actor)
        .await
        .map_err(|error| error_response(error, &correlation_id))?;

    Ok(Json(StatsResponse {
        total: StatusTotals {
            pending: stats.total.pending,
            approved: stats.total.approved,
            rejected: stats.total.rejected,
        },
        by_type: stats
            .by_type
            .into_iter()
            .map(|entry| TypeCountResponse { change_type: entry.change_type, count: entry.count })
            .collect(),
        my_pending: stats.my_pending,
    }))
}

async fn approve_change(
    State(state): State<ApiState>,
    ResolvedActor(actor): ResolvedActor,
    Path(id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, ApiRejection> {
    let correlation_id = new_correlation_id();

    let outcome = state
        .service
        .approve(&ChangeId(id), &actor, request.comments.as_deref(), &correlation_id)
        .await
        .map_err(|error| error_response(error, &correlation_id))?;

    Ok(Json(ReviewResponse {
        success: true,
        id: outcome.id.0,
        status: outcome.status.as_str(),
    }))
}

async fn reject_change(
    State(state): State<ApiState>,
    ResolvedActor(actor): ResolvedActor,
    Path(id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, ApiRejection> {
    let correlation_id = new_correlation_id();

    let outcome = state
        .service
        .reject(&ChangeId(id), &actor, request.comments.as_deref(), &correlation_id)
        .await
        .map_err(|error| error_response(error, &correlation_id))?;

    Ok(Json(ReviewResponse {
        success: true,
        id: outcome.id.0,
        status: outcome.status.as_str(),
    }))
}

// ---------------------------------------------------------------------------
// Parsing and error mapping
// ---------------------------------------------------------------------------

fn parse_submission(request: SubmitRequest) -> Result<ChangeSubmission, ApiRejection> {
    let change_type = ChangeType::parse(&request.change_type).ok_or_else(|| {
        bad_request(format!("unknown changeType `{}`", request.change_type))
    })?;

    let entity = match request.target.entity.as_str() {
        "employees" => TargetEntity::Employees,
        "units" => TargetEntity::Units,
        "attendance" => {
            let unit = request
                .target
                .unit
                .as_deref()
                .map(str::trim)
                .filter(|unit| !unit.is_empty())
                .ok_or_else(|| {
                    bad_request("target.unit is required for attendance targets".to_string())
                })?;
            TargetEntity::attendance(unit)
        }
        other => {
            return Err(bad_request(format!(
                "unknown target entity `{other}` (expected employees|units|attendance)"
            )))
        }
    };

    Ok(ChangeSubmission {
        change_type,
        target: TargetAddress::new(entity, request.target.document_id),
        fields: request.fields,
    })
}

fn parse_status_filter(raw: Option<&str>) -> Result<Option<ChangeStatus>, ApiRejection> {
    match raw {
        None => Ok(None),
        Some("all") => Ok(None),
        Some(value) => ChangeStatus::parse(value).map(Some).ok_or_else(|| {
            bad_request(format!(
                "unknown status filter `{value}` (expected pending|approved|rejected|all)"
            ))
        }),
    }
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn bad_request(message: String) -> ApiRejection {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message, correlation_id: None }))
}

fn error_response(error: ApplicationError, correlation_id: &str) -> ApiRejection {
    let interface = error.into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ApiError {
            error: interface.user_message(),
            correlation_id: Some(correlation_id.to_string()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use staffdesk_core::audit::InMemoryAuditSink;
    use staffdesk_core::workflow::WorkflowEngine;
    use staffdesk_db::repositories::{
        ChangeRepository, EntityRecord, EntityStore, InMemoryChangeRepository,
        InMemoryEntityStore,
    };

    use crate::actor::{ACTOR_HEADER, ROLE_HEADER};
    use crate::workflow::ChangeWorkflowService;

    fn test_router() -> (Router, Arc<InMemoryEntityStore>) {
        let changes = Arc::new(InMemoryChangeRepository::default());
        let entities = Arc::new(InMemoryEntityStore::default());
        let service = Arc::new(ChangeWorkflowService::new(
            WorkflowEngine::default(),
            changes as Arc<dyn ChangeRepository>,
            Arc::clone(&entities) as Arc<dyn EntityStore>,
            Arc::new(InMemoryAuditSink::default()),
        ));
        (super::router(service), entities)
    }

    fn request(method: &str, uri: &str, actor: Option<(&str, &str)>, body: Value) -> Request<Body> {
        let mut builder =
            Request::builder().method(method).uri(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some((actor, role)) = actor {
            builder = builder.header(ACTOR_HEADER, actor).header(ROLE_HEADER, role);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn employee_update_body(document_id: &str, name: &str) -> Value {
        json!({
            "changeType": "employee-update",
            "target": {"entity": "employees", "documentId": document_id},
            "fields": {"name": name},
        })
    }

    async fn seed_employee(entities: &InMemoryEntityStore, id: &str, name: &str) {
        entities
            .upsert(EntityRecord {
                collection: "employees".to_string(),
                id: id.to_string(),
                fields: json!({"name": name}).as_object().expect("object").clone(),
                last_change: None,
                updated_at: chrono::Utc::now(),
            })
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn submit_without_actor_headers_is_rejected() {
        let (router, _) = test_router();

        let response = router
            .oneshot(request("POST", "/api/v1/changes", None, employee_update_body("EMP-9", "A")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().expect("error").contains("x-staffdesk-actor"));
    }

    #[tokio::test]
    async fn submit_with_unknown_role_is_rejected() {
        let (router, _) = test_router();

        let response = router
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-104", "superuser")),
                employee_update_body("EMP-9", "A"),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unprivileged_submit_creates_a_pending_change() {
        let (router, entities) = test_router();
        seed_employee(&entities, "EMP-9", "B").await;

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-104", "data-operations")),
                employee_update_body("EMP-9", "A"),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["applied"], json!(false));
        let pending_id = body["pendingId"].as_str().expect("pendingId").to_string();

        let response = router
            .oneshot(request(
                "GET",
                "/api/v1/changes?status=pending",
                Some(("REV-1", "admin")),
                json!(null),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().expect("array").len(), 1);
        assert_eq!(listed[0]["id"], json!(pending_id));
        assert_eq!(listed[0]["status"], json!("pending"));
        assert_eq!(listed[0]["changeType"], json!("employee-update"));
    }

    #[tokio::test]
    async fn privileged_submit_applies_directly() {
        let (router, entities) = test_router();
        seed_employee(&entities, "EMP-9", "B").await;

        let response = router
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-1", "admin")),
                employee_update_body("EMP-9", "A"),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["applied"], json!(true));
        assert!(body.get("pendingId").is_none());

        let record = entities.fetch("employees", "EMP-9").await.expect("fetch").expect("exists");
        assert_eq!(record.fields.get("name"), Some(&json!("A")));
    }

    #[tokio::test]
    async fn unknown_change_type_is_a_bad_request() {
        let (router, _) = test_router();

        let response = router
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-104", "data-operations")),
                json!({
                    "changeType": "employee-termination",
                    "target": {"entity": "employees", "documentId": "EMP-9"},
                    "fields": {"name": "A"},
                }),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().expect("error").contains("employee-termination"));
    }

    #[tokio::test]
    async fn approve_then_second_review_conflicts() {
        let (router, entities) = test_router();
        seed_employee(&entities, "EMP-9", "B").await;

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-104", "data-operations")),
                employee_update_body("EMP-9", "A"),
            ))
            .await
            .expect("response");
        let pending_id =
            body_json(response).await["pendingId"].as_str().expect("pendingId").to_string();

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/v1/changes/{pending_id}/approve"),
                Some(("REV-1", "admin")),
                json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["status"], json!("approved"));

        let record = entities.fetch("employees", "EMP-9").await.expect("fetch").expect("exists");
        assert_eq!(record.fields.get("name"), Some(&json!("A")));

        let response = router
            .oneshot(request(
                "POST",
                &format!("/api/v1/changes/{pending_id}/reject"),
                Some(("REV-2", "admin")),
                json!({"comments": "changed my mind"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert!(body["error"].as_str().expect("error").contains("already processed"));
    }

    #[tokio::test]
    async fn reject_without_comments_is_a_bad_request() {
        let (router, entities) = test_router();
        seed_employee(&entities, "EMP-9", "B").await;

        let response = router
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-104", "data-operations")),
                employee_update_body("EMP-9", "A"),
            ))
            .await
            .expect("response");
        let pending_id =
            body_json(response).await["pendingId"].as_str().expect("pendingId").to_string();

        let response = router
            .oneshot(request(
                "POST",
                &format!("/api/v1/changes/{pending_id}/reject"),
                Some(("REV-1", "admin")),
                json!({"comments": ""}),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn approving_a_missing_change_is_not_found() {
        let (router, _) = test_router();

        let response = router
            .oneshot(request(
                "POST",
                "/api/v1/changes/no-such-change/approve",
                Some(("REV-1", "admin")),
                json!({}),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_status_filter_is_a_bad_request() {
        let (router, _) = test_router();

        let response = router
            .oneshot(request(
                "GET",
                "/api/v1/changes?status=archived",
                Some(("REV-1", "admin")),
                json!(null),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_report_totals_by_type_and_my_pending() {
        let (router, entities) = test_router();
        seed_employee(&entities, "EMP-9", "B").await;

        router
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/changes",
                Some(("U-104", "data-operations")),
                employee_update_body("EMP-9", "A"),
            ))
            .await
            .expect("response");

        let response = router
            .oneshot(request(
                "GET",
                "/api/v1/changes/stats",
                Some(("U-104", "data-operations")),
                json!(null),
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"]["pending"], json!(1));
        assert_eq!(body["total"]["approved"], json!(0));
        assert_eq!(body["byType"][0]["type"], json!("employee-update"));
        assert_eq!(body["myPending"], json!(1));
    }
}
