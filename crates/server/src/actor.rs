//! Actor-context extraction.
//!
//! Authentication and session resolution happen upstream; by the time a
//! request reaches this service the proxy has stamped the resolved identity
//! and role onto two headers. The workflow itself never reads ambient state.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::Json;

use staffdesk_core::domain::actor::{ActorContext, Role};

use crate::api::ApiError;

pub const ACTOR_HEADER: &str = "x-staffdesk-actor";
pub const ROLE_HEADER: &str = "x-staffdesk-role";

/// Extracted actor identity for a request.
#[derive(Clone, Debug)]
pub struct ResolvedActor(pub ActorContext);

impl<S> FromRequestParts<S> for ResolvedActor
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = header_value(parts, ACTOR_HEADER)?;
        let role_raw = header_value(parts, ROLE_HEADER)?;
        let role = Role::parse(&role_raw).ok_or_else(|| {
            rejection(format!("header `{ROLE_HEADER}` carries unknown role `{role_raw}`"))
        })?;

        Ok(Self(ActorContext::new(actor, role)))
    }
}

fn header_value(parts: &Parts, name: &str) -> Result<String, (StatusCode, Json<ApiError>)> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| rejection(format!("missing required header `{name}`")))
}

fn rejection(message: String) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message, correlation_id: None }))
}
