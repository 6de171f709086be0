//! Axum router and all HTTP handlers for admgr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Bodies are decoded by hand so every failure — decode
//! included — renders the same `{"error": "<message>"}` shape, and
//! [`status_for`] is the one place an error kind becomes an HTTP status.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use admgr_core::SlotQuery;
use admgr_schemas::{
    DeleteSlotRangeRequest, Error, ErrorKind, ReserveSlotRequest, SlotRangeRequest, SlotStatus,
};

use crate::{
    api_types::{ErrorResponse, HealthResponse, MessageResponse},
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (tracing) are **not** applied here; `main.rs` attaches
/// them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/adslots",
            post(create_adslots)
                .get(get_adslots)
                .patch(patch_adslots)
                .delete(delete_adslots),
        )
        .route("/adslots/reserve", patch(reserve_adslots))
        .route("/health-check", get(health_check))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping — the single kind→status point
// ---------------------------------------------------------------------------

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::DecodeFailure => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::DuplicateResource => StatusCode::CONFLICT,
        ErrorKind::ResourceNotFound => StatusCode::NOT_FOUND,
        ErrorKind::ActionForbidden => StatusCode::FORBIDDEN,
        ErrorKind::DetailedResourceInfoNotFound => StatusCode::NOT_FOUND,
        ErrorKind::DependentServiceRequestFailed => StatusCode::FAILED_DEPENDENCY,
    }
}

fn error_response(err: &Error) -> Response {
    (
        status_for(err.kind()),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn message_response(status: StatusCode, message: String) -> Response {
    (status, Json(MessageResponse { message })).into_response()
}

/// Decode a JSON body, mapping failures to `DecodeFailure`.
fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body)
        .map_err(|e| Error::decode_failure(format!("invalid request body: {e}")))
}

// ---------------------------------------------------------------------------
// POST /adslots
// ---------------------------------------------------------------------------

pub(crate) async fn create_adslots(State(st): State<Arc<AppState>>, body: Bytes) -> Response {
    let ranges: Vec<SlotRangeRequest> = match decode_body(&body) {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    match st.service.create_slots(&ranges).await {
        Ok(n) => message_response(StatusCode::CREATED, format!("Total {n} records created")),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /adslots
// ---------------------------------------------------------------------------

fn parse_date_param(params: &HashMap<String, String>, name: &str) -> Result<NaiveDate, Error> {
    let raw = params
        .get(name)
        .ok_or_else(|| Error::decode_failure(format!("{name} query parameter is required")))?;
    raw.parse()
        .map_err(|_| Error::decode_failure(format!("{name} must be a YYYY-MM-DD date: {raw}")))
}

fn parse_get_query(params: &HashMap<String, String>) -> Result<SlotQuery, Error> {
    let start_date = parse_date_param(params, "start_date")?;
    let end_date = parse_date_param(params, "end_date")?;

    let position = match params.get("position") {
        Some(raw) => Some(raw.parse::<i32>().map_err(|_| {
            Error::decode_failure(format!("position must be an integer: {raw}"))
        })?),
        None => None,
    };
    let status = match params.get("status") {
        Some(raw) => Some(SlotStatus::parse(raw)?),
        None => None,
    };

    Ok(SlotQuery {
        start_date,
        end_date,
        position,
        status,
        uid: params.get("uid").cloned(),
    })
}

pub(crate) async fn get_adslots(
    State(st): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = match parse_get_query(&params) {
        Ok(q) => q,
        Err(e) => return error_response(&e),
    };
    match st.service.get_slots(&query).await {
        Ok(groups) => (StatusCode::OK, Json(groups)).into_response(),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// PATCH /adslots
// ---------------------------------------------------------------------------

pub(crate) async fn patch_adslots(State(st): State<Arc<AppState>>, body: Bytes) -> Response {
    let ranges: Vec<SlotRangeRequest> = match decode_body(&body) {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    match st.service.patch_slots(&ranges).await {
        Ok(n) => message_response(StatusCode::OK, format!("Total {n} records updated")),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// DELETE /adslots
// ---------------------------------------------------------------------------

pub(crate) async fn delete_adslots(State(st): State<Arc<AppState>>, body: Bytes) -> Response {
    let ranges: Vec<DeleteSlotRangeRequest> = match decode_body(&body) {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    match st.service.delete_slots(&ranges).await {
        Ok(n) => message_response(StatusCode::OK, format!("Total {n} records deleted")),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// PATCH /adslots/reserve?uid=…
// ---------------------------------------------------------------------------

pub(crate) async fn reserve_adslots(
    State(st): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let uid = match params.get("uid") {
        Some(uid) if !uid.is_empty() => uid.clone(),
        _ => {
            return error_response(&Error::decode_failure("uid query parameter is required"));
        }
    };
    let requests: Vec<ReserveSlotRequest> = match decode_body(&body) {
        Ok(v) => v,
        Err(e) => return error_response(&e),
    };
    match st.service.reserve_slots(&requests, &uid).await {
        Ok(()) => message_response(StatusCode::OK, "Successfully reserved the slots".to_string()),
        Err(e) => error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /health-check
// ---------------------------------------------------------------------------

pub(crate) async fn health_check(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}
