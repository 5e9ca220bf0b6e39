use agegate_contracts::sanitize_token;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use ulid::Ulid;

use crate::collector::UsageEvent;

use super::session::{VisitorSession, unix_epoch_ms_now};
use super::{ApiError, AppState, append_set_cookies, json_error};

const MAX_DETAIL_BYTES: usize = 4096;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct UsageEventRequest {
    calculator: String,
    action: String,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct UsageEventResponse {
    event_id: String,
    forwarded: bool,
}

pub(super) async fn record_usage_event(
    State(state): State<AppState>,
    Extension(session): Extension<VisitorSession>,
    req: Result<Json<UsageEventRequest>, JsonRejection>,
) -> Response {
    match record(&state, &session, req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn record(
    state: &AppState,
    session: &VisitorSession,
    req: Result<Json<UsageEventRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = req.map_err(|_| {
        crate::metrics::observe_usage_event("invalid");
        json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_JSON",
            "request body must be a usage event object",
            false,
        )
    })?;
    let (calculator, action, detail) = validate(req).inspect_err(|_| {
        crate::metrics::observe_usage_event("invalid");
    })?;

    let limit_key = session.limit_key("usage");
    if !state
        .rate_limiter
        .allow(&limit_key, state.config.rate_limit_usage_events_per_window)
    {
        crate::metrics::observe_usage_event("rate_limited");
        return Err(json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "ERR_RATE_LIMITED",
            "too many usage events; retry later",
            true,
        ));
    }

    let (visitor_id, visitor_cookie) = session.ensure_visitor_id(state.config.cookie_secure);
    let event = UsageEvent {
        event_id: Ulid::new().to_string(),
        visitor_id,
        referral_id: session.referral_id.clone(),
        calculator,
        action,
        detail,
        occurred_at_epoch_ms: unix_epoch_ms_now(),
    };

    let forwarded = match state.collector.as_ref() {
        Some(collector) => {
            let span = tracing::info_span!(
                "usage_event.report",
                event_id = %event.event_id,
                calculator = %event.calculator,
                action = %event.action,
            );
            match collector.report(&event).instrument(span).await {
                Ok(attempts) => {
                    crate::metrics::observe_usage_event("forwarded");
                    tracing::debug!(event_id = %event.event_id, attempts, "usage event forwarded");
                    true
                }
                Err(err) => {
                    crate::metrics::observe_usage_event(err.outcome());
                    tracing::warn!(
                        event_id = %event.event_id,
                        outcome = err.outcome(),
                        error = %err,
                        "usage event delivery failed"
                    );
                    false
                }
            }
        }
        None => {
            crate::metrics::observe_usage_event("dropped");
            false
        }
    };

    let mut headers = HeaderMap::new();
    append_set_cookies(&mut headers, visitor_cookie.as_slice());
    Ok((
        StatusCode::ACCEPTED,
        headers,
        Json(UsageEventResponse {
            event_id: event.event_id,
            forwarded,
        }),
    )
        .into_response())
}

fn validate(
    req: UsageEventRequest,
) -> Result<(String, String, Option<serde_json::Value>), ApiError> {
    let calculator = sanitize_token(&req.calculator).ok_or_else(|| {
        json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            "calculator must be a non-empty identifier",
            false,
        )
    })?;
    let action = sanitize_token(&req.action).ok_or_else(|| {
        json_error(
            StatusCode::BAD_REQUEST,
            "ERR_INVALID_PARAMS",
            "action must be a non-empty identifier",
            false,
        )
    })?;

    if let Some(detail) = req.detail.as_ref() {
        let size = serde_json::to_vec(detail).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > MAX_DETAIL_BYTES {
            return Err(json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "ERR_DETAIL_TOO_LARGE",
                format!("detail exceeds {} bytes", MAX_DETAIL_BYTES),
                false,
            ));
        }
    }

    Ok((calculator, action, req.detail))
}
