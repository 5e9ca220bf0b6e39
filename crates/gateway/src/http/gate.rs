use std::net::SocketAddr;
use std::time::Instant;

use agegate_auth::unix_epoch_secs_now;
use agegate_policy::{GateDecision, GateRequest};
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

use super::session::VisitorSession;
use super::{AppState, redirect_response};

/// Edge interceptor: one allow/redirect decision per request, before any handler runs.
///
/// Only reads request state. Allowed requests continue with a [`VisitorSession`]
/// extension; everything else is sent to the gate with its destination in `next`.
pub(super) async fn intercept(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "fallback".to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let verification = match state
        .signer
        .verify_headers(request.headers(), unix_epoch_secs_now())
    {
        Ok(verification) => Some(verification),
        Err(err) => {
            if err.code != "ERR_VERIFICATION_MISSING" {
                tracing::debug!(code = err.code, path = %path, "ignoring unusable verification cookie");
            }
            None
        }
    };

    let decision = {
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok());
        state.policy.decide(&GateRequest {
            path: &path,
            query: request.uri().query(),
            user_agent,
            verified: verification.is_some(),
            is_navigation: method == Method::GET || method == Method::HEAD,
        })
    };
    let classification = decision.classification();
    crate::metrics::observe_gate_decision(classification.as_str(), decision.is_redirect());

    let response = match decision {
        GateDecision::Allow(_) => {
            let peer = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip());
            let session = VisitorSession::from_headers(request.headers(), verification, peer);
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        GateDecision::Redirect {
            location,
            destination,
        } => {
            tracing::info!(
                path = %path,
                destination = %destination,
                "redirecting unverified request to age gate"
            );
            redirect_response(StatusCode::TEMPORARY_REDIRECT, &location, &[])
        }
    };

    let latency = started.elapsed();
    tracing::debug!(
        route = %route,
        method = %method,
        classification = classification.as_str(),
        status = response.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        "gate decision"
    );
    crate::metrics::observe_http_request(
        &route,
        method.as_str(),
        response.status().as_u16(),
        latency,
    );

    response
}
