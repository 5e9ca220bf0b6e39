use agegate_auth::unix_epoch_secs_now;
use agegate_contracts::{
    CONFIRM_PATH, DECLINE_PATH, Destination, GATE_PATH, REFERRAL_PARAM, ROOT_PATH, gate_location,
    sanitize_token,
};
use axum::Extension;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::session::{VisitorSession, clear_session_cookies, referral_cookie};
use super::{AppState, escape_html, redirect_response};

/// `next` as carried by the gate page query string and the confirm form.
#[derive(Debug, Default, Deserialize)]
pub(super) struct PendingDestination {
    #[serde(default)]
    next: Option<String>,
}

/// Renders the prompt. Writes nothing: abandoning the page leaves no state behind.
pub(super) async fn gate_page(
    Extension(session): Extension<VisitorSession>,
    query: Result<Query<PendingDestination>, QueryRejection>,
) -> Response {
    if session.is_verified() {
        crate::metrics::observe_confirmation("short_circuit");
        return redirect_response(StatusCode::SEE_OTHER, ROOT_PATH, &[]);
    }

    let next = query.ok().and_then(|Query(pending)| pending.next);
    let destination = Destination::resolve(next.as_deref());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    (StatusCode::OK, headers, render_gate_page(&destination)).into_response()
}

pub(super) async fn confirm(
    State(state): State<AppState>,
    Extension(session): Extension<VisitorSession>,
    headers: HeaderMap,
    form: Result<Form<PendingDestination>, FormRejection>,
) -> Response {
    let next = form.ok().and_then(|Form(pending)| pending.next);
    let destination = Destination::resolve(next.as_deref());
    let secure = state.config.cookie_secure;

    if !is_same_origin_post(&headers) {
        crate::metrics::observe_confirmation("cross_site_rejected");
        tracing::warn!(destination = %destination, "rejecting cross-site age confirmation");
        return redirect_response(StatusCode::SEE_OTHER, &gate_location(&destination), &[]);
    }

    let token = match state.signer.issue(unix_epoch_secs_now()) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(code = err.code, "failed to issue verification cookie");
            crate::metrics::observe_confirmation("issue_failed");
            return redirect_response(StatusCode::SEE_OTHER, &gate_location(&destination), &[]);
        }
    };

    let (visitor_id, visitor_cookie) = session.ensure_visitor_id(secure);
    let mut cookies = vec![state.signer.set_cookie(&token)];
    cookies.extend(visitor_cookie);
    if let Some(referral_id) = destination
        .query_param(REFERRAL_PARAM)
        .and_then(|raw| sanitize_token(&raw))
    {
        cookies.push(referral_cookie(&referral_id, secure));
    }

    let outcome = if session.is_verified() {
        "reconfirmed"
    } else {
        "confirmed"
    };
    crate::metrics::observe_confirmation(outcome);
    tracing::info!(
        visitor_id = %visitor_id,
        destination = %destination,
        outcome,
        "age confirmed"
    );

    redirect_response(StatusCode::SEE_OTHER, destination.as_str(), &cookies)
}

pub(super) async fn decline(State(state): State<AppState>) -> Response {
    crate::metrics::observe_confirmation("declined");
    tracing::info!("age gate declined");
    redirect_response(StatusCode::SEE_OTHER, &state.config.decline_url, &[])
}

pub(super) async fn reset(
    State(state): State<AppState>,
    Extension(session): Extension<VisitorSession>,
    headers: HeaderMap,
) -> Response {
    if !is_same_origin_post(&headers) {
        crate::metrics::observe_confirmation("cross_site_rejected");
        tracing::warn!("rejecting cross-site session reset");
        return redirect_response(StatusCode::SEE_OTHER, GATE_PATH, &[]);
    }

    let mut cookies = vec![state.signer.clear_cookie()];
    cookies.extend(clear_session_cookies(state.config.cookie_secure));

    crate::metrics::observe_confirmation("reset");
    tracing::info!(
        visitor_id = session.visitor_id.as_deref().unwrap_or("-"),
        "visitor session reset"
    );

    redirect_response(StatusCode::SEE_OTHER, GATE_PATH, &cookies)
}

/// Whether a state-changing form post was sent by this site's own pages.
///
/// `Sec-Fetch-Site` decides when the browser sends it. Otherwise a present
/// `Origin` must name the requested host. Clients sending neither are not
/// browsers and cannot be driven by another site.
fn is_same_origin_post(headers: &HeaderMap) -> bool {
    if let Some(site) = headers.get("sec-fetch-site") {
        return matches!(site.to_str(), Ok("same-origin" | "none"));
    }

    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    let (Ok(origin), Some(host)) = (
        origin.to_str(),
        headers.get(header::HOST).and_then(|v| v.to_str().ok()),
    ) else {
        return false;
    };

    origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .is_some_and(|authority| authority.eq_ignore_ascii_case(host))
}

fn render_gate_page(destination: &Destination) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex">
<title>Age verification</title>
</head>
<body>
<main>
<h1>Are you 21 or older?</h1>
<p>You must be of legal age to use this site.</p>
<form method="post" action="{confirm}">
<input type="hidden" name="next" value="{next}">
<button type="submit">Yes, I am 21 or older</button>
</form>
<form method="post" action="{decline}">
<button type="submit">No, take me away</button>
</form>
</main>
</body>
</html>
"#,
        confirm = CONFIRM_PATH,
        decline = DECLINE_PATH,
        next = escape_html(destination.as_str()),
    )
}
