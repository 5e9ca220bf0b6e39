use std::time::Duration;

use agegate_auth::{VerificationConfig, VerificationSigner};
use agegate_contracts::{CONFIRM_PATH, DECLINE_PATH, GATE_PATH, RESET_PATH, ROOT_PATH};
use agegate_policy::GatePolicy;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Serialize;

use crate::collector::{CollectorConfig, UsageCollector};
use crate::config::{GatewayConfig, StartupError};
use crate::rate_limit::RateLimiter;

mod confirm;
pub mod content;
mod gate;
mod session;
mod usage;

pub use self::session::VisitorSession;

pub const USAGE_EVENTS_PATH: &str = "/v1/usage-events";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    signer: VerificationSigner,
    policy: GatePolicy,
    collector: Option<UsageCollector>,
    rate_limiter: RateLimiter,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Gateway with the built-in placeholder content behind the gate.
pub fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    router_with_content(config, content::router())
}

/// Gateway guarding `content`. Every route, including the content router's
/// fallback, passes through the interceptor.
pub fn router_with_content(config: GatewayConfig, content: Router) -> Result<Router, StartupError> {
    let signer = VerificationSigner::new(VerificationConfig {
        secret: config.cookie_secret.clone(),
        ttl: (config.verification_ttl_secs > 0)
            .then(|| Duration::from_secs(config.verification_ttl_secs)),
        secure: config.cookie_secure,
    })
    .map_err(|err| StartupError {
        code: err.code,
        message: err.message,
    })?;

    let policy = GatePolicy::new(&config.extra_crawler_patterns);

    let collector = match config.collector_url.clone() {
        Some(endpoint) => Some(
            UsageCollector::new(CollectorConfig {
                endpoint,
                timeout: Duration::from_millis(config.collector_timeout_ms),
                retry_max_attempts: config.collector_retry_max_attempts,
                retry_base_backoff: Duration::from_millis(config.collector_retry_base_backoff_ms),
            })
            .map_err(|_| StartupError {
                code: "ERR_COLLECTOR_UNAVAILABLE",
                message: "failed to initialize usage collector client".to_string(),
            })?,
        ),
        None => None,
    };

    let rate_limiter = RateLimiter::new(
        Duration::from_secs(config.rate_limit_window_secs.max(1)),
        16_384,
    );

    let state = AppState {
        config,
        signer,
        policy,
        collector,
        rate_limiter,
    };

    let gateway = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(GATE_PATH, get(confirm::gate_page))
        .route(CONFIRM_PATH, post(confirm::confirm))
        .route(DECLINE_PATH, post(confirm::decline))
        .route(RESET_PATH, post(confirm::reset))
        .route(USAGE_EVENTS_PATH, post(usage::record_usage_event))
        .with_state(state.clone());

    Ok(gateway
        .merge(content)
        .layer(middleware::from_fn_with_state(state, gate::intercept)))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

/// Redirect that is never cached. An unusable `location` falls back to the site root.
fn redirect_response(status: StatusCode, location: &str, cookies: &[String]) -> Response {
    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(location).unwrap_or_else(|_| {
        tracing::warn!("redirect location is not a valid header value; using site root");
        HeaderValue::from_static(ROOT_PATH)
    });
    headers.insert(header::LOCATION, location);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    append_set_cookies(&mut headers, cookies);

    (status, headers).into_response()
}

fn append_set_cookies(headers: &mut HeaderMap, cookies: &[String]) {
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(_) => tracing::warn!("dropping Set-Cookie with invalid header bytes"),
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
