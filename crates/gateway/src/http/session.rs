use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agegate_auth::{
    CookieAttributes, MAX_COOKIE_AGE, Verification, build_expired_cookie, build_set_cookie,
    read_cookie,
};
use agegate_contracts::{REFERRAL_COOKIE, VISITOR_COOKIE, sanitize_token};
use axum::http::HeaderMap;
use ulid::Ulid;

const REFERRAL_COOKIE_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Visitor context the interceptor attaches to every request it lets through.
///
/// Handlers read this instead of touching cookies directly. It is rebuilt per
/// request from the `visitor_id`, `referral_id` and `age_verified` cookies,
/// plus the peer address when the server exposes connection info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorSession {
    pub visitor_id: Option<String>,
    pub referral_id: Option<String>,
    pub verification: Option<Verification>,
    pub peer: Option<IpAddr>,
}

impl VisitorSession {
    pub fn from_headers(
        headers: &HeaderMap,
        verification: Option<Verification>,
        peer: Option<IpAddr>,
    ) -> Self {
        let visitor_id = read_cookie(headers, VISITOR_COOKIE)
            .and_then(|raw| raw.parse::<Ulid>().ok())
            .map(|id| id.to_string());
        let referral_id =
            read_cookie(headers, REFERRAL_COOKIE).and_then(|raw| sanitize_token(&raw));

        Self {
            visitor_id,
            referral_id,
            verification,
            peer,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification.is_some()
    }

    /// Rate-limit bucket: the visitor cookie when present, else the peer address.
    /// Cookie-less callers without connection info share one bucket.
    pub(super) fn limit_key(&self, scope: &str) -> String {
        match (self.visitor_id.as_ref(), self.peer) {
            (Some(visitor_id), _) => format!("{}:visitor:{}", scope, visitor_id),
            (None, Some(peer)) => format!("{}:peer:{}", scope, peer),
            (None, None) => format!("{}:anonymous", scope),
        }
    }

    /// Existing visitor id, or a fresh one plus the `Set-Cookie` that persists it.
    pub(super) fn ensure_visitor_id(&self, secure: bool) -> (String, Option<String>) {
        if let Some(visitor_id) = self.visitor_id.as_ref() {
            return (visitor_id.clone(), None);
        }

        let visitor_id = Ulid::new().to_string();
        let cookie = build_set_cookie(
            VISITOR_COOKIE,
            &visitor_id,
            CookieAttributes {
                max_age: MAX_COOKIE_AGE,
                http_only: true,
                secure,
            },
        );
        (visitor_id, Some(cookie))
    }
}

pub(super) fn referral_cookie(referral_id: &str, secure: bool) -> String {
    build_set_cookie(
        REFERRAL_COOKIE,
        referral_id,
        CookieAttributes {
            max_age: REFERRAL_COOKIE_MAX_AGE,
            http_only: true,
            secure,
        },
    )
}

pub(super) fn clear_session_cookies(secure: bool) -> [String; 2] {
    [
        build_expired_cookie(VISITOR_COOKIE, secure),
        build_expired_cookie(REFERRAL_COOKIE, secure),
    ]
}

pub(super) fn unix_epoch_ms_now() -> i64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    duration.as_millis().min(i64::MAX as u128) as i64
}
