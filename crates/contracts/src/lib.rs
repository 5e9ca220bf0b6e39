use serde::{Deserialize, Serialize};

pub mod destination;

pub use destination::Destination;

pub const ROOT_PATH: &str = "/";
pub const GATE_PATH: &str = "/age-gate";
pub const CONFIRM_PATH: &str = "/age-gate/confirm";
pub const DECLINE_PATH: &str = "/age-gate/decline";
pub const RESET_PATH: &str = "/age-gate/reset";

/// Query parameter (gate page) and form field (confirm) carrying the pending destination.
pub const NEXT_PARAM: &str = "next";
/// Referral parameter recognised on preserved destinations.
pub const REFERRAL_PARAM: &str = "ref";

pub const VERIFICATION_COOKIE: &str = "age_verified";
pub const VISITOR_COOKIE: &str = "visitor_id";
pub const REFERRAL_COOKIE: &str = "referral_id";

pub const DEFAULT_DECLINE_URL: &str = "https://www.google.com/";

const MAX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClassification {
    Crawler,
    StaticAsset,
    GatePage,
    Verified,
    Unverified,
}

impl RequestClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestClassification::Crawler => "crawler",
            RequestClassification::StaticAsset => "static_asset",
            RequestClassification::GatePage => "gate_page",
            RequestClassification::Verified => "verified",
            RequestClassification::Unverified => "unverified",
        }
    }

    pub fn is_allowed(self) -> bool {
        !matches!(self, RequestClassification::Unverified)
    }
}

/// True for the gate page and every route mounted below it.
pub fn is_gate_path(path: &str) -> bool {
    path == GATE_PATH
        || path
            .strip_prefix(GATE_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Redirect target sending a visitor to the gate while remembering where they were headed.
pub fn gate_location(destination: &Destination) -> String {
    if destination.is_root() {
        return GATE_PATH.to_string();
    }

    match serde_urlencoded::to_string(&[(NEXT_PARAM, destination.as_str())]) {
        Ok(query) => format!("{}?{}", GATE_PATH, query),
        Err(_) => GATE_PATH.to_string(),
    }
}

/// Keeps `[A-Za-z0-9._-]`, truncated to 64 chars. Used for referral ids and event labels.
pub fn sanitize_token(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len().min(MAX_TOKEN_LEN));

    for ch in raw.trim().chars() {
        if out.len() >= MAX_TOKEN_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}
