use std::time::Duration;

use http::HeaderMap;
use http::header;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieAttributes {
    pub max_age: Duration,
    pub http_only: bool,
    pub secure: bool,
}

/// First non-empty value of cookie `name` across every `Cookie` header.
///
/// Header values that are not valid UTF-8 are skipped rather than rejected.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };

        for pair in raw.split(';') {
            let Some((key, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() != name {
                continue;
            }

            let value = strip_quotes(value.trim());
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

pub fn build_set_cookie(name: &str, value: &str, attributes: CookieAttributes) -> String {
    let mut out = format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax",
        name,
        value,
        attributes.max_age.as_secs()
    );
    if attributes.http_only {
        out.push_str("; HttpOnly");
    }
    if attributes.secure {
        out.push_str("; Secure");
    }
    out
}

pub fn build_expired_cookie(name: &str, secure: bool) -> String {
    build_set_cookie(
        name,
        "",
        CookieAttributes {
            max_age: Duration::ZERO,
            http_only: true,
            secure,
        },
    )
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
}
