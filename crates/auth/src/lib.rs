use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agegate_contracts::VERIFICATION_COOKIE;
use hex::ToHex;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

pub mod cookie;

pub use cookie::{CookieAttributes, build_expired_cookie, build_set_cookie, read_cookie};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";
const MAX_CLOCK_SKEW_SECS: u64 = 60;

pub const MIN_SECRET_LEN: usize = 32;

/// Browsers cap persistent cookie lifetime at 400 days.
pub const MAX_COOKIE_AGE: Duration = Duration::from_secs(400 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    fn invalid(message: &str) -> Self {
        Self {
            code: "ERR_VERIFICATION_INVALID",
            message: message.to_string(),
        }
    }
}

/// HMAC key for the verification cookie. Never printed.
#[derive(Clone)]
pub struct CookieSecret(SecretString);

impl CookieSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: format!("cookie secret must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
        Ok(Self(SecretString::from(secret)))
    }

    fn expose(&self) -> &[u8] {
        self.0.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for CookieSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CookieSecret(..)")
    }
}

impl PartialEq for CookieSecret {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for CookieSecret {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    pub secret: CookieSecret,
    /// `None` keeps a confirmation valid until the visitor clears it.
    pub ttl: Option<Duration>,
    pub secure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub issued_at_epoch_secs: u64,
}

/// Issues and checks the signed `age_verified` cookie.
///
/// Token format is `v1.<issued_at_unix_secs>.<hex hmac-sha256>`; the MAC covers
/// the cookie name, version and issue time.
#[derive(Debug, Clone)]
pub struct VerificationSigner {
    config: VerificationConfig,
}

impl VerificationSigner {
    pub fn new(config: VerificationConfig) -> Result<Self, AuthError> {
        if config.ttl.is_some_and(|ttl| ttl.as_secs() == 0) {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "verification ttl must be at least one second".to_string(),
            });
        }

        Ok(Self { config })
    }

    pub fn issue(&self, now_epoch_secs: u64) -> Result<String, AuthError> {
        let mut mac = self.mac()?;
        mac.update(signed_part(now_epoch_secs).as_bytes());
        let tag = mac.finalize().into_bytes().encode_hex::<String>();
        Ok(format!("{}.{}.{}", TOKEN_VERSION, now_epoch_secs, tag))
    }

    pub fn verify(&self, token: &str, now_epoch_secs: u64) -> Result<Verification, AuthError> {
        let mut parts = token.trim().split('.');
        let (Some(version), Some(issued), Some(tag), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::invalid("malformed verification token"));
        };

        if version != TOKEN_VERSION {
            return Err(AuthError::invalid("unsupported verification token version"));
        }

        let issued_at_epoch_secs = issued
            .parse::<u64>()
            .map_err(|_| AuthError::invalid("malformed verification issue time"))?;
        let tag = hex::decode(tag).map_err(|_| AuthError::invalid("malformed verification tag"))?;

        let mut mac = self.mac()?;
        mac.update(signed_part(issued_at_epoch_secs).as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| AuthError::invalid("verification signature mismatch"))?;

        if issued_at_epoch_secs > now_epoch_secs.saturating_add(MAX_CLOCK_SKEW_SECS) {
            return Err(AuthError::invalid("verification issued in the future"));
        }

        if let Some(ttl) = self.config.ttl
            && now_epoch_secs.saturating_sub(issued_at_epoch_secs) > ttl.as_secs()
        {
            return Err(AuthError {
                code: "ERR_VERIFICATION_EXPIRED",
                message: "verification has expired".to_string(),
            });
        }

        Ok(Verification {
            issued_at_epoch_secs,
        })
    }

    pub fn verify_headers(
        &self,
        headers: &HeaderMap,
        now_epoch_secs: u64,
    ) -> Result<Verification, AuthError> {
        let token = read_cookie(headers, VERIFICATION_COOKIE).ok_or_else(|| AuthError {
            code: "ERR_VERIFICATION_MISSING",
            message: "missing verification cookie".to_string(),
        })?;

        self.verify(&token, now_epoch_secs)
    }

    pub fn set_cookie(&self, token: &str) -> String {
        let max_age = self
            .config
            .ttl
            .map(|ttl| ttl.min(MAX_COOKIE_AGE))
            .unwrap_or(MAX_COOKIE_AGE);

        build_set_cookie(
            VERIFICATION_COOKIE,
            token,
            CookieAttributes {
                max_age,
                http_only: true,
                secure: self.config.secure,
            },
        )
    }

    pub fn clear_cookie(&self) -> String {
        build_expired_cookie(VERIFICATION_COOKIE, self.config.secure)
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.config.secret.expose()).map_err(|_| AuthError {
            code: "ERR_INTERNAL",
            message: "failed to initialize verification mac".to_string(),
        })
    }
}

fn signed_part(issued_at_epoch_secs: u64) -> String {
    format!(
        "{}|{}.{}",
        VERIFICATION_COOKIE, TOKEN_VERSION, issued_at_epoch_secs
    )
}

pub fn unix_epoch_secs_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(ttl: Option<Duration>) -> VerificationSigner {
        VerificationSigner::new(VerificationConfig {
            secret: CookieSecret::new("0123456789abcdef0123456789abcdef")
                .expect("secret should be accepted"),
            ttl,
            secure: false,
        })
        .expect("signer should build")
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = CookieSecret::new("short").unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = CookieSecret::new("0123456789abcdef0123456789abcdef").expect("secret ok");
        assert_eq!(format!("{:?}", secret), "CookieSecret(..)");
    }

    #[test]
    fn issued_token_verifies() {
        let signer = signer(None);
        let token = signer.issue(1_700_000_000).expect("issue should succeed");
        assert!(token.starts_with("v1.1700000000."));

        let verification = signer
            .verify(&token, 1_900_000_000)
            .expect("token without ttl should never expire");
        assert_eq!(verification.issued_at_epoch_secs, 1_700_000_000);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let signer = signer(None);
        let token = signer.issue(1_700_000_000).expect("issue should succeed");
        let forged = token.replacen("1700000000", "1700000001", 1);

        let err = signer.verify(&forged, 1_700_000_100).unwrap_err();
        assert_eq!(err.code, "ERR_VERIFICATION_INVALID");

        for garbage in ["", "true", "1", "v1.x.y", "v2.1.00", "v1.1.zz", "v1.1.00.extra"] {
            let err = signer.verify(garbage, 1_700_000_100).unwrap_err();
            assert_eq!(err.code, "ERR_VERIFICATION_INVALID", "{garbage:?}");
        }
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = VerificationSigner::new(VerificationConfig {
            secret: CookieSecret::new("ffffffffffffffffffffffffffffffff").expect("secret ok"),
            ttl: None,
            secure: false,
        })
        .expect("signer should build");
        let token = other.issue(1_700_000_000).expect("issue should succeed");

        let err = signer(None).verify(&token, 1_700_000_000).unwrap_err();
        assert_eq!(err.code, "ERR_VERIFICATION_INVALID");
    }

    #[test]
    fn ttl_expires_token() {
        let signer = signer(Some(Duration::from_secs(3600)));
        let token = signer.issue(1_700_000_000).expect("issue should succeed");

        assert!(signer.verify(&token, 1_700_003_600).is_ok());
        let err = signer.verify(&token, 1_700_003_601).unwrap_err();
        assert_eq!(err.code, "ERR_VERIFICATION_EXPIRED");
    }

    #[test]
    fn future_dated_token_is_rejected() {
        let signer = signer(None);
        let token = signer.issue(1_700_000_000).expect("issue should succeed");
        let err = signer.verify(&token, 1_600_000_000).unwrap_err();
        assert_eq!(err.code, "ERR_VERIFICATION_INVALID");
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let err = VerificationSigner::new(VerificationConfig {
            secret: CookieSecret::new("0123456789abcdef0123456789abcdef").expect("secret ok"),
            ttl: Some(Duration::ZERO),
            secure: false,
        })
        .unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn cookie_max_age_follows_ttl_with_browser_cap() {
        let durable = signer(None).set_cookie("t");
        assert!(durable.contains("Max-Age=34560000"));

        let short = signer(Some(Duration::from_secs(600))).set_cookie("t");
        assert!(short.contains("Max-Age=600"));

        assert!(signer(None).clear_cookie().starts_with("age_verified=; Path=/; Max-Age=0"));
    }
}
