use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use agegate_auth::CookieSecret;
use agegate_contracts::DEFAULT_DECLINE_URL;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub cookie_secret: CookieSecret,
    pub cookie_secure: bool,
    pub verification_ttl_secs: u64,
    pub decline_url: String,
    pub extra_crawler_patterns: Vec<String>,
    pub collector_url: Option<String>,
    pub collector_timeout_ms: u64,
    pub collector_retry_max_attempts: u32,
    pub collector_retry_base_backoff_ms: u64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_usage_events_per_window: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("AGEGATE_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("AGEGATE_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "AGEGATE_BIND_ADDR",
        )?;

        let cookie_secure = parse_bool(kv.get("AGEGATE_COOKIE_SECURE")).unwrap_or(false);

        let dev_allow_nonlocal_bind =
            parse_bool(kv.get("AGEGATE_DEV_ALLOW_NONLOCAL_BIND")).unwrap_or(false);

        if !bind_addr.ip().is_loopback() && !cookie_secure {
            if dev_allow_nonlocal_bind && is_unspecified_ip(bind_addr.ip()) {
                // Explicit dev-only escape hatch for local containers without TLS.
            } else {
                return Err(StartupError {
                    code: "ERR_NONLOCAL_BIND_REQUIRES_SECURE_COOKIE",
                    message: "non-local bind requires AGEGATE_COOKIE_SECURE=true; refuse startup"
                        .to_string(),
                });
            }
        }

        let cookie_secret = require_nonempty(kv, "AGEGATE_COOKIE_SECRET")?;
        let cookie_secret = CookieSecret::new(cookie_secret).map_err(|_| StartupError {
            code: "ERR_INVALID_COOKIE_SECRET",
            message: format!(
                "AGEGATE_COOKIE_SECRET must be at least {} bytes",
                agegate_auth::MIN_SECRET_LEN
            ),
        })?;

        let verification_ttl_secs = parse_u64(
            kv.get("AGEGATE_VERIFICATION_TTL_SECS"),
            0,
            "AGEGATE_VERIFICATION_TTL_SECS",
        )?;

        let decline_url = kv
            .get("AGEGATE_DECLINE_URL")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_DECLINE_URL)
            .to_string();
        if !is_absolute_http_url(&decline_url) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "AGEGATE_DECLINE_URL must be an absolute http(s) URL".to_string(),
            });
        }

        let mut extra_crawler_patterns = kv
            .get("AGEGATE_EXTRA_CRAWLER_PATTERNS")
            .map(|s| s.as_str())
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        extra_crawler_patterns.sort();
        extra_crawler_patterns.dedup();

        let collector_url = kv
            .get("AGEGATE_COLLECTOR_URL")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        if let Some(url) = collector_url.as_deref()
            && !is_absolute_http_url(url)
        {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "AGEGATE_COLLECTOR_URL must be an absolute http(s) URL".to_string(),
            });
        }

        let collector_timeout_ms = parse_u64(
            kv.get("AGEGATE_COLLECTOR_TIMEOUT_MS"),
            1000,
            "AGEGATE_COLLECTOR_TIMEOUT_MS",
        )?;
        let collector_retry_max_attempts = parse_u32(
            kv.get("AGEGATE_COLLECTOR_RETRY_MAX_ATTEMPTS"),
            2,
            "AGEGATE_COLLECTOR_RETRY_MAX_ATTEMPTS",
        )?;
        if collector_retry_max_attempts > 10 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "AGEGATE_COLLECTOR_RETRY_MAX_ATTEMPTS must be <= 10".to_string(),
            });
        }
        let collector_retry_base_backoff_ms = parse_u64(
            kv.get("AGEGATE_COLLECTOR_RETRY_BASE_BACKOFF_MS"),
            50,
            "AGEGATE_COLLECTOR_RETRY_BASE_BACKOFF_MS",
        )?;

        let rate_limit_window_secs = parse_u64(
            kv.get("AGEGATE_RATE_LIMIT_WINDOW_SECS"),
            60,
            "AGEGATE_RATE_LIMIT_WINDOW_SECS",
        )?;
        let rate_limit_usage_events_per_window = parse_u32(
            kv.get("AGEGATE_RATE_LIMIT_USAGE_EVENTS_PER_WINDOW"),
            120,
            "AGEGATE_RATE_LIMIT_USAGE_EVENTS_PER_WINDOW",
        )?;

        Ok(Self {
            bind_addr,
            cookie_secret,
            cookie_secure,
            verification_ttl_secs,
            decline_url,
            extra_crawler_patterns,
            collector_url,
            collector_timeout_ms,
            collector_retry_max_attempts,
            collector_retry_base_backoff_ms,
            rate_limit_window_secs,
            rate_limit_usage_events_per_window,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_contents(&contents)
}

fn parse_env_contents(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &s[1..bytes.len() - 1];
        }
    }
    s
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    let value = kv
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })?;

    Ok(value.to_string())
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn is_unspecified_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_unspecified(),
    }
}

fn is_absolute_http_url(s: &str) -> bool {
    let Some(rest) = s
        .strip_prefix("https://")
        .or_else(|| s.strip_prefix("http://"))
    else {
        return false;
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty()
        && !s
            .bytes()
            .any(|b| b.is_ascii_control() || b.is_ascii_whitespace())
}
