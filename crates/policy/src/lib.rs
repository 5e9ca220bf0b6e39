use agegate_contracts::{Destination, RequestClassification, gate_location, is_gate_path};

/// Search-engine and link-preview clients that must see real content.
pub const DEFAULT_CRAWLER_PATTERNS: &[&str] = &[
    "googlebot",
    "google-inspectiontool",
    "adsbot-google",
    "mediapartners-google",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "applebot",
    "facebookexternalhit",
    "facebot",
    "twitterbot",
    "linkedinbot",
    "pinterestbot",
    "slackbot",
    "discordbot",
    "telegrambot",
    "whatsapp",
    "redditbot",
    "embedly",
    "skypeuripreview",
];

pub const MACHINE_DOCUMENT_EXTENSIONS: &[&str] = &[".xml", ".txt"];

pub const EXEMPT_PATH_PREFIXES: &[&str] = &["/_assets/", "/static/"];

pub const EXEMPT_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/robots.txt",
    "/favicon.ico",
    "/healthz",
    "/metrics",
];

/// Request-level signals the interceptor decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub verified: bool,
    /// GET or HEAD. Only navigations get their destination preserved.
    pub is_navigation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow(RequestClassification),
    Redirect {
        location: String,
        destination: Destination,
    },
}

impl GateDecision {
    pub fn classification(&self) -> RequestClassification {
        match self {
            GateDecision::Allow(classification) => *classification,
            GateDecision::Redirect { .. } => RequestClassification::Unverified,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, GateDecision::Redirect { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    crawler_patterns: Vec<String>,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl GatePolicy {
    pub fn new(extra_crawler_patterns: &[String]) -> Self {
        let mut crawler_patterns = DEFAULT_CRAWLER_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .chain(
                extra_crawler_patterns
                    .iter()
                    .map(|s| s.trim().to_ascii_lowercase()),
            )
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        crawler_patterns.sort();
        crawler_patterns.dedup();

        Self { crawler_patterns }
    }

    pub fn crawler_patterns(&self) -> &[String] {
        &self.crawler_patterns
    }

    pub fn is_crawler(&self, user_agent: Option<&str>) -> bool {
        let Some(user_agent) = user_agent.map(|ua| ua.trim()).filter(|ua| !ua.is_empty()) else {
            return false;
        };

        let user_agent = user_agent.to_ascii_lowercase();
        self.crawler_patterns
            .iter()
            .any(|pattern| user_agent.contains(pattern.as_str()))
    }

    /// First matching rule wins: crawler, exempt asset, verified, gate page.
    pub fn classify(&self, request: &GateRequest<'_>) -> RequestClassification {
        if self.is_crawler(request.user_agent) {
            RequestClassification::Crawler
        } else if is_exempt_path(request.path) {
            RequestClassification::StaticAsset
        } else if request.verified {
            RequestClassification::Verified
        } else if is_gate_path(request.path) {
            RequestClassification::GatePage
        } else {
            RequestClassification::Unverified
        }
    }

    pub fn decide(&self, request: &GateRequest<'_>) -> GateDecision {
        let classification = self.classify(request);
        if classification.is_allowed() {
            return GateDecision::Allow(classification);
        }

        let destination = if request.is_navigation {
            Destination::from_path_and_query(request.path, request.query)
        } else {
            Destination::root()
        };

        GateDecision::Redirect {
            location: gate_location(&destination),
            destination,
        }
    }
}

pub fn is_machine_document(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    MACHINE_DOCUMENT_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
}

pub fn is_exempt_path(path: &str) -> bool {
    is_machine_document(path)
        || EXEMPT_PATHS.contains(&path)
        || EXEMPT_PATH_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}
