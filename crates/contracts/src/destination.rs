use std::fmt;

use crate::{ROOT_PATH, is_gate_path};

const MAX_DESTINATION_LEN: usize = 2048;

/// Site-relative path plus optional query a visitor is returned to after the gate.
///
/// A `Destination` never leaves the site: it always starts with a single `/`,
/// carries no backslashes or control characters, and never points back at the
/// gate itself (those collapse to the root).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination(String);

impl Destination {
    pub fn root() -> Self {
        Self(ROOT_PATH.to_string())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.split_once('#').map(|(head, _)| head).unwrap_or(raw);

        if raw.is_empty() || raw.len() > MAX_DESTINATION_LEN {
            return None;
        }
        if !raw.starts_with('/') || raw.starts_with("//") {
            return None;
        }
        if raw.bytes().any(|b| b == b'\\' || b.is_ascii_control()) {
            return None;
        }

        let path = raw.split_once('?').map(|(path, _)| path).unwrap_or(raw);
        if is_gate_path(path) {
            return Some(Self::root());
        }

        Some(Self(raw.to_string()))
    }

    /// Absent or unusable input falls back to the root.
    pub fn resolve(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse).unwrap_or_else(Self::root)
    }

    pub fn from_path_and_query(path: &str, query: Option<&str>) -> Self {
        match query.filter(|q| !q.is_empty()) {
            Some(query) => Self::resolve(Some(&format!("{}?{}", path, query))),
            None => Self::resolve(Some(path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> &str {
        self.0
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.0)
    }

    pub fn query(&self) -> Option<&str> {
        self.0
            .split_once('?')
            .map(|(_, query)| query)
            .filter(|q| !q.is_empty())
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(self.query()?).ok()?;
        pairs
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_PATH
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
