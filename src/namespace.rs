//! URL namespaces shared by the routers and the link rewriter
//!
//! Three reserved path conventions live under the interception origin:
//!
//! * the replay namespace, `/replay/<timestamp>/<urir>`
//! * the control namespace, e.g. `/__detour__/`, which is never rewritten
//! * the registration scope, the path subtree the interception layer governs

use std::fmt;
use std::str::FromStr;

use url::{Origin, Url};

use crate::{DetourError, Result};

/// Default control namespace root
pub const DEFAULT_CONTROL_PREFIX: &str = "/__detour__/";

/// Default replay namespace root
pub const DEFAULT_REPLAY_PREFIX: &str = "/replay/";

/// Endpoint below the control namespace that accepts `record/<absolute-url>`
pub const RECORD_ENDPOINT: &str = "record/";

/// Capture timestamp: a non-empty run of ASCII digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(String);

impl Timestamp {
    /// Parse a capture timestamp
    ///
    /// # Errors
    ///
    /// Returns error if the input is empty or contains non-digits
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DetourError::InvalidNamespace(format!(
                "timestamp must be decimal digits, got '{s}'"
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Digits as written
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Timestamp {
    type Err = DetourError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A location inside the replay namespace: one capture of one original URL
///
/// The original URL is kept as written so that serializing a parsed location
/// reproduces its path byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayUrl {
    /// Capture the URL is replayed from
    pub timestamp: Timestamp,
    /// Original resource URL
    pub urir: Url,
    raw: String,
}

impl ReplayUrl {
    /// Create a replay location
    pub fn new(timestamp: Timestamp, urir: Url) -> Self {
        let raw = urir.as_str().to_string();
        Self {
            timestamp,
            urir,
            raw,
        }
    }

    /// Original URL exactly as it appears in the replay path
    pub fn urir_str(&self) -> &str {
        &self.raw
    }
}

/// The `/replay/<timestamp>/<urir>` path convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayNamespace {
    prefix: String,
}

impl ReplayNamespace {
    /// Create a replay namespace rooted at `prefix` (e.g. `/replay/`)
    ///
    /// # Errors
    ///
    /// Returns error if the prefix is not of the form `/segment/`
    pub fn new(prefix: &str) -> Result<Self> {
        validate_prefix("replay_prefix", prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
        })
    }

    /// Namespace root
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Check whether a path lies in the replay namespace
    pub fn contains(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Parse a path (optionally followed by `?query`) into a replay location
    ///
    /// # Errors
    ///
    /// Returns error if the path lacks the prefix, the timestamp, or an
    /// absolute original URL
    pub fn parse_path(&self, path_and_query: &str) -> Result<ReplayUrl> {
        let rest = path_and_query
            .strip_prefix(&self.prefix)
            .ok_or_else(|| DetourError::InvalidNamespace(path_and_query.to_string()))?;

        let (timestamp, urir) = rest
            .split_once('/')
            .ok_or_else(|| DetourError::InvalidNamespace(path_and_query.to_string()))?;

        let timestamp = Timestamp::parse(timestamp)?;
        let parsed = Url::parse(urir).map_err(|e| DetourError::invalid_url(urir, e))?;

        Ok(ReplayUrl {
            timestamp,
            urir: parsed,
            raw: urir.to_string(),
        })
    }

    /// Parse an absolute URL served by `origin` into a replay location
    ///
    /// Returns `None` for cross-origin URLs and for paths outside the namespace.
    pub fn parse_url(&self, url: &Url, origin: &Origin) -> Option<ReplayUrl> {
        if url.origin() != *origin || !self.contains(url.path()) {
            return None;
        }
        self.parse_path(&path_and_query(url)).ok()
    }

    /// Serialize a replay location to its path form
    pub fn to_path(&self, replay: &ReplayUrl) -> String {
        format!("{}{}/{}", self.prefix, replay.timestamp, replay.raw)
    }

    /// Serialize a replay location to an absolute URL under `origin`
    ///
    /// # Errors
    ///
    /// Returns error if the resulting string is not a valid URL
    pub fn to_url(&self, origin: &Origin, replay: &ReplayUrl) -> Result<Url> {
        let s = format!("{}{}", origin.ascii_serialization(), self.to_path(replay));
        Url::parse(&s).map_err(|e| DetourError::invalid_url(&s, e))
    }

    /// Extract the `/replay/<timestamp>/<scheme>://<authority>` prefix of a page path
    ///
    /// The authority is kept verbatim and must be followed by a `/`.
    pub fn page_prefix(&self, page_path: &str) -> Option<ReplayPrefix> {
        let rest = page_path.strip_prefix(&self.prefix)?;
        let (timestamp, urir) = rest.split_once('/')?;
        let timestamp = Timestamp::parse(timestamp).ok()?;

        let after_scheme = urir
            .strip_prefix("http://")
            .or_else(|| urir.strip_prefix("https://"))?;
        let authority_len = after_scheme.find('/')?;
        let origin_len = urir.len() - after_scheme.len() + authority_len;

        Some(ReplayPrefix {
            path: format!("{}{}/{}", self.prefix, timestamp, &urir[..origin_len]),
            timestamp,
        })
    }
}

impl Default for ReplayNamespace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_REPLAY_PREFIX.to_string(),
        }
    }
}

/// Namespace prefix a replayed page's links are rebased onto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPrefix {
    timestamp: Timestamp,
    path: String,
}

impl ReplayPrefix {
    /// Capture timestamp of the page
    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    /// Prefix path, e.g. `/replay/20230101000000/https://example.com`
    pub fn as_path(&self) -> &str {
        &self.path
    }
}

/// Reserved paths used by the interception layer itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlNamespace {
    prefix: String,
    record_marker: String,
}

impl ControlNamespace {
    /// Create a control namespace rooted at `prefix` (e.g. `/__detour__/`)
    ///
    /// # Errors
    ///
    /// Returns error if the prefix is not of the form `/segment/`
    pub fn new(prefix: &str) -> Result<Self> {
        validate_prefix("control_prefix", prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
            record_marker: format!("{prefix}{RECORD_ENDPOINT}"),
        })
    }

    /// Namespace root
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Check whether a path is the namespace root or lies below it
    pub fn contains(&self, path: &str) -> bool {
        path.starts_with(&self.prefix) || path == self.prefix.trim_end_matches('/')
    }

    /// Path of the record endpoint, e.g. `/__detour__/record/`
    pub fn record_path(&self) -> &str {
        &self.record_marker
    }

    /// Build `<origin>/<control-prefix>/record/<target>`
    ///
    /// # Errors
    ///
    /// Returns error if the result is not a valid URL
    pub fn record_url(&self, origin: &Origin, target: &str) -> Result<Url> {
        let s = format!("{}{}{}", origin.ascii_serialization(), self.record_marker, target);
        Url::parse(&s).map_err(|e| DetourError::invalid_url(&s, e))
    }

    /// Strip everything up to and including the last record marker
    ///
    /// Returns `None` if the marker does not occur.
    pub fn strip_record_marker<'a>(&self, s: &'a str) -> Option<&'a str> {
        s.rfind(&self.record_marker)
            .map(|i| &s[i + self.record_marker.len()..])
    }
}

impl Default for ControlNamespace {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_CONTROL_PREFIX.to_string(),
            record_marker: format!("{DEFAULT_CONTROL_PREFIX}{RECORD_ENDPOINT}"),
        }
    }
}

/// Path subtree governed by the interception layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope(String);

impl Scope {
    /// Create a scope
    ///
    /// # Errors
    ///
    /// Returns error if the scope is not an absolute path
    pub fn new(path: &str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(DetourError::Config(format!(
                "scope must be an absolute path, got '{path}'"
            )));
        }
        Ok(Self(path.to_string()))
    }

    /// Scope path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a path lies inside the scope
    pub fn contains(&self, path: &str) -> bool {
        path.starts_with(&self.0)
    }
}

/// Path plus `?query` of a URL, without fragment
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    }
}

fn validate_prefix(name: &str, prefix: &str) -> Result<()> {
    if prefix.len() < 3 || !prefix.starts_with('/') || !prefix.ends_with('/') {
        return Err(DetourError::Config(format!(
            "{name} must look like '/segment/', got '{prefix}'"
        )));
    }
    Ok(())
}
