//! Outgoing request as seen at the interception point

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method};
use url::{Origin, Url};

use crate::{DetourError, Result};

/// Request mode, as reported by `Sec-Fetch-Mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level or frame navigation
    Navigate,
    /// Same-origin only fetch
    SameOrigin,
    /// Opaque cross-origin subresource
    #[default]
    NoCors,
    /// CORS fetch
    Cors,
    /// WebSocket handshake
    WebSocket,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` value, `None` if unknown
    pub fn from_fetch_mode(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => Some(Self::Navigate),
            "same-origin" => Some(Self::SameOrigin),
            "no-cors" => Some(Self::NoCors),
            "cors" => Some(Self::Cors),
            "websocket" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

/// Whether credentials accompany the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Never send credentials
    Omit,
    /// Only for same-origin targets
    #[default]
    SameOrigin,
    /// Always send credentials
    Include,
}

/// How redirects of the request are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    /// Follow redirects transparently
    #[default]
    Follow,
    /// Fail on redirect
    Error,
    /// Hand the redirect back to the caller
    Manual,
}

/// An outgoing network request
///
/// Routers only read a request and clone it into a replacement; the body is
/// reference counted so cloning is cheap.
#[derive(Debug, Clone)]
pub struct Request {
    /// Absolute target URL
    pub url: Url,
    /// HTTP method
    pub method: Method,
    /// Header set
    pub headers: HeaderMap,
    /// Body bytes
    pub body: Bytes,
    /// Request mode
    pub mode: RequestMode,
    /// Credentials mode
    pub credentials: CredentialsMode,
    /// Redirect policy
    pub redirect: RedirectPolicy,
    /// Referrer URL, verbatim
    pub referrer: Option<String>,
}

impl Request {
    /// Create a request with default attributes
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            mode: RequestMode::default(),
            credentials: CredentialsMode::default(),
            redirect: RedirectPolicy::default(),
            referrer: None,
        }
    }

    /// Create a GET request for `url`
    ///
    /// # Errors
    ///
    /// Returns error if `url` is not an absolute URL
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| DetourError::invalid_url(url, e))?;
        Ok(Self::new(Method::GET, url))
    }

    /// Set the referrer
    #[must_use]
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Set the request mode
    #[must_use]
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Copy every attribute of this request onto a new target URL
    #[must_use]
    pub fn redirected_to(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }

    /// Check whether the target is served by `origin`
    pub fn is_same_origin(&self, origin: &Origin) -> bool {
        self.url.origin() == *origin
    }

    /// Referrer parsed as an absolute URL
    pub fn referrer_url(&self) -> Option<Url> {
        self.referrer.as_deref().and_then(|r| Url::parse(r).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_mode_parse() {
        assert_eq!(
            RequestMode::from_fetch_mode("navigate"),
            Some(RequestMode::Navigate)
        );
        assert_eq!(RequestMode::from_fetch_mode(" CORS "), Some(RequestMode::Cors));
        assert_eq!(RequestMode::from_fetch_mode("bogus"), None);
    }

    #[test]
    fn test_redirected_to_copies_attributes() {
        let mut request = Request::get("http://localhost:8080/a")
            .unwrap()
            .with_referrer("http://localhost:8080/page")
            .with_mode(RequestMode::Cors)
            .with_header(
                hyper::header::ACCEPT,
                HeaderValue::from_static("text/css"),
            );
        request.method = Method::POST;
        request.body = Bytes::from_static(b"payload");

        let target = Url::parse("http://localhost:8080/b").unwrap();
        let copy = request.redirected_to(target.clone());

        assert_eq!(copy.url, target);
        assert_eq!(copy.method, Method::POST);
        assert_eq!(copy.body, request.body);
        assert_eq!(copy.mode, RequestMode::Cors);
        assert_eq!(copy.referrer, request.referrer);
        assert_eq!(copy.headers, request.headers);
    }

    #[test]
    fn test_same_origin() {
        let origin = Url::parse("http://localhost:8080/").unwrap().origin();
        assert!(Request::get("http://localhost:8080/x").unwrap().is_same_origin(&origin));
        assert!(!Request::get("http://localhost:9090/x").unwrap().is_same_origin(&origin));
    }

    #[test]
    fn test_get_rejects_relative() {
        assert!(Request::get("/relative").is_err());
    }
}
