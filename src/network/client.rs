//! HTTP client issuing routed requests

use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};
use url::{Origin, Url};

use super::{HttpHandler, CONNECT_TIMEOUT_MS};
use crate::namespace::path_and_query;
use crate::request::Request;
use crate::{DetourError, Result};

/// Headers that describe one hop and are never forwarded
static HOP_BY_HOP: [header::HeaderName; 6] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// HTTP client for routed requests
///
/// URLs on the interception origin are served by the archive backend; any
/// other URL is fetched from its own origin.
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    origin: Origin,
    backend: String,
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(origin: Origin, backend: &Url, max_response_size: usize) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(CONNECT_TIMEOUT_MS)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(connector);

        Self {
            client,
            origin,
            backend: backend.origin().ascii_serialization(),
            max_response_size,
        }
    }

    /// Resolve the URI a request for `url` is sent to
    ///
    /// # Errors
    ///
    /// Returns error if the result is not a valid URI
    pub fn destination(&self, url: &Url) -> Result<Uri> {
        let target = if url.origin() == self.origin {
            format!("{}{}", self.backend, path_and_query(url))
        } else {
            format!("{}{}", url.origin().ascii_serialization(), path_and_query(url))
        };

        target
            .parse::<Uri>()
            .map_err(|e| DetourError::invalid_url(&target, e))
    }

    /// Send a request and collect its response
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response exceeds the size limit
    pub async fn forward(&self, request: &Request) -> Result<ForwardedResponse> {
        let uri = self.destination(&request.url)?;
        debug!("Forwarding {} {} to {}", request.method, request.url, uri);

        let mut builder = hyper::Request::builder()
            .method(request.method.clone())
            .uri(uri.clone());

        if let Some(headers) = builder.headers_mut() {
            *headers = forwarded_headers(&request.headers);
            if let Some(authority) = uri.authority() {
                if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                    headers.insert(header::HOST, host);
                }
            }
            if let Some(referrer) = &request.referrer {
                if !headers.contains_key(header::REFERER) {
                    if let Ok(value) = HeaderValue::from_str(referrer) {
                        headers.insert(header::REFERER, value);
                    }
                }
            }
        }

        let http_request = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| DetourError::Other(format!("Failed to build request: {e}")))?;

        let response = self.client.request(http_request).await.map_err(|e| {
            warn!("Request to {} failed: {}", uri, e);
            DetourError::Upstream(format!("{uri}: {e}"))
        })?;

        let status = response.status();
        let headers = forwarded_headers(response.headers());
        let body = HttpHandler::read_body(response.into_body(), self.max_response_size).await?;

        Ok(ForwardedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Response to a routed request
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// End-to-end response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl ForwardedResponse {
    /// Check whether the body is uncompressed HTML
    pub fn is_plain_html(&self) -> bool {
        let is_html = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"));

        is_html && !self.headers.contains_key(header::CONTENT_ENCODING)
    }
}

/// Copy headers minus hop-by-hop fields and any stale length
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out.remove(header::CONTENT_LENGTH);
    out.remove("keep-alive");
    out.remove("proxy-connection");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpClient {
        let origin = Url::parse("http://localhost:8080").unwrap().origin();
        let backend = Url::parse("http://127.0.0.1:9090").unwrap();
        HttpClient::new(origin, &backend, 1024)
    }

    #[tokio::test]
    async fn test_same_origin_goes_to_backend() {
        let url = Url::parse(
            "http://localhost:8080/replay/20230101000000/https://example.com/a.css?v=2",
        )
        .unwrap();

        assert_eq!(
            client().destination(&url).unwrap().to_string(),
            "http://127.0.0.1:9090/replay/20230101000000/https://example.com/a.css?v=2"
        );
    }

    #[tokio::test]
    async fn test_cross_origin_goes_to_own_origin() {
        let url = Url::parse("http://cdn.example:81/lib.js?x=1#frag").unwrap();

        assert_eq!(
            client().destination(&url).unwrap().to_string(),
            "http://cdn.example:81/lib.js?x=1"
        );
    }

    #[test]
    fn test_forwarded_headers_drop_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let out = forwarded_headers(&headers);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_is_plain_html() {
        let mut response = ForwardedResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(!response.is_plain_html());

        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        assert!(response.is_plain_html());

        response
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert!(!response.is_plain_html());
    }
}
