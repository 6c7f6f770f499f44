//! HTTP interception proxy

use std::fmt::Display;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::REFERER;
use hyper::{Response, Uri};
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::namespace::Scope;
use crate::network::{ForwardedResponse, HttpClient, HttpHandler};
use crate::request::{Request, RequestMode};
use crate::rewrite::{HtmlDocument, LinkRewriter};
use crate::routing::{self, RouteContext, Router, RoutingDecision};
use crate::{DetourError, Result};

/// Interception proxy for one origin
///
/// Requests belonging to a page inside the registration scope are routed by
/// the active router; everything else is forwarded unmodified. The response
/// of whichever request is issued is handed back as the response to the
/// original request.
pub struct InterceptProxy {
    config: Arc<Config>,
    ctx: RouteContext,
    scope: Scope,
    router: Arc<dyn Router>,
    rewriter: Option<LinkRewriter>,
    client: HttpClient,
}

impl InterceptProxy {
    /// Create a proxy with the router for the configured mode
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let router = routing::router_for(&config)?;
        Self::with_router(config, router)
    }

    /// Create a proxy with an explicit router
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn with_router(config: Arc<Config>, router: Arc<dyn Router>) -> Result<Self> {
        let ctx = RouteContext::from_config(&config)?;
        let scope = Scope::new(config.scope())?;
        let backend =
            Url::parse(&config.backend).map_err(|e| DetourError::invalid_url(&config.backend, e))?;

        let rewriter = (config.mode.is_replay() && config.rewrite_links)
            .then(|| LinkRewriter::new(ctx.replay.clone()));
        let client = HttpClient::new(ctx.origin.clone(), &backend, config.limits.max_response_size);

        Ok(Self {
            config,
            ctx,
            scope,
            router,
            rewriter,
            client,
        })
    }

    /// Active router
    pub fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    /// Registration scope
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Check whether a request comes from a page the proxy governs
    ///
    /// A navigation belongs to the page it loads; any other request belongs to
    /// its referrer, falling back to its own URL when there is none.
    pub fn in_scope(&self, request: &Request) -> bool {
        let governs =
            |url: &Url| url.origin() == self.ctx.origin && self.scope.contains(url.path());

        if request.mode == RequestMode::Navigate {
            return governs(&request.url);
        }
        match request.referrer_url() {
            Some(referrer) => governs(&referrer) || governs(&request.url),
            None => governs(&request.url),
        }
    }

    /// Routing decision for a request, honouring the registration scope
    pub fn decide(&self, request: &Request) -> RoutingDecision {
        if !self.in_scope(request) {
            debug!("Out of scope, forwarding unmodified: {}", request.url);
            return RoutingDecision::PassThrough;
        }
        self.router.route(request)
    }

    /// Serve one request; failures become error responses for this request only
    pub async fn handle<B>(&self, request: hyper::Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        match self.try_handle(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request failed: {}", e);
                HttpHandler::error_response(&e)
            }
        }
    }

    async fn try_handle<B>(&self, request: hyper::Request<B>) -> Result<Response<Full<Bytes>>>
    where
        B: Body,
        B::Error: Display,
    {
        let limits = &self.config.limits;
        HttpHandler::validate_request(&request, limits.max_request_size, limits.max_headers)?;

        let request = self.intercepted_request(request).await?;
        let decision = self.decide(&request);
        let outgoing = match &decision {
            RoutingDecision::PassThrough => &request,
            RoutingDecision::Redirect(replacement) => replacement,
        };

        let response = self.client.forward(outgoing).await?;
        let response = self.finish_page(&request, response);

        Ok(into_response(response))
    }

    /// Convert an incoming HTTP request into an intercepted request
    ///
    /// # Errors
    ///
    /// Returns error if the target is not a valid URL or the body is too large
    pub async fn intercepted_request<B>(&self, request: hyper::Request<B>) -> Result<Request>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();
        let url = self.absolute_url(&parts.uri)?;
        let body = HttpHandler::read_body(body, self.config.limits.max_request_size).await?;

        let referrer = parts
            .headers
            .get(REFERER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let mode = parts
            .headers
            .get("sec-fetch-mode")
            .and_then(|v| v.to_str().ok())
            .and_then(RequestMode::from_fetch_mode)
            .unwrap_or_default();

        let mut intercepted = Request::new(parts.method, url);
        intercepted.headers = parts.headers;
        intercepted.body = body;
        intercepted.mode = mode;
        intercepted.referrer = referrer;
        Ok(intercepted)
    }

    /// Absolute URL of a request target
    ///
    /// Origin-form targets are on the interception origin; absolute-form
    /// targets (forward proxy use) name their own origin.
    fn absolute_url(&self, uri: &Uri) -> Result<Url> {
        let raw = if uri.scheme().is_some() && uri.authority().is_some() {
            uri.to_string()
        } else {
            let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
            format!("{}{}", self.ctx.origin.ascii_serialization(), path)
        };

        Url::parse(&raw).map_err(|e| DetourError::invalid_url(&raw, e))
    }

    /// Run the link rewriter over a replayed HTML page
    fn finish_page(&self, request: &Request, mut response: ForwardedResponse) -> ForwardedResponse {
        let Some(rewriter) = &self.rewriter else {
            return response;
        };
        if !response.is_plain_html() {
            return response;
        }
        let Ok(html) = std::str::from_utf8(&response.body) else {
            debug!("HTML body of {} is not UTF-8, links left alone", request.url);
            return response;
        };

        let mut document = HtmlDocument::parse(html);
        if rewriter.rewrite_page(&request.url, &mut document) > 0 {
            response.body = Bytes::from(document.into_html());
        }
        response
    }
}

fn into_response(forwarded: ForwardedResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(forwarded.body));
    *response.status_mut() = forwarded.status;
    *response.headers_mut() = forwarded.headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
    use hyper::StatusCode;

    const PAGE: &str = "http://localhost:8080/replay/20230101000000/https://example.com/index.html";

    fn proxy(mode: Mode) -> InterceptProxy {
        let config = Config::new(mode, "http://localhost:8080", "http://127.0.0.1:9");
        InterceptProxy::new(Arc::new(config)).unwrap()
    }

    fn html_response(body: &str) -> ForwardedResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        ForwardedResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_intercepted_request_origin_form() {
        let incoming = hyper::Request::builder()
            .uri("/style.css?v=2")
            .header(REFERER, PAGE)
            .header("sec-fetch-mode", "no-cors")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let request = proxy(Mode::Replay).intercepted_request(incoming).await.unwrap();
        assert_eq!(request.url.as_str(), "http://localhost:8080/style.css?v=2");
        assert_eq!(request.referrer.as_deref(), Some(PAGE));
        assert_eq!(request.mode, RequestMode::NoCors);
    }

    #[tokio::test]
    async fn test_intercepted_request_absolute_form() {
        let incoming = hyper::Request::builder()
            .uri("http://cdn.other.org/lib.js")
            .header("sec-fetch-mode", "navigate")
            .body(Full::new(Bytes::from_static(b"body")))
            .unwrap();

        let request = proxy(Mode::Replay).intercepted_request(incoming).await.unwrap();
        assert_eq!(request.url.as_str(), "http://cdn.other.org/lib.js");
        assert_eq!(request.mode, RequestMode::Navigate);
        assert_eq!(request.body, Bytes::from_static(b"body"));
    }

    #[test]
    fn test_scope_gating() {
        let proxy = proxy(Mode::Replay);

        let subresource = Request::get("https://cdn.other.org/lib.js")
            .unwrap()
            .with_referrer(PAGE);
        assert!(proxy.in_scope(&subresource));

        let navigation = Request::get(PAGE).unwrap().with_mode(RequestMode::Navigate);
        assert!(proxy.in_scope(&navigation));

        let outside = Request::get("http://localhost:8080/")
            .unwrap()
            .with_mode(RequestMode::Navigate);
        assert!(!proxy.in_scope(&outside));
        assert!(proxy.decide(&outside).is_pass_through());

        // Leaving the scope by navigation is not intercepted
        let leaving = Request::get("https://other.org/x")
            .unwrap()
            .with_referrer(PAGE)
            .with_mode(RequestMode::Navigate);
        assert!(!proxy.in_scope(&leaving));
    }

    #[test]
    fn test_decide_replay() {
        let request = Request::get("https://cdn.other.org/lib.js")
            .unwrap()
            .with_referrer(PAGE);

        assert_eq!(
            proxy(Mode::Replay).decide(&request).redirect_url().unwrap().as_str(),
            "http://localhost:8080/replay/20230101000000/https://cdn.other.org/lib.js"
        );
    }

    #[test]
    fn test_decide_record() {
        let request = Request::get("http://localhost:8080/app.js")
            .unwrap()
            .with_referrer("http://localhost:8080/__detour__/record/https://live.example/");

        assert_eq!(
            proxy(Mode::Record).decide(&request).redirect_url().unwrap().as_str(),
            "http://localhost:8080/__detour__/record/https://live.example/app.js"
        );
    }

    #[test]
    fn test_finish_page_rewrites_replay_html() {
        let proxy = proxy(Mode::Replay);
        let request = Request::get(PAGE).unwrap();

        let response = proxy.finish_page(&request, html_response(r#"<a href="/about">x</a>"#));
        assert_eq!(
            response.body,
            Bytes::from(r#"<a href="/replay/20230101000000/https://example.com/about">x</a>"#)
        );
    }

    #[test]
    fn test_finish_page_leaves_record_mode_alone() {
        let proxy = proxy(Mode::Record);
        let request = Request::get(PAGE).unwrap();
        let body = r#"<a href="/about">x</a>"#;

        let response = proxy.finish_page(&request, html_response(body));
        assert_eq!(response.body, Bytes::from(body));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let incoming = hyper::Request::builder()
            .uri("/__detour__/sw.js")
            .body(Full::new(Bytes::new()))
            .unwrap();

        // Port 9 on localhost refuses connections
        let response = proxy(Mode::Replay).handle(incoming).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
