//! Record-mode router
//!
//! Every request leaving a recorded page is sent to the backend's record
//! endpoint with the live URL it was meant for appended. Relative requests
//! (which the browser resolved against the interception origin) are resolved
//! again against the live page named by the referrer.

use tracing::{debug, warn};
use url::Url;

use super::{RouteContext, Router, RoutingDecision};
use crate::namespace::path_and_query;
use crate::request::Request;

/// Router that funnels page traffic through the record endpoint
#[derive(Debug, Clone)]
pub struct RecorderRouter {
    ctx: RouteContext,
}

impl RecorderRouter {
    /// Create a recorder router
    pub fn new(ctx: RouteContext) -> Self {
        Self { ctx }
    }

    /// Reconstruct the live URL of a same-origin request from its referrer
    ///
    /// Everything up to and including the record marker is stripped from the
    /// referrer and the request's path and query are resolved against the
    /// remainder. A referrer without the marker is used as the base verbatim.
    /// Returns `None` if there is no referrer or the base is not an absolute URL.
    pub fn reconstruct_target(&self, request: &Request) -> Option<Url> {
        let referrer = request.referrer.as_deref()?;

        let base = if let Some(live) = self.ctx.control.strip_record_marker(referrer) {
            live
        } else {
            warn!(
                referrer,
                url = %request.url,
                "Referrer lacks record marker, resolving against it verbatim"
            );
            referrer
        };

        let base = Url::parse(base).ok()?;
        base.join(&path_and_query(&request.url)).ok()
    }
}

impl Router for RecorderRouter {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn route(&self, request: &Request) -> RoutingDecision {
        let same_origin = request.is_same_origin(&self.ctx.origin);
        let path = request.url.path();

        if same_origin && (path == "/" || self.ctx.control.contains(path)) {
            debug!("Pass-through {} {}", request.method, request.url);
            return RoutingDecision::PassThrough;
        }

        let target = if same_origin {
            let Some(target) = self.reconstruct_target(request) else {
                warn!(
                    "Cannot reconstruct live URL for {} (referrer: {:?}), passing through",
                    request.url, request.referrer
                );
                return RoutingDecision::PassThrough;
            };
            target
        } else {
            request.url.clone()
        };

        match self.ctx.control.record_url(&self.ctx.origin, target.as_str()) {
            Ok(url) => {
                debug!("Record {} {} -> {}", request.method, request.url, url);
                RoutingDecision::Redirect(request.redirected_to(url))
            }
            Err(e) => {
                warn!("Cannot build record URL for {}: {}", target, e);
                RoutingDecision::PassThrough
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::Method;

    fn router() -> RecorderRouter {
        RecorderRouter::new(RouteContext::new("https://example.com").unwrap())
    }

    fn redirect_url(decision: &RoutingDecision) -> String {
        decision.redirect_url().expect("expected redirect").to_string()
    }

    #[test]
    fn test_root_passes_through() {
        let request = Request::get("https://example.com/").unwrap();
        assert!(router().route(&request).is_pass_through());
    }

    #[test]
    fn test_control_namespace_passes_through() {
        for path in ["/__detour__", "/__detour__/", "/__detour__/recorder-sw.js"] {
            let request = Request::get(&format!("https://example.com{path}")).unwrap();
            assert!(router().route(&request).is_pass_through(), "{path}");
        }
    }

    #[test]
    fn test_reconstructs_relative_request() {
        let request = Request::get("https://example.com/style.css?v=2")
            .unwrap()
            .with_referrer("https://example.com/__detour__/record/https://live.example/page");

        let decision = router().route(&request);
        assert_eq!(
            redirect_url(&decision),
            "https://example.com/__detour__/record/https://live.example/style.css?v=2"
        );
        assert_eq!(
            router().reconstruct_target(&request).unwrap().as_str(),
            "https://live.example/style.css?v=2"
        );
    }

    #[test]
    fn test_relative_path_resolves_against_live_page() {
        let request = Request::get("https://example.com/img/logo.png")
            .unwrap()
            .with_referrer("https://example.com/__detour__/record/https://live.example/blog/post");

        assert_eq!(
            router().reconstruct_target(&request).unwrap().as_str(),
            "https://live.example/img/logo.png"
        );
    }

    #[test]
    fn test_cross_origin_uses_request_url() {
        let request = Request::get("https://cdn.other.org/lib.js?x=1")
            .unwrap()
            .with_referrer("https://example.com/__detour__/record/https://live.example/page");

        let decision = router().route(&request);
        assert_eq!(
            redirect_url(&decision),
            "https://example.com/__detour__/record/https://cdn.other.org/lib.js?x=1"
        );
    }

    #[test]
    fn test_referrer_without_marker_is_used_verbatim() {
        let request = Request::get("https://example.com/a.js")
            .unwrap()
            .with_referrer("https://live.example/dir/page");

        assert_eq!(
            redirect_url(&router().route(&request)),
            "https://example.com/__detour__/record/https://live.example/a.js"
        );
    }

    #[test]
    fn test_missing_referrer_passes_through() {
        let request = Request::get("https://example.com/a.js").unwrap();
        assert!(router().route(&request).is_pass_through());

        let request = Request::get("https://example.com/a.js")
            .unwrap()
            .with_referrer("");
        assert!(router().route(&request).is_pass_through());
    }

    #[test]
    fn test_redirect_copies_request_verbatim() {
        let mut request = Request::get("https://cdn.other.org/api")
            .unwrap()
            .with_referrer("https://example.com/__detour__/record/https://live.example/")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.method = Method::POST;
        request.body = Bytes::from_static(b"{\"a\":1}");

        let RoutingDecision::Redirect(replacement) = router().route(&request) else {
            panic!("expected redirect");
        };

        assert_eq!(replacement.method, Method::POST);
        assert_eq!(replacement.body, request.body);
        assert_eq!(replacement.headers, request.headers);
        assert_eq!(replacement.referrer, request.referrer);
        assert_eq!(replacement.credentials, request.credentials);
        assert_eq!(replacement.redirect, request.redirect);
    }
}
