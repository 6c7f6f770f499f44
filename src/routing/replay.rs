//! Replay-mode router
//!
//! Requests are rewritten onto `<origin>/replay/<timestamp>/<urir>`. The
//! timestamp is inherited from the referring page, so every resource of a page
//! resolves against the same capture.

use hyper::header::{HeaderName, HeaderValue};
use tracing::debug;

use super::{ExclusionSet, RouteContext, Router, RoutingDecision};
use crate::namespace::{path_and_query, ReplayUrl};
use crate::request::Request;

/// Header marking a request as rerouted by the interception layer
///
/// The archive backend serves a bootstrap page instead of archived bytes to
/// requests that do not carry it.
pub const REPLAY_MARKER_HEADER: HeaderName = HeaderName::from_static("x-serviceworker");

/// Router that confines page traffic to one capture in the replay namespace
#[derive(Debug)]
pub struct ReplayRouter {
    ctx: RouteContext,
    exclusions: ExclusionSet,
}

impl ReplayRouter {
    /// Create a replay router with the default exclusion set
    pub fn new(ctx: RouteContext) -> Self {
        Self::with_exclusions(ctx, ExclusionSet::defaults())
    }

    /// Create a replay router with a custom exclusion set
    pub fn with_exclusions(ctx: RouteContext, exclusions: ExclusionSet) -> Self {
        Self { ctx, exclusions }
    }

    /// Exclusion rules in evaluation order
    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Compute the replay location a request should be served from
    ///
    /// A request already in the replay namespace keeps its location. Otherwise
    /// the referrer must be a replay page; its timestamp is inherited and the
    /// original URL is the request URL, or for same-origin requests the
    /// request's path and query on the referring page's original site.
    ///
    /// A same-origin path under the namespace root that does not parse yields
    /// `None`; it is never nested inside a second replay prefix.
    pub fn replay_url_for(&self, request: &Request) -> Option<ReplayUrl> {
        let same_origin = request.is_same_origin(&self.ctx.origin);
        if same_origin && self.ctx.replay.contains(request.url.path()) {
            return self.ctx.replay.parse_url(&request.url, &self.ctx.origin);
        }

        let referrer = request.referrer_url()?;
        let context = self.ctx.replay.parse_url(&referrer, &self.ctx.origin)?;

        let urir = if same_origin {
            context.urir.join(&path_and_query(&request.url)).ok()?
        } else {
            let mut urir = request.url.clone();
            urir.set_fragment(None);
            urir
        };

        Some(ReplayUrl::new(context.timestamp, urir))
    }
}

impl Router for ReplayRouter {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn route(&self, request: &Request) -> RoutingDecision {
        if let Some(rule) = self.exclusions.matching(request, &self.ctx) {
            debug!("Excluded by {}: {} {}", rule, request.method, request.url);
            return RoutingDecision::PassThrough;
        }

        let Some(replay) = self.replay_url_for(request) else {
            debug!("No replay context for {}, passing through", request.url);
            return RoutingDecision::PassThrough;
        };

        match self.ctx.replay.to_url(&self.ctx.origin, &replay) {
            Ok(url) => {
                debug!("Replay {} -> {}", request.url, url);
                let mut replacement = request.redirected_to(url);
                replacement
                    .headers
                    .insert(REPLAY_MARKER_HEADER, HeaderValue::from_static("true"));
                RoutingDecision::Redirect(replacement)
            }
            Err(e) => {
                debug!("Cannot build replay URL for {}: {}", request.url, e);
                RoutingDecision::PassThrough
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ExclusionKind;
    use hyper::Method;

    const PAGE: &str = "http://localhost:8080/replay/20230101000000/https://example.com/index.html";

    fn router() -> ReplayRouter {
        ReplayRouter::new(RouteContext::new("http://localhost:8080").unwrap())
    }

    fn redirect_url(decision: &RoutingDecision) -> String {
        decision.redirect_url().expect("expected redirect").to_string()
    }

    #[test]
    fn test_control_namespace_passes_through() {
        for path in ["/__detour__", "/__detour__/", "/__detour__/sw.js"] {
            let request = Request::get(&format!("http://localhost:8080{path}"))
                .unwrap()
                .with_referrer(PAGE);
            assert!(router().route(&request).is_pass_through(), "{path}");
        }
    }

    #[test]
    fn test_control_namespace_passes_through_without_other_rules() {
        let router = ReplayRouter::with_exclusions(
            RouteContext::new("http://localhost:8080").unwrap(),
            ExclusionSet::from_kinds(&[]),
        );
        let request = Request::get("http://localhost:8080/__detour__/sw.js")
            .unwrap()
            .with_referrer(PAGE);

        assert!(router.route(&request).is_pass_through());
    }

    #[test]
    fn test_cross_origin_inherits_referrer_timestamp() {
        let request = Request::get("https://cdn.other.org/lib.js?v=3")
            .unwrap()
            .with_referrer(PAGE);

        assert_eq!(
            redirect_url(&router().route(&request)),
            "http://localhost:8080/replay/20230101000000/https://cdn.other.org/lib.js?v=3"
        );
    }

    #[test]
    fn test_same_origin_resolves_against_original_site() {
        let request = Request::get("http://localhost:8080/css/site.css?x=1")
            .unwrap()
            .with_referrer(PAGE);

        assert_eq!(
            redirect_url(&router().route(&request)),
            "http://localhost:8080/replay/20230101000000/https://example.com/css/site.css?x=1"
        );
    }

    #[test]
    fn test_replay_url_kept_as_is() {
        let url = "http://localhost:8080/replay/19990101000000/https://example.com/old.html";
        let request = Request::get(url).unwrap().with_referrer(PAGE);

        assert_eq!(redirect_url(&router().route(&request)), url);
    }

    #[test]
    fn test_replay_url_original_kept_verbatim() {
        let url = "http://localhost:8080/replay/19990101000000/https://EXAMPLE.com:443/old.html";
        let request = Request::get(url).unwrap().with_referrer(PAGE);

        assert_eq!(redirect_url(&router().route(&request)), url);
    }

    #[test]
    fn test_malformed_replay_path_not_nested() {
        for path in [
            "/replay/2023/example.com/x",
            "/replay/abc/https://example.com/x",
            "/replay/",
        ] {
            let request = Request::get(&format!("http://localhost:8080{path}"))
                .unwrap()
                .with_referrer(PAGE);

            assert!(router().replay_url_for(&request).is_none(), "{path}");
            assert!(router().route(&request).is_pass_through(), "{path}");
        }
    }

    #[test]
    fn test_redirect_carries_marker_header() {
        let request = Request::get("https://cdn.other.org/lib.js")
            .unwrap()
            .with_referrer(PAGE);

        let RoutingDecision::Redirect(replacement) = router().route(&request) else {
            panic!("expected redirect");
        };
        assert_eq!(
            replacement.headers.get(REPLAY_MARKER_HEADER).unwrap(),
            "true"
        );
    }

    #[test]
    fn test_no_context_passes_through() {
        let request = Request::get("https://cdn.other.org/lib.js").unwrap();
        assert!(router().route(&request).is_pass_through());

        // Even with the rule switched off there is no timestamp to inherit
        let router = ReplayRouter::with_exclusions(
            RouteContext::new("http://localhost:8080").unwrap(),
            ExclusionSet::new(),
        );
        assert!(router.route(&request).is_pass_through());
    }

    #[test]
    fn test_non_get_passes_through_by_default() {
        let mut request = Request::get("https://cdn.other.org/api")
            .unwrap()
            .with_referrer(PAGE);
        request.method = Method::POST;

        assert!(router().route(&request).is_pass_through());
    }

    #[test]
    fn test_non_get_rewritten_when_rule_disabled() {
        let router = ReplayRouter::with_exclusions(
            RouteContext::new("http://localhost:8080").unwrap(),
            ExclusionSet::from_kinds(&[ExclusionKind::NoReplayContext]),
        );
        let mut request = Request::get("https://cdn.other.org/api")
            .unwrap()
            .with_referrer(PAGE);
        request.method = Method::POST;
        request.body = bytes::Bytes::from_static(b"q=1");

        let RoutingDecision::Redirect(replacement) = router.route(&request) else {
            panic!("expected redirect");
        };
        assert_eq!(replacement.method, Method::POST);
        assert_eq!(replacement.body, request.body);
    }

    #[test]
    fn test_fragment_dropped_from_urir() {
        let request = Request::get("https://cdn.other.org/doc#section")
            .unwrap()
            .with_referrer(PAGE);

        assert_eq!(
            redirect_url(&router().route(&request)),
            "http://localhost:8080/replay/20230101000000/https://cdn.other.org/doc"
        );
    }
}
