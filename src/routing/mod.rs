//! Per-request routing decisions
//!
//! A router is a pure function from an intercepted [`Request`] to a
//! [`RoutingDecision`]. It never performs I/O; the proxy adapter issues the
//! replacement request and hands its response back to the page.

mod exclusion;
mod recorder;
mod replay;

pub use exclusion::{ExclusionKind, ExclusionRule, ExclusionSet, PathPrefixRule};
pub use recorder::RecorderRouter;
pub use replay::{ReplayRouter, REPLAY_MARKER_HEADER};

use std::sync::Arc;

use url::{Origin, Url};

use crate::config::{Config, Mode};
use crate::namespace::{ControlNamespace, ReplayNamespace};
use crate::request::Request;
use crate::{DetourError, Result};

/// Outcome of routing one request
#[derive(Debug, Clone)]
pub enum RoutingDecision {
    /// Forward the original request unmodified
    PassThrough,
    /// Issue this replacement request and answer the original with its response
    Redirect(Request),
}

impl RoutingDecision {
    /// Check if the decision is a pass-through
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }

    /// Target URL of a redirect
    pub fn redirect_url(&self) -> Option<&Url> {
        match self {
            Self::PassThrough => None,
            Self::Redirect(request) => Some(&request.url),
        }
    }
}

/// Interception routing policy
///
/// Implementations hold only immutable configuration, so one instance can
/// route any number of concurrent requests.
pub trait Router: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Decide how to route a request
    fn route(&self, request: &Request) -> RoutingDecision;
}

/// Namespace configuration shared by both routers
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// Origin of the interception layer
    pub origin: Origin,
    /// Reserved bookkeeping paths
    pub control: ControlNamespace,
    /// Replay path convention
    pub replay: ReplayNamespace,
}

impl RouteContext {
    /// Create a context with default namespaces for `origin`
    ///
    /// # Errors
    ///
    /// Returns error if `origin` is not an absolute URL
    pub fn new(origin: &str) -> Result<Self> {
        Ok(Self {
            origin: parse_origin(origin)?,
            control: ControlNamespace::default(),
            replay: ReplayNamespace::default(),
        })
    }

    /// Build the context from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the origin or a namespace prefix is invalid
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            origin: parse_origin(&config.origin)?,
            control: ControlNamespace::new(&config.namespace.control_prefix)?,
            replay: ReplayNamespace::new(&config.namespace.replay_prefix)?,
        })
    }
}

/// Build the router for the configured mode
///
/// # Errors
///
/// Returns error if the namespace configuration is invalid
pub fn router_for(config: &Config) -> Result<Arc<dyn Router>> {
    let ctx = RouteContext::from_config(config)?;
    Ok(match config.mode {
        Mode::Record => Arc::new(RecorderRouter::new(ctx)),
        Mode::Replay => Arc::new(ReplayRouter::with_exclusions(
            ctx,
            ExclusionSet::from_config(&config.exclusions),
        )),
    })
}

fn parse_origin(origin: &str) -> Result<Origin> {
    let url = Url::parse(origin).map_err(|e| DetourError::invalid_url(origin, e))?;
    match url.origin() {
        origin @ Origin::Tuple(..) => Ok(origin),
        Origin::Opaque(_) => Err(DetourError::Config(format!(
            "origin must be an http(s) URL, got '{url}'"
        ))),
    }
}
