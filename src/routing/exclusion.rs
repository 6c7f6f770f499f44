//! Pass-through rules for the replay router

use hyper::Method;
use serde::{Deserialize, Serialize};

use super::RouteContext;
use crate::config::ExclusionConfig;
use crate::request::Request;

/// Predicate deciding that a request must not be rewritten
pub trait ExclusionRule: Send + Sync {
    /// Rule name for logs
    fn name(&self) -> &str;

    /// Return true if `request` passes through untouched
    fn excludes(&self, request: &Request, ctx: &RouteContext) -> bool;
}

/// Built-in rules selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionKind {
    /// Same-origin requests under the control namespace
    ControlNamespace,
    /// Anything but GET
    NonGet,
    /// Neither the request nor its referrer lies in the replay namespace
    NoReplayContext,
}

impl ExclusionKind {
    fn into_rule(self) -> Box<dyn ExclusionRule> {
        match self {
            Self::ControlNamespace => Box::new(ControlNamespaceRule),
            Self::NonGet => Box::new(NonGetRule),
            Self::NoReplayContext => Box::new(NoReplayContextRule),
        }
    }
}

struct ControlNamespaceRule;

impl ExclusionRule for ControlNamespaceRule {
    fn name(&self) -> &str {
        "control-namespace"
    }

    fn excludes(&self, request: &Request, ctx: &RouteContext) -> bool {
        request.is_same_origin(&ctx.origin) && ctx.control.contains(request.url.path())
    }
}

struct NonGetRule;

impl ExclusionRule for NonGetRule {
    fn name(&self) -> &str {
        "non-get"
    }

    fn excludes(&self, request: &Request, _ctx: &RouteContext) -> bool {
        request.method != Method::GET
    }
}

struct NoReplayContextRule;

impl ExclusionRule for NoReplayContextRule {
    fn name(&self) -> &str {
        "no-replay-context"
    }

    fn excludes(&self, request: &Request, ctx: &RouteContext) -> bool {
        let in_namespace = |url: &url::Url| ctx.replay.parse_url(url, &ctx.origin).is_some();

        !in_namespace(&request.url) && !request.referrer_url().as_ref().is_some_and(in_namespace)
    }
}

/// Same-origin requests below an arbitrary path prefix
pub struct PathPrefixRule {
    name: String,
    prefix: String,
}

impl PathPrefixRule {
    /// Create a rule for `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            name: format!("path-prefix:{prefix}"),
            prefix,
        }
    }
}

impl ExclusionRule for PathPrefixRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn excludes(&self, request: &Request, ctx: &RouteContext) -> bool {
        request.is_same_origin(&ctx.origin) && request.url.path().starts_with(&self.prefix)
    }
}

/// Ordered set of exclusion rules, fixed once the router is built
///
/// The control namespace rule is always present: without it the interception
/// layer could not fetch its own bookkeeping resources.
pub struct ExclusionSet {
    rules: Vec<Box<dyn ExclusionRule>>,
}

impl ExclusionSet {
    /// Create a set holding only the control namespace rule
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: vec![ExclusionKind::ControlNamespace.into_rule()],
        }
    }

    /// Create the default set: control namespace, non-GET, no replay context
    #[must_use]
    pub fn defaults() -> Self {
        Self::from_kinds(&[ExclusionKind::NonGet, ExclusionKind::NoReplayContext])
    }

    /// Create a set from built-in rule kinds
    #[must_use]
    pub fn from_kinds(kinds: &[ExclusionKind]) -> Self {
        kinds
            .iter()
            .fold(Self::new(), |set, kind| set.with_kind(*kind))
    }

    /// Create the set described by configuration
    #[must_use]
    pub fn from_config(config: &ExclusionConfig) -> Self {
        config
            .extra_path_prefixes
            .iter()
            .fold(Self::from_kinds(&config.rules), |set, prefix| {
                set.with_rule(Box::new(PathPrefixRule::new(prefix.clone())))
            })
    }

    /// Add a built-in rule, ignoring duplicates
    #[must_use]
    pub fn with_kind(self, kind: ExclusionKind) -> Self {
        let rule = kind.into_rule();
        if self.names().any(|name| name == rule.name()) {
            return self;
        }
        self.with_rule(rule)
    }

    /// Add a custom rule
    #[must_use]
    pub fn with_rule(mut self, rule: Box<dyn ExclusionRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Name of the first rule excluding `request`, if any
    pub fn matching(&self, request: &Request, ctx: &RouteContext) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.excludes(request, ctx))
            .map(|rule| rule.name())
    }

    /// Rule names in evaluation order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.name())
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check whether the set has no rules
    ///
    /// Never true in practice: every constructor installs the control
    /// namespace rule and rules cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl std::fmt::Debug for ExclusionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
