//! Configuration types for Detour

use serde::{Deserialize, Serialize};
use url::Url;

use crate::namespace::{
    ControlNamespace, ReplayNamespace, Scope, DEFAULT_CONTROL_PREFIX, DEFAULT_REPLAY_PREFIX,
};
use crate::routing::ExclusionKind;
use crate::{DetourError, Result};

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Record mode: funnel live traffic through the record endpoint
    Record,
    /// Replay mode: serve traffic from the replay namespace
    Replay,
}

impl Mode {
    /// Check if mode is Record
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Mode::Record)
    }

    /// Check if mode is Replay
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }

    /// Registration scope used when none is configured
    #[must_use]
    pub fn default_scope(&self) -> &'static str {
        match self {
            Mode::Record => "/",
            Mode::Replay => DEFAULT_REPLAY_PREFIX,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Operating mode
    pub mode: Mode,
    /// Origin the interception layer is served from
    pub origin: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Archive backend that serves the record and replay endpoints
    pub backend: String,
    /// Rewrite links of replayed HTML pages
    #[serde(default = "default_true")]
    pub rewrite_links: bool,
    /// Namespace layout
    #[serde(default)]
    pub namespace: NamespaceConfig,
    /// Replay exclusion rules
    #[serde(default)]
    pub exclusions: ExclusionConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

fn default_true() -> bool {
    true
}

/// Namespace layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Control namespace root
    #[serde(default = "default_control_prefix")]
    pub control_prefix: String,
    /// Replay namespace root
    #[serde(default = "default_replay_prefix")]
    pub replay_prefix: String,
    /// Registration scope; defaults depend on the mode
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_control_prefix() -> String {
    DEFAULT_CONTROL_PREFIX.to_string()
}

fn default_replay_prefix() -> String {
    DEFAULT_REPLAY_PREFIX.to_string()
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            control_prefix: default_control_prefix(),
            replay_prefix: default_replay_prefix(),
            scope: None,
        }
    }
}

/// Replay exclusion rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// Built-in rules; the control namespace rule is always active
    #[serde(default = "default_rules")]
    pub rules: Vec<ExclusionKind>,
    /// Additional same-origin path prefixes that pass through
    #[serde(default)]
    pub extra_path_prefixes: Vec<String>,
}

fn default_rules() -> Vec<ExclusionKind> {
    vec![
        ExclusionKind::ControlNamespace,
        ExclusionKind::NonGet,
        ExclusionKind::NoReplayContext,
    ]
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            extra_path_prefixes: Vec::new(),
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Maximum request size in bytes
    pub max_request_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
    /// Maximum headers per request
    pub max_headers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 4096,
            max_request_size: 16 * 1024 * 1024,   // 16 MB
            max_response_size: 256 * 1024 * 1024, // 256 MB
            max_headers: 128,
        }
    }
}

impl Config {
    /// Create a configuration with defaults for everything but the essentials
    pub fn new(mode: Mode, origin: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            mode,
            origin: origin.into(),
            listen_port: 8080,
            backend: backend.into(),
            rewrite_links: true,
            namespace: NamespaceConfig::default(),
            exclusions: ExclusionConfig::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DetourError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| DetourError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Effective registration scope
    pub fn scope(&self) -> &str {
        self.namespace
            .scope
            .as_deref()
            .unwrap_or_else(|| self.mode.default_scope())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        validate_http_url("origin", &self.origin)?;
        validate_http_url("backend", &self.backend)?;

        if self.listen_port == 0 {
            return Err(DetourError::Config("listen_port cannot be 0".to_string()));
        }

        let control = ControlNamespace::new(&self.namespace.control_prefix)?;
        let replay = ReplayNamespace::new(&self.namespace.replay_prefix)?;
        if control.prefix() == replay.prefix() {
            return Err(DetourError::Config(
                "control_prefix and replay_prefix must differ".to_string(),
            ));
        }
        Scope::new(self.scope())?;

        for prefix in &self.exclusions.extra_path_prefixes {
            if !prefix.starts_with('/') {
                return Err(DetourError::Config(format!(
                    "extra_path_prefixes entry must be an absolute path, got '{prefix}'"
                )));
            }
        }

        let limits = &self.limits;
        for (name, value) in [
            ("max_connections", limits.max_connections),
            ("max_request_size", limits.max_request_size),
            ("max_response_size", limits.max_response_size),
            ("max_headers", limits.max_headers),
        ] {
            if value == 0 {
                return Err(DetourError::Config(format!("{name} must be > 0")));
            }
        }

        Ok(())
    }
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| DetourError::Config(format!("{name} is not a valid URL '{value}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(DetourError::Config(format!(
            "{name} must be an absolute http(s) URL, got '{value}'"
        )));
    }
    Ok(())
}
