//! Installation of the interception layer
//!
//! The registrar binds an interception layer to a scope and, the first time a
//! page becomes controlled, reloads it once so that the requests the page made
//! before interception existed are issued again under interception.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::namespace::Scope;
use crate::{DetourError, Result};

/// Platform operations needed to install an interception layer
#[async_trait]
pub trait InterceptionHost: Send + Sync {
    /// Whether an interception layer already controls the page
    fn is_controlled(&self) -> bool;

    /// Install the interception layer at `script_url` for `scope`
    async fn register(&self, script_url: &str, scope: &Scope) -> Result<()>;

    /// Ask the platform to look for an updated interception layer
    async fn check_for_update(&self) -> Result<()>;

    /// Reload the current page
    fn reload(&self);
}

/// Outcome of one activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    /// Whether this activation reloaded the page
    pub reloaded: bool,
}

/// Installs the interception layer for one page
pub struct Registrar<H> {
    host: H,
    script_url: String,
    reloaded: AtomicBool,
}

impl<H: InterceptionHost> Registrar<H> {
    /// Create a registrar installing the layer served at `script_url`
    pub fn new(host: H, script_url: impl Into<String>) -> Self {
        Self {
            host,
            script_url: script_url.into(),
            reloaded: AtomicBool::new(false),
        }
    }

    /// Platform handle
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Install the interception layer for `scope`
    ///
    /// The controller check happens before registration. After a successful
    /// registration a best-effort update check is issued, and the page is
    /// reloaded if it was not controlled beforehand. At most one reload is
    /// issued over the registrar's lifetime.
    ///
    /// # Errors
    ///
    /// Returns error if `scope` is not an absolute path or registration fails;
    /// no reload happens in that case
    pub async fn activate(&self, scope: &str) -> Result<Activation> {
        let scope = Scope::new(scope)?;
        let needs_reload = !self.host.is_controlled();

        self.host
            .register(&self.script_url, &scope)
            .await
            .map_err(|e| DetourError::Registration(e.to_string()))?;
        info!("Interception layer registered for scope {}", scope.as_str());

        if let Err(e) = self.host.check_for_update().await {
            warn!("Update check failed: {}", e);
        }

        let reloaded = needs_reload && !self.reloaded.swap(true, Ordering::SeqCst);
        if reloaded {
            debug!("Page was not controlled, reloading");
            self.host.reload();
        }

        Ok(Activation { reloaded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHost {
        controlled: AtomicBool,
        fail_register: bool,
        fail_update: bool,
        registrations: Mutex<Vec<(String, String)>>,
        update_checks: AtomicUsize,
        reloads: AtomicUsize,
    }

    #[async_trait]
    impl InterceptionHost for FakeHost {
        fn is_controlled(&self) -> bool {
            self.controlled.load(Ordering::SeqCst)
        }

        async fn register(&self, script_url: &str, scope: &Scope) -> Result<()> {
            if self.fail_register {
                return Err(DetourError::Other("denied".to_string()));
            }
            self.registrations
                .lock()
                .unwrap()
                .push((script_url.to_string(), scope.as_str().to_string()));
            Ok(())
        }

        async fn check_for_update(&self) -> Result<()> {
            self.update_checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_update {
                return Err(DetourError::Other("offline".to_string()));
            }
            Ok(())
        }

        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            self.controlled.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_first_activation_reloads_once() {
        let registrar = Registrar::new(FakeHost::default(), "/__detour__/sw.js");

        let activation = registrar.activate("/replay/").await.unwrap();
        assert!(activation.reloaded);
        assert_eq!(registrar.host().reloads.load(Ordering::SeqCst), 1);
        assert_eq!(
            registrar.host().registrations.lock().unwrap()[0],
            ("/__detour__/sw.js".to_string(), "/replay/".to_string())
        );
    }

    #[tokio::test]
    async fn test_controlled_page_does_not_reload() {
        let host = FakeHost::default();
        host.controlled.store(true, Ordering::SeqCst);
        let registrar = Registrar::new(host, "/__detour__/sw.js");

        let activation = registrar.activate("/replay/").await.unwrap();
        assert!(!activation.reloaded);
        assert_eq!(registrar.host().reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeated_activation_reloads_at_most_once() {
        let registrar = Registrar::new(FakeHost::default(), "/__detour__/sw.js");

        registrar.activate("/replay/").await.unwrap();
        // Simulate a host that never reports control
        registrar.host().controlled.store(false, Ordering::SeqCst);
        let second = registrar.activate("/replay/").await.unwrap();

        assert!(!second.reloaded);
        assert_eq!(registrar.host().reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_check_every_activation() {
        let host = FakeHost {
            fail_update: true,
            ..FakeHost::default()
        };
        let registrar = Registrar::new(host, "/__detour__/sw.js");

        // A failing update check does not fail activation
        assert!(registrar.activate("/replay/").await.is_ok());
        assert!(registrar.activate("/replay/").await.is_ok());
        assert_eq!(registrar.host().update_checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_registration_failure_does_not_reload() {
        let host = FakeHost {
            fail_register: true,
            ..FakeHost::default()
        };
        let registrar = Registrar::new(host, "/__detour__/sw.js");

        let result = registrar.activate("/replay/").await;
        assert!(matches!(result, Err(DetourError::Registration(_))));
        assert_eq!(registrar.host().reloads.load(Ordering::SeqCst), 0);
        assert_eq!(registrar.host().update_checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_relative_scope_rejected() {
        let registrar = Registrar::new(FakeHost::default(), "/__detour__/sw.js");
        assert!(registrar.activate("replay/").await.is_err());
        assert!(registrar.host().registrations.lock().unwrap().is_empty());
    }
}
