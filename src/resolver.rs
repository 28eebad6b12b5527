//! Builds the process-wide dialer from proxy settings.
//!
//! Resolution never fails. Whatever goes wrong (an unparsable URL, an
//! unknown scheme, a bad timeout) degrades to a direct connection or a
//! default value, and is reported as an [`EnvWarning`] on the result and
//! through `tracing`.
//!
//! The chain that comes out looks like one of:
//!
//! 1. [`Direct`] when no proxy is configured or it cannot be built
//! 2. the proxy dialer, reaching the proxy directly
//! 3. a [`BypassRouter`] sending `NO_PROXY` matches to [`Direct`] and
//!    everything else to the proxy dialer

use crate::bypass::BypassRouter;
use crate::config::{ProxySettings, DEFAULT_TIMEOUT_MS};
use crate::dialer::{BoxDialer, Direct};
use crate::registry::SchemeRegistry;
use std::fmt;
use tracing::{debug, warn};

/// Which chain the resolver produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// No proxy; every dial connects directly.
    Direct,
    /// Every dial goes through the proxy.
    Proxy,
    /// Bypass-list matches connect directly, the rest use the proxy.
    ProxyWithBypass,
}

/// A setting the resolver could not honor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvWarning {
    /// The proxy URL did not parse; falling back to direct.
    InvalidProxyUrl { url: String, reason: String },
    /// No dialer could be built for the proxy URL; falling back to direct.
    ProxyUnavailable { url: String, reason: String },
    /// The timeout was not a non-negative integer; using the default.
    InvalidTimeout { value: String },
}

impl fmt::Display for EnvWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvWarning::InvalidProxyUrl { url, reason } => {
                write!(f, "ignoring invalid proxy url {:?}: {}", url, reason)
            }
            EnvWarning::ProxyUnavailable { url, reason } => {
                write!(f, "cannot use proxy {:?}: {}", url, reason)
            }
            EnvWarning::InvalidTimeout { value } => write!(
                f,
                "ignoring invalid timeout {:?}, using {}ms",
                value, DEFAULT_TIMEOUT_MS
            ),
        }
    }
}

/// The outcome of resolving proxy settings.
#[derive(Debug)]
pub struct EnvResolution {
    /// The outermost dialer of the chain.
    pub dialer: BoxDialer,
    /// Which chain `dialer` is.
    pub route: Route,
    /// Settings that were ignored along the way.
    pub warnings: Vec<EnvWarning>,
}

impl EnvResolution {
    fn direct(warnings: Vec<EnvWarning>) -> Self {
        Self {
            dialer: Box::new(Direct),
            route: Route::Direct,
            warnings,
        }
    }
}

/// Returns the dialer configured by `ALL_PROXY`, `NO_PROXY` and `TIMEOUT`.
pub fn from_environment() -> BoxDialer {
    resolve_environment().dialer
}

/// Resolves the environment against the built-in schemes.
pub fn resolve_environment() -> EnvResolution {
    resolve_environment_with(&SchemeRegistry::new())
}

/// Resolves the environment against `registry`.
pub fn resolve_environment_with(registry: &SchemeRegistry) -> EnvResolution {
    resolve_settings(&ProxySettings::from_env(), registry)
}

/// Resolves explicit settings. Does not read the environment.
pub fn resolve_settings(settings: &ProxySettings, registry: &SchemeRegistry) -> EnvResolution {
    resolve_with_direct(settings, registry, &|| Box::new(Direct) as BoxDialer)
}

/// Like [`resolve_settings`], with `direct` standing in for [`Direct`].
pub(crate) fn resolve_with_direct(
    settings: &ProxySettings,
    registry: &SchemeRegistry,
    direct: &dyn Fn() -> BoxDialer,
) -> EnvResolution {
    let mut warnings = Vec::new();

    let url = match settings.proxy_url() {
        Ok(Some(url)) => url,
        Ok(None) => {
            debug!("No proxy configured, dialing directly");
            return EnvResolution::direct(warnings);
        }
        Err(e) => {
            warnings.push(report(EnvWarning::InvalidProxyUrl {
                url: settings.all_proxy.clone(),
                reason: e.to_string(),
            }));
            return EnvResolution::direct(warnings);
        }
    };

    let timeout = settings.timeout();
    if settings.parse_timeout().is_err() {
        warnings.push(report(EnvWarning::InvalidTimeout {
            value: settings.timeout.clone(),
        }));
    }

    let proxy = match registry.resolve(&url, direct(), timeout) {
        Ok(proxy) => proxy,
        Err(e) => {
            warnings.push(report(EnvWarning::ProxyUnavailable {
                url: settings.all_proxy.clone(),
                reason: e.to_string(),
            }));
            return EnvResolution::direct(warnings);
        }
    };

    if settings.no_proxy.is_empty() {
        debug!(
            scheme = %url.scheme(),
            timeout_ms = timeout.as_millis() as u64,
            "Dialing through proxy"
        );
        return EnvResolution {
            dialer: proxy,
            route: Route::Proxy,
            warnings,
        };
    }

    let mut router = BypassRouter::new(proxy, direct());
    router.add_from_string(&settings.no_proxy);
    debug!(
        scheme = %url.scheme(),
        timeout_ms = timeout.as_millis() as u64,
        no_proxy = %settings.no_proxy,
        "Dialing through proxy with bypass list"
    );
    EnvResolution {
        dialer: Box::new(router),
        route: Route::ProxyWithBypass,
        warnings,
    }
}

fn report(warning: EnvWarning) -> EnvWarning {
    warn!("{}", warning);
    warning
}
