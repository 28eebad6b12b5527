//! Lazily resolved environment values.
//!
//! Each [`EnvOnce`] looks up its candidate variable names the first time
//! it is read and keeps that answer for the rest of the process. Later
//! changes to the environment are not observed.

use std::sync::OnceLock;
use tracing::trace;

/// Proxy URL used for every destination.
pub static ALL_PROXY_ENV: EnvOnce = EnvOnce::new(&["ALL_PROXY", "all_proxy"]);

/// Comma-separated list of destinations that skip the proxy.
pub static NO_PROXY_ENV: EnvOnce = EnvOnce::new(&["NO_PROXY", "no_proxy"]);

/// Proxy handshake timeout in milliseconds.
pub static TIMEOUT_ENV: EnvOnce = EnvOnce::new(&["TIMEOUT", "timeout"]);

/// An environment value resolved at most once.
///
/// The first non-empty variable among `names`, in order, wins. If none is
/// set the resolved value is the empty string, which is remembered like
/// any other value.
#[derive(Debug)]
pub struct EnvOnce {
    names: &'static [&'static str],
    lookup: fn(&str) -> Option<String>,
    value: OnceLock<String>,
}

impl EnvOnce {
    /// Creates an unresolved entry reading the process environment.
    pub const fn new(names: &'static [&'static str]) -> Self {
        Self::with_lookup(names, process_env)
    }

    /// Creates an unresolved entry that reads values through `lookup`.
    pub const fn with_lookup(
        names: &'static [&'static str],
        lookup: fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            names,
            lookup,
            value: OnceLock::new(),
        }
    }

    /// Returns the value, resolving it on first use.
    ///
    /// Concurrent first callers block until one of them has resolved the
    /// value; all of them see the same result.
    pub fn get(&self) -> &str {
        self.value.get_or_init(|| {
            for name in self.names {
                if let Some(value) = (self.lookup)(name) {
                    if !value.is_empty() {
                        trace!(name = %name, "Resolved environment value");
                        return value;
                    }
                }
            }
            trace!(names = ?self.names, "Environment value not set");
            String::new()
        })
    }

    /// Returns true once [`EnvOnce::get`] has run.
    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }

    /// Forgets the resolved value so the next read looks it up again.
    pub fn reset(&mut self) {
        self.value.take();
    }

    /// The candidate variable names, in lookup order.
    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var_os(name).map(|value| value.to_string_lossy().into_owned())
}
