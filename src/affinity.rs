//! Cookie-based session affinity.
//!
//! The sticky cookie carries a backend id. On each request the
//! [`Affinity`] resolver checks that id against the live healthy set; a
//! hit overrides the balancer, a miss (absent, unknown, or unhealthy) is
//! not an error and simply falls through to the strategy. The dispatcher
//! then asks for a [`Pin`] to decide whether a `Set-Cookie` goes out.

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

use crate::config::model::AffinityConfig;
use crate::registry::Backend;

/// How the chosen backend relates to the client's sticky cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    /// The cookie named a healthy backend and it was used.
    Kept,
    /// No cookie was sent; a new one binds the client to the pick.
    Fresh,
    /// The cookie named an unknown or unhealthy backend; it is replaced.
    Repinned,
    /// Affinity is disabled.
    Off,
}

impl Pin {
    #[must_use]
    pub const fn issues_cookie(self) -> bool {
        matches!(self, Self::Fresh | Self::Repinned)
    }
}

#[derive(Debug, Clone)]
pub struct Affinity {
    config: AffinityConfig,
}

impl Affinity {
    #[must_use]
    pub const fn new(config: AffinityConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Read the sticky token from the request's `Cookie` headers.
    #[must_use]
    pub fn token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        if !self.config.enabled {
            return None;
        }
        find_cookie(headers, &self.config.cookie_name)
    }

    /// The healthy backend named by `token`, if any.
    #[must_use]
    pub fn resolve(&self, token: Option<&str>, healthy: &[Backend]) -> Option<Backend> {
        if !self.config.enabled {
            return None;
        }
        let token = token?;
        healthy.iter().find(|b| b.id == token).cloned()
    }

    /// Classify the outcome once the backend has been chosen.
    #[must_use]
    pub fn pin(&self, token: Option<&str>, chosen: &Backend) -> Pin {
        if !self.config.enabled {
            return Pin::Off;
        }
        match token {
            None => Pin::Fresh,
            Some(t) if t == chosen.id => Pin::Kept,
            Some(_) => Pin::Repinned,
        }
    }

    /// `Set-Cookie` value binding the client to `backend`.
    #[must_use]
    pub fn set_cookie(&self, backend: &Backend) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Max-Age={}; Path=/",
            self.config.cookie_name,
            backend.id,
            self.config.max_age_ms / 1000
        );
        if self.config.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.config.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }

    pub fn apply(&self, pin: Pin, backend: &Backend, headers: &mut HeaderMap) {
        if !pin.issues_cookie() {
            return;
        }
        match self.set_cookie(backend) {
            Some(value) => {
                headers.append(SET_COOKIE, value);
            }
            None => {
                tracing::warn!(backend = %backend.id, "backend id is not a valid cookie value, skipping pin");
            }
        }
    }
}

/// Find a cookie value by name across all `Cookie` headers.
fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
}
