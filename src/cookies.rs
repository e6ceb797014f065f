//! In-memory cookie jar shared between the caller and DOM-capable runtimes.
//!
//! The jar is deliberately small: runtimes only need URL-scoped reads before
//! launch and upserts when merging mutated cookies back after a run. File
//! persistence is out of scope; callers that need it can rebuild a jar from
//! their own storage.

use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

/// A single cookie, Netscape-style.
///
/// Host-only semantics follow the classic convention: a domain with a
/// leading dot matches subdomains, a bare domain matches only that host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Expiry as epoch seconds; `None` means a session cookie.
    pub expires: Option<i64>,
}

impl Cookie {
    /// Whether this cookie is restricted to its exact host (no leading dot).
    pub fn host_only(&self) -> bool {
        !self.domain.starts_with('.')
    }

    fn domain_matches(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        if host.eq_ignore_ascii_case(domain) {
            return true;
        }
        if self.host_only() {
            return false;
        }
        let host = host.to_ascii_lowercase();
        let suffix = format!(".{}", domain.to_ascii_lowercase());
        host.ends_with(&suffix)
    }

    fn path_matches(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/') || request_path[self.path.len()..].starts_with('/'))
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires.is_some_and(|t| t <= now)
    }
}

/// Mutable cookie store scoped by URL on read.
///
/// Upserts key on (name, domain, path), matching how engines replace an
/// existing cookie when a page rewrites `document.cookie`.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie. Replacement matches on name, domain and
    /// path, preserving the original insertion position.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        if let Some(existing) = self.cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        }) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    /// Cookies applicable to `url`: domain- and path-matched, not expired,
    /// and secure cookies only over https. An unparseable or empty URL
    /// yields no cookies.
    pub fn cookies_for_url(&self, url: &str) -> Vec<&Cookie> {
        let Ok(parsed) = Url::parse(url) else {
            return Vec::new();
        };
        let Some(host) = parsed.host_str() else {
            return Vec::new();
        };
        let https = parsed.scheme() == "https";
        let path = parsed.path();
        let now = epoch_now();

        self.cookies
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| !c.secure || https)
            .filter(|c| c.domain_matches(host))
            .filter(|c| c.path_matches(path))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Current time as epoch seconds, for building cookie expiries.
pub fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
