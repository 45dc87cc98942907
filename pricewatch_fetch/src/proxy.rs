//! Rotating pool of proxy egress identities.
//!
//! Each identity is one proxy session: the same upstream proxy host with a
//! distinct session-qualified username, so the provider routes each session
//! through a different exit address. The pool hands out identities in
//! round-robin order from an atomic cursor; it is the only state shared
//! between concurrent fetches.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::FetchError;

/// Default upstream proxy host.
pub const DEFAULT_PROXY_HOST: &str = "brd.superproxy.io";

/// Default upstream proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 33335;

/// Upper bound on generated sessions; ids are drawn from `0..SESSION_ID_SPACE`.
pub const MAX_PROXY_SESSIONS: usize = 10_000;

const SESSION_ID_SPACE: u32 = 1_000_000;

/// Default username template. `{username}` is the account name and
/// `{session}` the per-identity session id.
pub const DEFAULT_USERNAME_TEMPLATE: &str = "{username}-session-{session}";

/// Upstream proxy account used to generate session identities.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub username_template: String,
    /// Number of session identities to generate.
    pub sessions: usize,
    /// Accept certificates re-signed by the proxy.
    pub accept_invalid_certs: bool,
}

impl ProxyConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_PROXY_HOST.to_string(),
            port: DEFAULT_PROXY_PORT,
            username: username.into(),
            password: password.into(),
            username_template: DEFAULT_USERNAME_TEMPLATE.to_string(),
            sessions: 8,
            accept_invalid_certs: true,
        }
    }

    fn session_username(&self, session_id: u32) -> String {
        self.username_template
            .replace("{username}", &self.username)
            .replace("{session}", &session_id.to_string())
    }
}

/// One egress credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyIdentity {
    /// Log-safe name for the identity; never contains credentials.
    pub label: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl ProxyIdentity {
    pub fn new(
        label: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn to_proxy(&self) -> Result<reqwest::Proxy, FetchError> {
        let proxy_url = format!("http://{}:{}", self.host, self.port);
        let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| {
            tracing::error!("Invalid proxy URL for {}: {}", self.label, e);
            FetchError::Client(format!("invalid proxy url {}", proxy_url))
        })?;
        Ok(proxy.basic_auth(&self.username, &self.password))
    }
}

/// Round-robin pool of proxy identities.
///
/// An empty pool means direct connections; in that mode the fetcher may
/// retry on the same (absent) identity.
#[derive(Debug)]
pub struct ProxyPool {
    identities: Vec<ProxyIdentity>,
    cursor: AtomicUsize,
    accept_invalid_certs: bool,
}

impl ProxyPool {
    /// Creates a pool that rotates through `identities` in the given order,
    /// starting with the first.
    pub fn new(identities: Vec<ProxyIdentity>) -> Self {
        Self {
            identities,
            cursor: AtomicUsize::new(0),
            accept_invalid_certs: false,
        }
    }

    /// Creates a pool without proxies.
    pub fn direct() -> Self {
        Self::new(Vec::new())
    }

    /// Generates `config.sessions` identities, each with a distinct random
    /// session id substituted into the username template. The count is
    /// clamped to `1..=MAX_PROXY_SESSIONS`.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let count = config.sessions.clamp(1, MAX_PROXY_SESSIONS);
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(count);
        let mut identities = Vec::with_capacity(count);
        while identities.len() < count {
            let session_id: u32 = rng.gen_range(0..SESSION_ID_SPACE);
            if !seen.insert(session_id) {
                continue;
            }
            identities.push(ProxyIdentity::new(
                format!("session-{}", session_id),
                config.host.clone(),
                config.port,
                config.session_username(session_id),
                config.password.clone(),
            ));
        }
        Self {
            identities,
            cursor: AtomicUsize::new(0),
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }

    pub fn with_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn is_direct(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    pub fn identities(&self) -> &[ProxyIdentity] {
        &self.identities
    }

    /// Returns the next identity in rotation, or `None` for a direct pool.
    pub fn next(&self) -> Option<&ProxyIdentity> {
        self.checkout(1).into_iter().next()
    }

    /// Reserves `count` consecutive rotation slots in one atomic step.
    ///
    /// The returned identities are pairwise distinct as long as `count`
    /// does not exceed the pool size, and concurrent callers start from
    /// different offsets.
    pub fn checkout(&self, count: usize) -> Vec<&ProxyIdentity> {
        if self.identities.is_empty() || count == 0 {
            return Vec::new();
        }
        let len = self.identities.len();
        let start = self.cursor.fetch_add(count, Ordering::Relaxed);
        (0..count)
            .map(|offset| &self.identities[(start.wrapping_add(offset)) % len])
            .collect()
    }
}
