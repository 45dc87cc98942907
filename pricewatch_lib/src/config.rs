//! Runtime configuration read from `PRICEWATCH_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pricewatch_fetch::{FetchConfig, Fetcher, ProxyConfig, ProxyPool, MAX_PROXY_SESSIONS};

use crate::extract::{ExtractError, Extractor, SelectorSet};
use crate::validation::{DomainAllowList, DEFAULT_ALLOWED_DOMAINS};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid selector set: {0}")]
    Selectors(#[from] ExtractError),
    #[error("invalid allowed domains: {0}")]
    Domains(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub fetch: FetchConfig,
    /// Upstream proxy account; `None` fetches directly.
    pub proxy: Option<ProxyConfig>,
    pub allowed_domains: Vec<String>,
    /// TOML selector set replacing the built-in one.
    pub selectors_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            proxy: None,
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            selectors_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = FetchConfig::default();

        let fetch = FetchConfig {
            max_attempts: env.parse("PRICEWATCH_FETCH_MAX_ATTEMPTS", defaults.max_attempts)?,
            timeout: Duration::from_secs(
                env.parse("PRICEWATCH_FETCH_TIMEOUT_SECS", defaults.timeout.as_secs())?,
            ),
            backoff_base: Duration::from_millis(env.parse(
                "PRICEWATCH_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_multiplier: env
                .parse("PRICEWATCH_BACKOFF_MULTIPLIER", defaults.backoff_multiplier)?,
            backoff_max: Duration::from_millis(env.parse(
                "PRICEWATCH_BACKOFF_MAX_MS",
                defaults.backoff_max.as_millis() as u64,
            )?),
            jitter: defaults.jitter,
        };
        if fetch.max_attempts == 0 {
            return Err(invalid("PRICEWATCH_FETCH_MAX_ATTEMPTS", "0"));
        }
        if !(fetch.backoff_multiplier.is_finite() && fetch.backoff_multiplier >= 1.0) {
            return Err(invalid(
                "PRICEWATCH_BACKOFF_MULTIPLIER",
                &fetch.backoff_multiplier.to_string(),
            ));
        }

        let username = env
            .get("PRICEWATCH_PROXY_USERNAME")
            .or_else(|| env.get("BRIGHT_DATA_USERNAME"));
        let proxy = match username {
            Some(username) => {
                let password = env
                    .get("PRICEWATCH_PROXY_PASSWORD")
                    .or_else(|| env.get("BRIGHT_DATA_PASSWORD"))
                    .unwrap_or_default();
                let mut proxy = ProxyConfig::new(username, password);
                if let Some(host) = env.get("PRICEWATCH_PROXY_HOST") {
                    proxy.host = host;
                }
                proxy.port = env.parse("PRICEWATCH_PROXY_PORT", proxy.port)?;
                if let Some(template) = env.get("PRICEWATCH_PROXY_USERNAME_TEMPLATE") {
                    proxy.username_template = template;
                }
                proxy.sessions = env.parse("PRICEWATCH_PROXY_SESSIONS", proxy.sessions)?;
                if !(1..=MAX_PROXY_SESSIONS).contains(&proxy.sessions) {
                    return Err(invalid(
                        "PRICEWATCH_PROXY_SESSIONS",
                        &proxy.sessions.to_string(),
                    ));
                }
                proxy.accept_invalid_certs =
                    env.flag("PRICEWATCH_PROXY_INSECURE", proxy.accept_invalid_certs)?;
                Some(proxy)
            }
            None => None,
        };

        let allowed_domains = match env.get("PRICEWATCH_ALLOWED_DOMAINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect(),
            None => Config::default().allowed_domains,
        };

        Ok(Self {
            fetch,
            proxy,
            allowed_domains,
            selectors_path: env.get("PRICEWATCH_SELECTORS").map(PathBuf::from),
        })
    }

    pub fn proxy_pool(&self) -> ProxyPool {
        match &self.proxy {
            Some(proxy) => ProxyPool::from_config(proxy),
            None => ProxyPool::direct(),
        }
    }

    pub fn fetcher(&self) -> Fetcher {
        Fetcher::new(self.fetch.clone(), self.proxy_pool())
    }

    pub fn selector_set(&self) -> Result<SelectorSet, ConfigError> {
        let Some(path) = &self.selectors_path else {
            return Ok(SelectorSet::amazon());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(SelectorSet::from_toml_str(&text)?)
    }

    pub fn extractor(&self) -> Result<Extractor, ConfigError> {
        Ok(Extractor::new(&self.selector_set()?)?)
    }

    pub fn allow_list(&self) -> Result<DomainAllowList, ConfigError> {
        DomainAllowList::new(&self.allowed_domains).map_err(|e| ConfigError::Domains(e.to_string()))
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Non-empty trimmed value of `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse::<T>().map_err(|_| invalid(key, &value)),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &v)),
            },
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let cfg = config(&[]).unwrap();
        assert!(cfg.proxy.is_none());
        assert!(cfg.proxy_pool().is_direct());
        assert_eq!(cfg.fetch.max_attempts, 3);
        assert_eq!(cfg.fetch.timeout, Duration::from_secs(30));
        assert_eq!(cfg.allowed_domains, vec!["amazon.*".to_string()]);
        assert!(cfg.allow_list().unwrap().matches("www.amazon.com"));
    }

    #[test]
    fn proxy_account_from_bright_data_fallback() {
        let cfg = config(&[
            ("BRIGHT_DATA_USERNAME", "brd-customer-1"),
            ("BRIGHT_DATA_PASSWORD", "secret"),
            ("PRICEWATCH_PROXY_SESSIONS", "4"),
        ])
        .unwrap();
        let proxy = cfg.proxy.as_ref().unwrap();
        assert_eq!(proxy.host, "brd.superproxy.io");
        assert_eq!(proxy.port, 33335);
        assert_eq!(proxy.password, "secret");
        assert!(proxy.accept_invalid_certs);

        let pool = cfg.proxy_pool();
        assert_eq!(pool.len(), 4);
        assert!(pool
            .identities()
            .iter()
            .all(|id| id.username.starts_with("brd-customer-1-session-")));
    }

    #[test]
    fn pricewatch_variables_take_precedence() {
        let cfg = config(&[
            ("PRICEWATCH_PROXY_USERNAME", "primary"),
            ("BRIGHT_DATA_USERNAME", "fallback"),
            ("PRICEWATCH_PROXY_HOST", "proxy.internal"),
            ("PRICEWATCH_PROXY_PORT", "8080"),
            ("PRICEWATCH_PROXY_INSECURE", "false"),
            ("PRICEWATCH_FETCH_MAX_ATTEMPTS", "5"),
            ("PRICEWATCH_BACKOFF_BASE_MS", "250"),
            ("PRICEWATCH_ALLOWED_DOMAINS", "amazon.*, shop.example ,"),
        ])
        .unwrap();
        let proxy = cfg.proxy.unwrap();
        assert_eq!(proxy.username, "primary");
        assert_eq!(proxy.host, "proxy.internal");
        assert_eq!(proxy.port, 8080);
        assert!(!proxy.accept_invalid_certs);
        assert_eq!(cfg.fetch.max_attempts, 5);
        assert_eq!(cfg.fetch.backoff_base, Duration::from_millis(250));
        assert_eq!(cfg.allowed_domains, vec!["amazon.*", "shop.example"]);
    }

    #[test]
    fn malformed_values_are_errors() {
        for (key, value) in [
            ("PRICEWATCH_FETCH_MAX_ATTEMPTS", "three"),
            ("PRICEWATCH_FETCH_MAX_ATTEMPTS", "0"),
            ("PRICEWATCH_BACKOFF_MULTIPLIER", "0.5"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{}", key);
        }
        let err = config(&[
            ("PRICEWATCH_PROXY_USERNAME", "u"),
            ("PRICEWATCH_PROXY_INSECURE", "maybe"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PRICEWATCH_PROXY_INSECURE"));
    }

    #[test]
    fn proxy_session_count_is_bounded() {
        for value in ["0", "10001", "1000001"] {
            let err = config(&[
                ("PRICEWATCH_PROXY_USERNAME", "u"),
                ("PRICEWATCH_PROXY_SESSIONS", value),
            ])
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{}", value);
        }
        let cfg = config(&[
            ("PRICEWATCH_PROXY_USERNAME", "u"),
            ("PRICEWATCH_PROXY_SESSIONS", "10000"),
        ])
        .unwrap();
        assert_eq!(cfg.proxy.unwrap().sessions, 10_000);
    }

    #[test]
    fn missing_selector_file_is_reported() {
        let cfg = config(&[("PRICEWATCH_SELECTORS", "/nonexistent/selectors.toml")]).unwrap();
        assert!(matches!(cfg.selector_set(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn builtin_selectors_without_path() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.selector_set().unwrap(), SelectorSet::amazon());
        assert!(cfg.extractor().is_ok());
    }
}
