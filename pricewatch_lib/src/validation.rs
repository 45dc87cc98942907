use regex::Regex;
use url::Url;

use crate::currency;
use crate::error::PipelineError;
use crate::normalize;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &["amazon.*"];

/// Strip ASCII control characters (0x00-0x1F except space 0x20), trim whitespace,
/// and enforce a byte-length limit.
pub fn sanitize_text(input: &str, max_len: usize) -> Result<String, PipelineError> {
    if input.len() > max_len {
        return Err(PipelineError::InvalidInput(format!(
            "input exceeds maximum length of {} bytes",
            max_len
        )));
    }
    let sanitized: String = input
        .chars()
        .filter(|c| !c.is_ascii_control() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string();
    if sanitized.is_empty() {
        return Err(PipelineError::InvalidInput(
            "input is empty after sanitization".to_string(),
        ));
    }
    Ok(sanitized)
}

/// Host patterns a product URL must match.
///
/// `*` stands for one or more DNS labels, so `amazon.*` accepts
/// `amazon.com`, `www.amazon.co.uk` and `smile.amazon.de`. Subdomains of a
/// matching host are always accepted.
#[derive(Debug, Clone)]
pub struct DomainAllowList {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl DomainAllowList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PipelineError> {
        let mut list = Self {
            patterns: Vec::with_capacity(patterns.len()),
            compiled: Vec::with_capacity(patterns.len()),
        };
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().to_lowercase();
            list.compiled.push(pattern_regex(&pattern)?);
            list.patterns.push(pattern);
        }
        if list.patterns.is_empty() {
            return Err(PipelineError::InvalidInput(
                "allowed domain list is empty".to_string(),
            ));
        }
        Ok(list)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        self.compiled.iter().any(|re| re.is_match(&host))
    }
}

impl Default for DomainAllowList {
    fn default() -> Self {
        let compiled = DEFAULT_ALLOWED_DOMAINS
            .iter()
            .filter_map(|p| pattern_regex(p).ok())
            .collect();
        Self {
            patterns: DEFAULT_ALLOWED_DOMAINS.iter().map(|p| p.to_string()).collect(),
            compiled,
        }
    }
}

fn pattern_regex(pattern: &str) -> Result<Regex, PipelineError> {
    let valid = !pattern.is_empty()
        && pattern
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '*'));
    if !valid {
        return Err(PipelineError::InvalidInput(format!(
            "invalid domain pattern '{}'",
            pattern
        )));
    }
    let mut re = String::from(r"^(?:[a-z0-9-]+\.)*");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(r"[a-z0-9-]+(?:\.[a-z0-9-]+)*"),
            '.' => re.push_str(r"\."),
            other => re.push(other),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| {
        PipelineError::InvalidInput(format!("invalid domain pattern '{}': {}", pattern, e))
    })
}

/// Validate a user-supplied product URL against the allowed marketplaces.
pub fn validate_product_url(input: &str, allowed: &DomainAllowList) -> Result<Url, PipelineError> {
    let trimmed = sanitize_text(input, MAX_URL_LENGTH)
        .map_err(|e| PipelineError::InvalidUrl(e.to_string()))?;
    let url = Url::parse(&trimmed)
        .map_err(|e| PipelineError::InvalidUrl(format!("'{}': {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| PipelineError::InvalidUrl(format!("'{}' has no host", trimmed)))?;
    if !allowed.matches(host) {
        return Err(PipelineError::InvalidUrl(format!(
            "host '{}' is not an allowed marketplace (allowed: {})",
            host,
            allowed.patterns().join(", ")
        )));
    }
    Ok(url)
}

/// Parse a price like `24.99` into minor units of `currency_code`.
pub fn validate_price(input: &str, currency_code: &str) -> Result<i64, PipelineError> {
    let code = validate_currency(currency_code)?;
    let exponent = currency::exponent(&code).unwrap_or(2);
    normalize::parse_price_minor(input.trim(), exponent).map_err(|_| {
        PipelineError::InvalidInput(format!(
            "invalid price '{}'. Expected a number such as 24.99",
            input.trim()
        ))
    })
}

/// Validate an ISO-4217 code this build knows the exponent of.
pub fn validate_currency(input: &str) -> Result<String, PipelineError> {
    let code = input.trim().to_uppercase();
    if !currency::is_known(&code) {
        return Err(PipelineError::InvalidInput(format!(
            "unknown currency '{}'",
            input.trim()
        )));
    }
    Ok(code)
}

/// Validate a price-drop percentage: must be 1..=100.
pub fn validate_percent(percent: i64) -> Result<i64, PipelineError> {
    if !(1..=100).contains(&percent) {
        return Err(PipelineError::InvalidInput(format!(
            "percent must be between 1 and 100, got {}",
            percent
        )));
    }
    Ok(percent)
}

/// Validate a poll interval: must be 1..=MAX_INTERVAL_SECS.
pub fn validate_interval_secs(secs: u64) -> Result<u64, PipelineError> {
    if !(1..=MAX_INTERVAL_SECS).contains(&secs) {
        return Err(PipelineError::InvalidInput(format!(
            "interval must be between 1 and {} seconds, got {}",
            MAX_INTERVAL_SECS, secs
        )));
    }
    Ok(secs)
}
