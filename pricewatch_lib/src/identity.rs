//! Canonical product identity derived from a product page URL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PipelineError;

/// Host prefixes that do not change which product a page shows.
const IGNORED_HOST_PREFIXES: &[&str] = &["www.", "m.", "smile."];

/// Path segments that are followed by the product's ASIN.
const ASIN_MARKERS: &[&[&str]] = &[
    &["dp"],
    &["gp", "product"],
    &["gp", "aw", "d"],
    &["exec", "obidos", "asin"],
    &["o", "asin"],
];

/// Canonical key for one product on one marketplace.
///
/// Derived only from the host and path of a URL, so tracking parameters,
/// fragments and slug text never produce a different identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductIdentity {
    /// Lower-cased host without `www.`-style prefixes, plus `:port` when
    /// the URL carries a non-default port.
    pub marketplace: String,
    /// The ASIN when the path has one, otherwise the normalized path.
    pub product_id: String,
}

impl ProductIdentity {
    pub fn new(marketplace: impl Into<String>, product_id: impl Into<String>) -> Self {
        Self {
            marketplace: marketplace.into(),
            product_id: product_id.into(),
        }
    }

    /// Derives the identity of the product shown at `url`.
    pub fn from_url(url: &Url) -> Result<Self, PipelineError> {
        let host = url
            .host_str()
            .ok_or_else(|| PipelineError::InvalidUrl(format!("{} has no host", url)))?
            .to_ascii_lowercase();
        let mut marketplace = IGNORED_HOST_PREFIXES
            .iter()
            .find_map(|prefix| host.strip_prefix(prefix))
            .unwrap_or(&host)
            .to_string();
        if let Some(port) = url.port() {
            marketplace = format!("{}:{}", marketplace, port);
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let product_id = match find_asin(&segments) {
            Some(asin) => asin,
            None if segments.is_empty() => {
                return Err(PipelineError::InvalidUrl(format!(
                    "{} does not point at a product page",
                    url
                )))
            }
            None => format!("/{}", segments.join("/").to_ascii_lowercase()),
        };

        Ok(Self {
            marketplace,
            product_id,
        })
    }

    /// Whether the product id is an ASIN rather than a path.
    pub fn is_asin(&self) -> bool {
        !self.product_id.starts_with('/')
    }

    /// A clean https URL for the product page, free of tracking noise.
    pub fn canonical_url(&self) -> String {
        self.canonical_url_with_scheme("https")
    }

    /// Like [`canonical_url`](Self::canonical_url) with the given scheme.
    ///
    /// ASIN marketplaces are served from `www.`; IP hosts and path-keyed
    /// shops keep the host as stored.
    pub fn canonical_url_with_scheme(&self, scheme: &str) -> String {
        if !self.is_asin() {
            return format!("{}://{}{}", scheme, self.marketplace, self.product_id);
        }
        let is_ip = self
            .marketplace
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        if is_ip || self.marketplace.starts_with("localhost") {
            format!("{}://{}/dp/{}", scheme, self.marketplace, self.product_id)
        } else {
            format!("{}://www.{}/dp/{}", scheme, self.marketplace, self.product_id)
        }
    }

    /// Stable string key, `marketplace:product_id`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProductIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.marketplace, self.product_id)
    }
}

impl FromStr for ProductIdentity {
    type Err = PipelineError;

    /// Parses the `marketplace:product_id` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The marketplace may carry a port, so split on the last ':' that
        // precedes either an ASIN or a '/'-prefixed path.
        let split = match s.find(":/") {
            Some(idx) => Some(idx),
            None => s.rfind(':'),
        };
        match split {
            Some(idx) if idx > 0 && idx + 1 < s.len() => {
                Ok(Self::new(&s[..idx], &s[idx + 1..]))
            }
            _ => Err(PipelineError::InvalidUrl(format!(
                "'{}' is not a product identity",
                s
            ))),
        }
    }
}

fn find_asin(segments: &[&str]) -> Option<String> {
    for marker in ASIN_MARKERS {
        for start in 0..segments.len() {
            let end = start + marker.len();
            if end >= segments.len() {
                break;
            }
            let matches = segments[start..end]
                .iter()
                .zip(marker.iter())
                .all(|(seg, m)| seg.eq_ignore_ascii_case(m));
            if matches && is_asin(segments[end]) {
                return Some(segments[end].to_ascii_uppercase());
            }
        }
    }
    None
}

fn is_asin(candidate: &str) -> bool {
    candidate.len() == 10 && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}
