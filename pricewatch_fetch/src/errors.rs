//! Error types for the page fetcher.

/// Errors that can occur while fetching a product page.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The attempt did not complete within the per-attempt timeout.
    #[error("Request timed out")]
    Timeout,
    /// The retailer answered with a non-success status.
    #[error("Blocked with status {status}")]
    Blocked { status: u16 },
    /// The retailer served a robot-check page instead of the product.
    #[error("Robot check page served")]
    RobotCheck,
    /// Connection refused, reset, proxy tunnel failure and similar.
    #[error("Network failure: {0}")]
    NetworkFailure(String),
    /// TLS handshake or certificate verification failed.
    #[error("TLS failure: {0}")]
    Tls(String),
    /// Every proxy identity in the pool was tried and each attempt failed.
    #[error("All {attempts} proxy identities failed")]
    ProxyExhausted { attempts: usize },
    /// The HTTP client could not be built (bad proxy URL, TLS backend).
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether another attempt through a different proxy identity may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::NetworkFailure(_) | Self::RobotCheck => true,
            Self::Blocked { status } => *status == 429 || *status >= 500,
            Self::Tls(_) | Self::ProxyExhausted { .. } | Self::Client(_) => false,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        let message = error_chain(err);
        if err.is_builder() {
            return Self::Client(message);
        }
        let lower = message.to_lowercase();
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
            Self::Tls(message)
        } else {
            Self::NetworkFailure(message)
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
