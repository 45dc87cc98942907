//! Error type for a full tracking cycle.

use std::fmt;

use pricewatch_fetch::FetchError;

use crate::extract::ExtractError;
use crate::identity::ProductIdentity;
use crate::normalize::ValidationError;
use crate::store::StoreError;

/// Message shown to end users for any failed cycle.
pub const USER_MESSAGE: &str = "Could not fetch product";

/// Pipeline stage at which a cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Input,
    Fetch,
    Extract,
    Normalize,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Fetch => write!(f, "fetch"),
            Self::Extract => write!(f, "extract"),
            Self::Normalize => write!(f, "normalize"),
            Self::Store => write!(f, "store"),
        }
    }
}

/// A failed tracking cycle, carrying the product and the failing stage.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid product url: {0}")]
    InvalidUrl(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("fetch failed for {identity}: {source}")]
    Fetch {
        identity: ProductIdentity,
        #[source]
        source: FetchError,
    },
    #[error("extraction failed for {identity}: {source}")]
    Extract {
        identity: ProductIdentity,
        #[source]
        source: ExtractError,
    },
    #[error("validation failed for {identity}: {source}")]
    Validate {
        identity: ProductIdentity,
        #[source]
        source: ValidationError,
    },
    #[error("storage failed for {identity}: {source}")]
    Store {
        identity: ProductIdentity,
        #[source]
        source: StoreError,
    },
    #[error("tracking {identity} was cancelled")]
    Cancelled { identity: ProductIdentity },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidUrl(_) | Self::InvalidInput(_) => Stage::Input,
            Self::Fetch { .. } | Self::Cancelled { .. } => Stage::Fetch,
            Self::Extract { .. } => Stage::Extract,
            Self::Validate { .. } => Stage::Normalize,
            Self::Store { .. } => Stage::Store,
        }
    }

    pub fn identity(&self) -> Option<&ProductIdentity> {
        match self {
            Self::InvalidUrl(_) | Self::InvalidInput(_) => None,
            Self::Fetch { identity, .. }
            | Self::Extract { identity, .. }
            | Self::Validate { identity, .. }
            | Self::Store { identity, .. }
            | Self::Cancelled { identity } => Some(identity),
        }
    }

    /// Whether running the same cycle again later may succeed. Markup and
    /// validation failures need a selector update, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { source, .. } => {
                source.is_transient() || matches!(source, FetchError::ProxyExhausted { .. })
            }
            Self::Cancelled { .. } => true,
            Self::Store { source, .. } => !matches!(source, StoreError::OutOfOrder { .. }),
            Self::InvalidUrl(_)
            | Self::InvalidInput(_)
            | Self::Extract { .. }
            | Self::Validate { .. } => false,
        }
    }

    /// Generic text for the presentation layer; `Display` has the detail.
    pub fn user_message(&self) -> &'static str {
        USER_MESSAGE
    }
}
