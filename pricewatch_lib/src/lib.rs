//! Library layer for pricewatch: product pages in, price histories and alerts out.
//!
//! Wraps the `pricewatch_fetch` crate with HTML field extraction, value
//! normalization, deduplicating history storage (SQLite or in-memory) and
//! edge-triggered alert evaluation.

pub mod alert;
pub mod config;
pub mod currency;
pub mod db;
pub mod error;
pub mod extract;
pub mod identity;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod tracker;
pub mod validation;

pub use pricewatch_fetch;
pub use pricewatch_fetch::{FetchConfig, FetchError, Fetcher, ProxyConfig, ProxyPool, Url};

pub use alert::{evaluate, evaluate_with_diagnostics, Evaluation, RuleDiagnostic};
pub use config::{Config, ConfigError};
pub use db::{Db, TrackedProduct};
pub use error::{PipelineError, Stage};
pub use extract::{ExtractError, Extractor, RawFields, SelectorSet};
pub use identity::ProductIdentity;
pub use model::{AlertEvent, AlertKind, AlertRule, PriceHistory, PriceStats, ProductSnapshot};
pub use normalize::{normalize, normalize_now, ValidationError};
pub use notify::{ChannelNotifier, FanoutNotifier, Notifier, TracingNotifier};
pub use pipeline::{PriceWatch, TrackOutcome};
pub use store::{MemoryStore, PriceStore, StoreError};
pub use tracker::{RecordOutcome, Tracker};
pub use validation::DomainAllowList;
