//! One tracking cycle: validate, fetch, extract, normalize, record, alert.

use std::sync::Arc;
use std::time::Duration;

use pricewatch_fetch::Fetcher;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::alert::{evaluate_with_diagnostics, Evaluation, RuleDiagnostic};
use crate::config::{Config, ConfigError};
use crate::error::PipelineError;
use crate::extract::Extractor;
use crate::identity::ProductIdentity;
use crate::model::{AlertEvent, PriceHistory, ProductSnapshot};
use crate::normalize::normalize_now;
use crate::notify::Notifier;
use crate::store::{PriceStore, StoreError};
use crate::tracker::Tracker;
use crate::validation::{validate_product_url, DomainAllowList};

/// What a successful cycle observed and triggered.
#[derive(Debug, Clone, Serialize)]
pub struct TrackOutcome {
    pub snapshot: ProductSnapshot,
    /// False when the snapshot repeated the latest stored observation.
    pub appended: bool,
    pub alerts: Vec<AlertEvent>,
    pub diagnostics: Vec<RuleDiagnostic>,
    /// Proxy session that served the page, `None` when fetched directly.
    pub proxy: Option<String>,
    pub attempts: usize,
}

pub struct PriceWatch {
    fetcher: Fetcher,
    extractor: Extractor,
    tracker: Tracker,
    notifier: Arc<dyn Notifier>,
    allowed: DomainAllowList,
}

impl PriceWatch {
    pub fn new(
        fetcher: Fetcher,
        extractor: Extractor,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
        allowed: DomainAllowList,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            tracker: Tracker::new(store),
            notifier,
            allowed,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn PriceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.fetcher(),
            config.extractor()?,
            store,
            notifier,
            config.allow_list()?,
        ))
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn allowed_domains(&self) -> &DomainAllowList {
        &self.allowed
    }

    /// Validates `input` and derives the product identity it names.
    pub fn identify(&self, input: &str) -> Result<(Url, ProductIdentity), PipelineError> {
        let url = validate_product_url(input, &self.allowed)?;
        let identity = ProductIdentity::from_url(&url)?;
        Ok((url, identity))
    }

    /// Runs one cycle and returns the normalized snapshot.
    pub async fn track_product(&self, input: &str) -> Result<ProductSnapshot, PipelineError> {
        Ok(self.track(input).await?.snapshot)
    }

    pub async fn track(&self, input: &str) -> Result<TrackOutcome, PipelineError> {
        let (url, identity) = self.identify(input)?;
        self.run(&url, &identity).await
    }

    /// Like [`track`](Self::track), abandoning the cycle once `cancel` fires.
    pub async fn track_with_cancel(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TrackOutcome, PipelineError> {
        let (url, identity) = self.identify(input)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Tracking of {} cancelled", identity);
                Err(PipelineError::Cancelled { identity: identity.clone() })
            }
            result = self.run(&url, &identity) => result,
        }
    }

    /// Like [`track`](Self::track), abandoning the cycle after `deadline`.
    pub async fn track_with_deadline(
        &self,
        input: &str,
        deadline: Duration,
    ) -> Result<TrackOutcome, PipelineError> {
        let (url, identity) = self.identify(input)?;
        let result = tokio::time::timeout(deadline, self.run(&url, &identity)).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("Tracking of {} exceeded {:?}", identity, deadline);
                Err(PipelineError::Cancelled { identity })
            }
        }
    }

    pub fn history(&self, input: &str) -> Result<PriceHistory, PipelineError> {
        let (_, identity) = self.identify(input)?;
        self.tracker
            .history(&identity)
            .map_err(|source| PipelineError::Store { identity, source })
    }

    async fn run(
        &self,
        url: &Url,
        identity: &ProductIdentity,
    ) -> Result<TrackOutcome, PipelineError> {
        let store_err = |source: StoreError| PipelineError::Store {
            identity: identity.clone(),
            source,
        };

        let page = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| PipelineError::Fetch {
                identity: identity.clone(),
                source,
            })?;

        let raw = self.extractor.extract(&page.body).map_err(|source| {
            tracing::warn!(
                "Selectors need attention for {} ({}): {}",
                identity,
                page.url,
                source
            );
            PipelineError::Extract {
                identity: identity.clone(),
                source,
            }
        })?;

        let snapshot = normalize_now(identity, &raw).map_err(|source| {
            tracing::warn!("Unusable values for {} ({}): {}", identity, page.url, source);
            PipelineError::Validate {
                identity: identity.clone(),
                source,
            }
        })?;

        let rules = self.tracker.store().read_rules(identity).map_err(store_err)?;
        let recorded = self
            .tracker
            .record(snapshot.clone())
            .await
            .map_err(store_err)?;

        let evaluation = if recorded.appended {
            evaluate_with_diagnostics(identity, &snapshot, &recorded.history, &rules)
        } else {
            Evaluation::default()
        };
        for diagnostic in &evaluation.diagnostics {
            tracing::warn!(
                "Skipping alert rule {} for {}: {}",
                diagnostic.rule_id,
                identity,
                diagnostic.message
            );
        }
        for event in &evaluation.events {
            self.notifier.notify(event);
        }

        Ok(TrackOutcome {
            snapshot,
            appended: recorded.appended,
            alerts: evaluation.events,
            diagnostics: evaluation.diagnostics,
            proxy: page.proxy,
            attempts: page.attempts,
        })
    }
}
