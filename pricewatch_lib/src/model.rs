//! Snapshots, price histories, alert rules and alert events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::currency;
use crate::identity::ProductIdentity;
use crate::store::StoreError;

/// One point-in-time observation of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub identity: ProductIdentity,
    pub fetched_at: DateTime<Utc>,
    pub title: String,
    /// Price in the currency's smallest unit (cents, pence, yen).
    pub price_minor: i64,
    /// ISO-4217 code.
    pub currency: String,
    /// Star rating clamped to 0..=5.
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub image_url: Option<String>,
    pub in_stock: bool,
}

impl ProductSnapshot {
    /// True when both snapshots observed the same state, ignoring when.
    pub fn same_observation(&self, other: &ProductSnapshot) -> bool {
        self.identity == other.identity
            && self.title == other.title
            && self.price_minor == other.price_minor
            && self.currency == other.currency
            && self.rating == other.rating
            && self.review_count == other.review_count
            && self.image_url == other.image_url
            && self.in_stock == other.in_stock
    }

    pub fn display_price(&self) -> String {
        currency::format_minor(self.price_minor, &self.currency)
    }
}

/// Snapshots of one product ordered by `fetched_at` ascending.
///
/// Consecutive entries never share an observation and `fetched_at` never
/// decreases; `push` enforces both.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceHistory {
    entries: Vec<ProductSnapshot>,
}

/// Summary figures over a price history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStats {
    pub current: i64,
    pub lowest: i64,
    pub highest: i64,
    pub average: i64,
    pub currency: String,
    pub observations: usize,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history from stored entries, checking the ordering invariant.
    pub fn from_entries(entries: Vec<ProductSnapshot>) -> Result<Self, StoreError> {
        let mut history = Self::new();
        for entry in entries {
            history.push(entry)?;
        }
        Ok(history)
    }

    /// Appends a snapshot.
    ///
    /// Returns `Ok(false)` when it repeats the latest observation and was
    /// not appended, `Err(OutOfOrder)` when it predates the latest entry.
    pub fn push(&mut self, snapshot: ProductSnapshot) -> Result<bool, StoreError> {
        if let Some(last) = self.entries.last() {
            if snapshot.fetched_at < last.fetched_at {
                return Err(StoreError::OutOfOrder {
                    identity: snapshot.identity.to_string(),
                    latest: last.fetched_at,
                    attempted: snapshot.fetched_at,
                });
            }
            if last.same_observation(&snapshot) {
                return Ok(false);
            }
        }
        self.entries.push(snapshot);
        Ok(true)
    }

    pub fn latest(&self) -> Option<&ProductSnapshot> {
        self.entries.last()
    }

    /// The entry observed immediately before `snapshot`: the latest entry
    /// that is not `snapshot` itself.
    pub fn preceding(&self, snapshot: &ProductSnapshot) -> Option<&ProductSnapshot> {
        self.entries
            .iter()
            .rev()
            .find(|entry| *entry != snapshot && entry.fetched_at <= snapshot.fetched_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProductSnapshot> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[ProductSnapshot] {
        &self.entries
    }

    /// Price summary over entries in the latest snapshot's currency.
    pub fn stats(&self) -> Option<PriceStats> {
        let latest = self.latest()?;
        let prices: Vec<i64> = self
            .entries
            .iter()
            .filter(|e| e.currency == latest.currency)
            .map(|e| e.price_minor)
            .collect();
        let lowest = prices.iter().copied().min()?;
        let highest = prices.iter().copied().max()?;
        let sum: i128 = prices.iter().map(|p| *p as i128).sum();
        let average = (sum / prices.len() as i128) as i64;
        Some(PriceStats {
            current: latest.price_minor,
            lowest,
            highest,
            average,
            currency: latest.currency.clone(),
            observations: prices.len(),
        })
    }
}

impl<'a> IntoIterator for &'a PriceHistory {
    type Item = &'a ProductSnapshot;
    type IntoIter = std::slice::Iter<'a, ProductSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Condition an alert rule watches for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Price fell to or below `threshold` minor units.
    PriceBelow,
    /// Product became available again.
    BackInStock,
    /// Price fell by at least `threshold` percent since the last observation.
    PriceDropPercent,
    /// A kind this build does not know; never fires.
    Unrecognized(String),
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PriceBelow => write!(f, "price_below"),
            Self::BackInStock => write!(f, "back_in_stock"),
            Self::PriceDropPercent => write!(f, "price_drop_percent"),
            Self::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

impl FromStr for AlertKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "price_below" => Self::PriceBelow,
            "back_in_stock" => Self::BackInStock,
            "price_drop_percent" => Self::PriceDropPercent,
            _ => Self::Unrecognized(s.to_string()),
        })
    }
}

/// A user's alert subscription for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub identity: ProductIdentity,
    pub kind: AlertKind,
    /// Minor units for `PriceBelow`, whole percent for `PriceDropPercent`,
    /// absent for `BackInStock`.
    pub threshold: Option<i64>,
    /// Currency a `PriceBelow` threshold is expressed in. Unset rules take
    /// the currency of whichever snapshot they are checked against.
    #[serde(default)]
    pub currency: Option<String>,
}

impl AlertRule {
    pub fn price_below(id: i64, identity: ProductIdentity, threshold_minor: i64) -> Self {
        Self {
            id,
            identity,
            kind: AlertKind::PriceBelow,
            threshold: Some(threshold_minor),
            currency: None,
        }
    }

    pub fn back_in_stock(id: i64, identity: ProductIdentity) -> Self {
        Self {
            id,
            identity,
            kind: AlertKind::BackInStock,
            threshold: None,
            currency: None,
        }
    }

    pub fn price_drop_percent(id: i64, identity: ProductIdentity, percent: i64) -> Self {
        Self {
            id,
            identity,
            kind: AlertKind::PriceDropPercent,
            threshold: Some(percent),
            currency: None,
        }
    }

    pub fn in_currency(mut self, code: impl Into<String>) -> Self {
        self.currency = Some(code.into());
        self
    }
}

/// A rule whose condition was newly satisfied by a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub identity: ProductIdentity,
    pub rule: AlertRule,
    pub triggering_snapshot: ProductSnapshot,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn snapshot(minute: i64, price: i64) -> ProductSnapshot {
        ProductSnapshot {
            identity: ProductIdentity::new("amazon.com", "B08N5WRWNW"),
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minute),
            title: "Kettle".to_string(),
            price_minor: price,
            currency: "USD".to_string(),
            rating: Some(4.5),
            review_count: Some(120),
            image_url: None,
            in_stock: true,
        }
    }

    #[test]
    fn same_observation_ignores_fetch_time() {
        assert!(snapshot(0, 100).same_observation(&snapshot(5, 100)));
        assert!(!snapshot(0, 100).same_observation(&snapshot(5, 90)));
    }

    #[test]
    fn push_drops_repeated_observation() {
        let mut history = PriceHistory::new();
        assert!(history.push(snapshot(0, 100)).unwrap());
        assert!(!history.push(snapshot(1, 100)).unwrap());
        assert!(history.push(snapshot(2, 80)).unwrap());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn push_rejects_older_snapshot() {
        let mut history = PriceHistory::new();
        history.push(snapshot(10, 100)).unwrap();
        let err = history.push(snapshot(5, 90)).unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { .. }));
    }

    #[test]
    fn equal_timestamps_are_allowed() {
        let mut history = PriceHistory::new();
        history.push(snapshot(0, 100)).unwrap();
        assert!(history.push(snapshot(0, 90)).unwrap());
    }

    #[test]
    fn preceding_skips_the_snapshot_itself() {
        let history = PriceHistory::from_entries(vec![snapshot(0, 100), snapshot(1, 80)]).unwrap();
        let newest = snapshot(1, 80);
        assert_eq!(history.preceding(&newest).unwrap().price_minor, 100);

        let not_recorded = snapshot(2, 80);
        assert_eq!(history.preceding(&not_recorded).unwrap().price_minor, 80);
    }

    #[test]
    fn stats_over_history() {
        let history = PriceHistory::from_entries(vec![
            snapshot(0, 100),
            snapshot(1, 80),
            snapshot(2, 120),
        ])
        .unwrap();
        let stats = history.stats().unwrap();
        assert_eq!(stats.current, 120);
        assert_eq!(stats.lowest, 80);
        assert_eq!(stats.highest, 120);
        assert_eq!(stats.average, 100);
        assert_eq!(stats.observations, 3);
        assert!(PriceHistory::new().stats().is_none());
    }

    #[test]
    fn alert_kind_round_trips_through_text() {
        for kind in [
            AlertKind::PriceBelow,
            AlertKind::BackInStock,
            AlertKind::PriceDropPercent,
        ] {
            assert_eq!(kind.to_string().parse::<AlertKind>().unwrap(), kind);
        }
        assert_eq!(
            "price_above".parse::<AlertKind>().unwrap(),
            AlertKind::Unrecognized("price_above".to_string())
        );
    }
}
