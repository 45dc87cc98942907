//! Edge-triggered alert evaluation.
//!
//! A rule fires when the newly recorded snapshot satisfies its condition and
//! the snapshot observed immediately before it did not, so a price that stays
//! under a threshold alerts once rather than on every poll.

use serde::Serialize;

use crate::currency;
use crate::identity::ProductIdentity;
use crate::model::{AlertEvent, AlertKind, AlertRule, PriceHistory, ProductSnapshot};

/// A rule that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDiagnostic {
    pub rule_id: i64,
    pub identity: ProductIdentity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evaluation {
    pub events: Vec<AlertEvent>,
    pub diagnostics: Vec<RuleDiagnostic>,
}

/// Fired events for `new_snapshot`. Malformed rules are skipped and logged.
pub fn evaluate(
    identity: &ProductIdentity,
    new_snapshot: &ProductSnapshot,
    history: &PriceHistory,
    rules: &[AlertRule],
) -> Vec<AlertEvent> {
    let evaluation = evaluate_with_diagnostics(identity, new_snapshot, history, rules);
    for diagnostic in &evaluation.diagnostics {
        tracing::warn!(
            "Skipping alert rule {} for {}: {}",
            diagnostic.rule_id,
            diagnostic.identity,
            diagnostic.message
        );
    }
    evaluation.events
}

/// Like [`evaluate`], returning malformed rules as diagnostics instead of
/// logging them.
pub fn evaluate_with_diagnostics(
    identity: &ProductIdentity,
    new_snapshot: &ProductSnapshot,
    history: &PriceHistory,
    rules: &[AlertRule],
) -> Evaluation {
    let mut evaluation = Evaluation::default();
    if &new_snapshot.identity != identity {
        return evaluation;
    }
    let previous = history.preceding(new_snapshot);

    for rule in rules.iter().filter(|rule| &rule.identity == identity) {
        match check(rule, new_snapshot, previous) {
            Ok(Some(reason)) => evaluation.events.push(AlertEvent {
                identity: identity.clone(),
                rule: rule.clone(),
                triggering_snapshot: new_snapshot.clone(),
                reason,
            }),
            Ok(None) => {}
            Err(message) => evaluation.diagnostics.push(RuleDiagnostic {
                rule_id: rule.id,
                identity: identity.clone(),
                message,
            }),
        }
    }
    evaluation
}

fn check(
    rule: &AlertRule,
    new: &ProductSnapshot,
    previous: Option<&ProductSnapshot>,
) -> Result<Option<String>, String> {
    match &rule.kind {
        AlertKind::PriceBelow => {
            let threshold = match rule.threshold {
                Some(t) if t >= 0 => t,
                _ => return Err("price_below needs a non-negative threshold".to_string()),
            };
            if let Some(code) = &rule.currency {
                if !code.eq_ignore_ascii_case(&new.currency) {
                    return Err(format!(
                        "threshold is in {} but the price is in {}",
                        code, new.currency
                    ));
                }
            }
            let now_below = new.price_minor <= threshold;
            let was_below = previous
                .is_some_and(|p| p.currency == new.currency && p.price_minor <= threshold);
            if !now_below || was_below {
                return Ok(None);
            }
            let limit = currency::format_minor(threshold, &new.currency);
            Ok(Some(match previous {
                Some(p) => format!(
                    "price {} is at or below {} (was {})",
                    new.display_price(),
                    limit,
                    p.display_price()
                ),
                None => format!("price {} is at or below {}", new.display_price(), limit),
            }))
        }
        AlertKind::BackInStock => {
            if rule.threshold.is_some() {
                return Err("back_in_stock takes no threshold".to_string());
            }
            match previous {
                Some(p) if new.in_stock && !p.in_stock => Ok(Some(format!(
                    "back in stock at {}",
                    new.display_price()
                ))),
                _ => Ok(None),
            }
        }
        AlertKind::PriceDropPercent => {
            let percent = match rule.threshold {
                Some(p) if (1..=100).contains(&p) => p,
                _ => {
                    return Err("price_drop_percent needs a threshold between 1 and 100".to_string())
                }
            };
            let Some(p) = previous else {
                return Ok(None);
            };
            if p.currency != new.currency || p.price_minor <= 0 || new.price_minor >= p.price_minor
            {
                return Ok(None);
            }
            let limit = i128::from(p.price_minor) * i128::from(100 - percent);
            if i128::from(new.price_minor) * 100 > limit {
                return Ok(None);
            }
            let dropped = (p.price_minor - new.price_minor) * 100 / p.price_minor;
            Ok(Some(format!(
                "price dropped {}% from {} to {}",
                dropped,
                p.display_price(),
                new.display_price()
            )))
        }
        AlertKind::Unrecognized(kind) => Err(format!("unrecognized alert kind '{}'", kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn identity() -> ProductIdentity {
        ProductIdentity::new("amazon.com", "B08N5WRWNW")
    }

    fn snapshot(minute: i64, price: i64, in_stock: bool) -> ProductSnapshot {
        ProductSnapshot {
            identity: identity(),
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minute),
            title: "Kettle".to_string(),
            price_minor: price,
            currency: "USD".to_string(),
            rating: None,
            review_count: None,
            image_url: None,
            in_stock,
        }
    }

    /// Records each snapshot and evaluates `rules` after every append,
    /// returning the number of events per step.
    fn replay(steps: &[(i64, bool)], rules: &[AlertRule]) -> Vec<usize> {
        let mut history = PriceHistory::new();
        let mut fired = Vec::new();
        for (minute, (price, in_stock)) in steps.iter().enumerate() {
            let snap = snapshot(minute as i64, *price, *in_stock);
            if history.push(snap.clone()).unwrap() {
                fired.push(evaluate(&identity(), &snap, &history, rules).len());
            } else {
                fired.push(0);
            }
        }
        fired
    }

    #[test]
    fn price_below_fires_once_on_crossing() {
        let rules = [AlertRule::price_below(1, identity(), 90)];
        let fired = replay(&[(100, true), (100, true), (80, true), (85, true)], &rules);
        assert_eq!(fired, vec![0, 0, 1, 0]);
    }

    #[test]
    fn price_below_refires_after_recovering() {
        let rules = [AlertRule::price_below(1, identity(), 90)];
        let fired = replay(&[(80, true), (120, true), (70, true)], &rules);
        assert_eq!(fired, vec![1, 0, 1]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let rules = [AlertRule::price_below(1, identity(), 100)];
        assert_eq!(replay(&[(150, true), (100, true)], &rules), vec![0, 1]);
    }

    #[test]
    fn back_in_stock_needs_a_prior_out_of_stock() {
        let rules = [AlertRule::back_in_stock(2, identity())];
        let fired = replay(&[(100, true), (100, false), (100, true), (90, true)], &rules);
        assert_eq!(fired, vec![0, 0, 1, 0]);
    }

    #[test]
    fn price_drop_percent_compares_with_previous() {
        let rules = [AlertRule::price_drop_percent(3, identity(), 20)];
        let fired = replay(&[(1000, true), (850, true), (680, true)], &rules);
        assert_eq!(fired, vec![0, 0, 1]);
    }

    #[test]
    fn event_carries_rule_and_snapshot() {
        let mut history = PriceHistory::new();
        let first = snapshot(0, 100, true);
        let second = snapshot(1, 80, true);
        history.push(first).unwrap();
        history.push(second.clone()).unwrap();
        let rule = AlertRule::price_below(7, identity(), 90);
        let events = evaluate(&identity(), &second, &history, &[rule.clone()]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule, rule);
        assert_eq!(events[0].triggering_snapshot, second);
        assert!(events[0].reason.contains("0.80 USD"));
        assert!(events[0].reason.contains("was 1.00 USD"));
    }

    #[test]
    fn price_below_in_another_currency_is_skipped() {
        let snap = snapshot(0, 2000, true);
        let mut history = PriceHistory::new();
        history.push(snap.clone()).unwrap();
        let yen = AlertRule::price_below(1, identity(), 2500).in_currency("JPY");
        let dollars = AlertRule::price_below(2, identity(), 2500).in_currency("usd");

        let evaluation =
            evaluate_with_diagnostics(&identity(), &snap, &history, &[yen, dollars]);

        assert_eq!(evaluation.events.len(), 1);
        assert_eq!(evaluation.events[0].rule.id, 2);
        assert_eq!(evaluation.diagnostics.len(), 1);
        assert_eq!(evaluation.diagnostics[0].rule_id, 1);
        assert!(evaluation.diagnostics[0].message.contains("JPY"));
    }

    #[test]
    fn rules_for_other_products_are_ignored() {
        let other = ProductIdentity::new("amazon.de", "B08N5WRWNW");
        let rules = [AlertRule::price_below(1, other, 1000)];
        assert_eq!(replay(&[(100, true)], &rules), vec![0]);
    }

    #[test]
    fn malformed_rules_become_diagnostics() {
        let snap = snapshot(0, 100, true);
        let mut history = PriceHistory::new();
        history.push(snap.clone()).unwrap();
        let rules = [
            AlertRule {
                id: 1,
                identity: identity(),
                kind: AlertKind::PriceBelow,
                threshold: None,
                currency: None,
            },
            AlertRule {
                id: 2,
                identity: identity(),
                kind: AlertKind::Unrecognized("price_above".to_string()),
                threshold: Some(10),
                currency: None,
            },
            AlertRule::price_drop_percent(3, identity(), 0),
            AlertRule::price_below(4, identity(), 150),
        ];
        let evaluation = evaluate_with_diagnostics(&identity(), &snap, &history, &rules);
        assert_eq!(evaluation.events.len(), 1);
        assert_eq!(evaluation.events[0].rule.id, 4);
        let ids: Vec<i64> = evaluation.diagnostics.iter().map(|d| d.rule_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
