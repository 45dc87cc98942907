//! SQLite storage for price histories and alert rules.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::identity::ProductIdentity;
use crate::model::{AlertKind, AlertRule, PriceHistory, ProductSnapshot};
use crate::store::{PriceStore, StoreError};

const SCHEMA_VERSION: i32 = 2;

const PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;";

pub struct Db {
    conn: Mutex<Connection>,
}

/// A product known to the database, with its latest observed price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedProduct {
    pub identity: ProductIdentity,
    pub title: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub latest_price_minor: Option<i64>,
    pub currency: Option<String>,
    pub observations: i64,
    /// Page URL last used to track the product, scheme included.
    pub url: Option<String>,
}

impl TrackedProduct {
    /// URL to fetch when polling: the recorded page URL, or the canonical
    /// https URL for products added before one was recorded.
    pub fn page_url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| self.identity.canonical_url())
    }
}

type SnapshotRow = (
    String,
    String,
    i64,
    String,
    Option<f64>,
    Option<i64>,
    Option<String>,
    bool,
);

type ProductRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<i64>,
    Option<String>,
    i64,
    Option<String>,
);

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(PRAGMAS)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 2 {
            migrate_v2(&conn)?;
        }

        let schema = include_str!("../schema/sqlite.sql");
        conn.execute_batch(schema)?;

        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .query_row(
                "SELECT value FROM pricewatch_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO pricewatch_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Adds a product to the tracked set without recording a snapshot.
    pub fn register_product(&self, identity: &ProductIdentity) -> Result<(), StoreError> {
        register(&self.conn(), identity)
    }

    /// Registers `identity` if needed and records the URL to poll it from.
    pub fn set_product_url(&self, identity: &ProductIdentity, url: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        register(&tx, identity)?;
        tx.execute(
            "UPDATE products SET url = ?2 WHERE identity = ?1",
            params![identity.key(), url],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn tracked_products(&self) -> Result<Vec<TrackedProduct>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.marketplace, p.product_id, p.title, p.first_seen, p.last_seen,
                    (SELECT s.price_minor FROM snapshots s WHERE s.identity = p.identity
                     ORDER BY s.fetched_at DESC, s.snapshot_id DESC LIMIT 1),
                    (SELECT s.currency FROM snapshots s WHERE s.identity = p.identity
                     ORDER BY s.fetched_at DESC, s.snapshot_id DESC LIMIT 1),
                    (SELECT COUNT(1) FROM snapshots s WHERE s.identity = p.identity),
                    p.url
             FROM products p
             ORDER BY p.identity",
        )?;
        let rows: Vec<ProductRow> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(
                |(marketplace, product_id, title, first_seen, last_seen, price, currency, count, url)| {
                    Ok(TrackedProduct {
                        identity: ProductIdentity::new(marketplace, product_id),
                        title,
                        first_seen: parse_time(&first_seen)?,
                        last_seen: last_seen.as_deref().map(parse_time).transpose()?,
                        latest_price_minor: price,
                        currency,
                        observations: count,
                        url,
                    })
                },
            )
            .collect()
    }

    pub fn snapshot_count(&self) -> Result<i64, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(1) FROM snapshots", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn add_rule(
        &self,
        identity: &ProductIdentity,
        kind: &AlertKind,
        threshold: Option<i64>,
        currency: Option<&str>,
    ) -> Result<AlertRule, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        register(&tx, identity)?;
        tx.execute(
            "INSERT INTO alert_rules (identity, kind, threshold, currency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.key(),
                kind.to_string(),
                threshold,
                currency,
                format_time(Utc::now())
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(AlertRule {
            id,
            identity: identity.clone(),
            kind: kind.clone(),
            threshold,
            currency: currency.map(str::to_string),
        })
    }

    /// Deletes a rule; returns whether it existed.
    pub fn remove_rule(&self, id: i64) -> Result<bool, StoreError> {
        let changed = self
            .conn()
            .execute("DELETE FROM alert_rules WHERE rule_id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// All rules, or only those for `identity`.
    pub fn list_rules(
        &self,
        identity: Option<&ProductIdentity>,
    ) -> Result<Vec<AlertRule>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.rule_id, p.marketplace, p.product_id, r.kind, r.threshold, r.currency
             FROM alert_rules r
             JOIN products p ON p.identity = r.identity
             WHERE (?1 IS NULL OR r.identity = ?1)
             ORDER BY r.rule_id",
        )?;
        let key = identity.map(|i| i.key());
        let rules = stmt
            .query_map(params![key], |row| {
                let kind: String = row.get(3)?;
                Ok(AlertRule {
                    id: row.get(0)?,
                    identity: ProductIdentity::new(
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ),
                    kind: kind.parse().unwrap_or(AlertKind::Unrecognized(kind)),
                    threshold: row.get(4)?,
                    currency: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }
}

impl PriceStore for Db {
    fn append(&self, snapshot: &ProductSnapshot) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let fetched_at = format_time(snapshot.fetched_at);
        tx.execute(
            "INSERT INTO products (identity, marketplace, product_id, title, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(identity) DO UPDATE SET
               title = excluded.title,
               last_seen = excluded.last_seen",
            params![
                snapshot.identity.key(),
                snapshot.identity.marketplace,
                snapshot.identity.product_id,
                snapshot.title,
                fetched_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO snapshots
               (identity, fetched_at, title, price_minor, currency, rating, review_count, image_url, in_stock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                snapshot.identity.key(),
                fetched_at,
                snapshot.title,
                snapshot.price_minor,
                snapshot.currency,
                snapshot.rating,
                snapshot.review_count,
                snapshot.image_url,
                snapshot.in_stock,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn read_history(&self, identity: &ProductIdentity) -> Result<PriceHistory, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT fetched_at, title, price_minor, currency, rating, review_count, image_url, in_stock
             FROM snapshots
             WHERE identity = ?1
             ORDER BY fetched_at ASC, snapshot_id ASC",
        )?;
        let rows: Vec<SnapshotRow> = stmt
            .query_map(params![identity.key()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (fetched_at, title, price_minor, currency, rating, review_count, image_url, in_stock) in
            rows
        {
            entries.push(ProductSnapshot {
                identity: identity.clone(),
                fetched_at: parse_time(&fetched_at)?,
                title,
                price_minor,
                currency,
                rating,
                review_count,
                image_url,
                in_stock,
            });
        }
        PriceHistory::from_entries(entries)
    }

    fn read_rules(&self, identity: &ProductIdentity) -> Result<Vec<AlertRule>, StoreError> {
        self.list_rules(Some(identity))
    }
}

/// Price rules remember the currency of their threshold; products
/// remember the page URL they were tracked from.
fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
    for sql in &[
        "ALTER TABLE alert_rules ADD COLUMN currency TEXT",
        "ALTER TABLE products ADD COLUMN url TEXT",
    ] {
        match conn.execute(sql, []) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                if msg.contains("duplicate column name") || msg.contains("no such table") => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn register(conn: &Connection, identity: &ProductIdentity) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO products (identity, marketplace, product_id, first_seen)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(identity) DO NOTHING",
        params![
            identity.key(),
            identity.marketplace,
            identity.product_id,
            format_time(Utc::now()),
        ],
    )?;
    Ok(())
}

// Fixed-width nanosecond timestamps sort lexicographically in time order.
fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn open_test_db() -> Db {
        let db = Db::open_in_memory().expect("open in-memory db");
        db.init().expect("init schema");
        db
    }

    fn get_user_version(db: &Db) -> i32 {
        db.conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("read user_version")
    }

    fn identity() -> ProductIdentity {
        ProductIdentity::new("amazon.com", "B08N5WRWNW")
    }

    fn snapshot(minute: i64, price: i64, in_stock: bool) -> ProductSnapshot {
        ProductSnapshot {
            identity: identity(),
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
                + Duration::minutes(minute)
                + Duration::nanoseconds(123_456_789),
            title: "Electric Kettle".to_string(),
            price_minor: price,
            currency: "USD".to_string(),
            rating: Some(4.6),
            review_count: Some(1204),
            image_url: Some("https://m.media-amazon.com/images/I/kettle.jpg".to_string()),
            in_stock,
        }
    }

    #[test]
    fn test_init_idempotent() {
        let db = open_test_db();
        db.init().expect("second init");
        assert_eq!(get_user_version(&db), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_v1_rules_gain_currency() {
        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "CREATE TABLE products (
                     identity TEXT PRIMARY KEY, marketplace TEXT NOT NULL,
                     product_id TEXT NOT NULL, title TEXT,
                     first_seen TEXT NOT NULL, last_seen TEXT);
                 CREATE TABLE alert_rules (
                     rule_id INTEGER PRIMARY KEY AUTOINCREMENT, identity TEXT NOT NULL,
                     kind TEXT NOT NULL, threshold INTEGER, created_at TEXT NOT NULL);
                 INSERT INTO products VALUES
                     ('amazon.com:B08N5WRWNW', 'amazon.com', 'B08N5WRWNW', NULL,
                      '2024-06-01T00:00:00Z', NULL);
                 INSERT INTO alert_rules (identity, kind, threshold, created_at) VALUES
                     ('amazon.com:B08N5WRWNW', 'price_below', 2500, '2024-06-01T00:00:00Z');
                 PRAGMA user_version = 1;",
            )
            .unwrap();

        db.init().unwrap();

        assert_eq!(get_user_version(&db), SCHEMA_VERSION);
        let rules = db.read_rules(&identity()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].currency, None);
        let added = db
            .add_rule(&identity(), &AlertKind::PriceBelow, Some(1999), Some("USD"))
            .unwrap();
        assert_eq!(db.read_rules(&identity()).unwrap()[1], added);
        assert_eq!(db.tracked_products().unwrap()[0].url, None);
    }

    #[test]
    fn test_append_and_read_history() {
        let db = open_test_db();
        db.append(&snapshot(0, 2999, true)).unwrap();
        db.append(&snapshot(10, 2499, false)).unwrap();

        let history = db.read_history(&identity()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[0], snapshot(0, 2999, true));
        assert_eq!(history.latest().unwrap(), &snapshot(10, 2499, false));
        assert_eq!(db.snapshot_count().unwrap(), 2);
    }

    #[test]
    fn test_history_of_unknown_product_is_empty() {
        let db = open_test_db();
        let other = ProductIdentity::new("amazon.de", "B000000000");
        assert!(db.read_history(&other).unwrap().is_empty());
    }

    #[test]
    fn test_tracked_products_report_latest_price() {
        let db = open_test_db();
        db.append(&snapshot(0, 2999, true)).unwrap();
        db.append(&snapshot(5, 2499, true)).unwrap();
        db.register_product(&ProductIdentity::new("amazon.co.uk", "B0000000UK"))
            .unwrap();

        let products = db.tracked_products().unwrap();
        assert_eq!(products.len(), 2);
        let kettle = products
            .iter()
            .find(|p| p.identity == identity())
            .expect("kettle tracked");
        assert_eq!(kettle.latest_price_minor, Some(2499));
        assert_eq!(kettle.currency.as_deref(), Some("USD"));
        assert_eq!(kettle.observations, 2);
        assert_eq!(kettle.title.as_deref(), Some("Electric Kettle"));

        let uk = products
            .iter()
            .find(|p| p.identity.marketplace == "amazon.co.uk")
            .expect("uk product registered");
        assert_eq!(uk.observations, 0);
        assert!(uk.latest_price_minor.is_none());
        assert!(uk.last_seen.is_none());
        assert_eq!(uk.page_url(), "https://www.amazon.co.uk/dp/B0000000UK");
    }

    #[test]
    fn test_product_url_keeps_scheme() {
        let db = open_test_db();
        let local = ProductIdentity::new("127.0.0.1:8080", "B000TEST01");
        db.set_product_url(&local, "http://127.0.0.1:8080/dp/B000TEST01")
            .unwrap();
        db.set_product_url(&local, "http://127.0.0.1:8080/dp/B000TEST01")
            .unwrap();

        let products = db.tracked_products().unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].page_url(), "http://127.0.0.1:8080/dp/B000TEST01");
    }

    #[test]
    fn test_rules_round_trip() {
        let db = open_test_db();
        let below = db
            .add_rule(&identity(), &AlertKind::PriceBelow, Some(2500), Some("USD"))
            .unwrap();
        let stock = db
            .add_rule(&identity(), &AlertKind::BackInStock, None, None)
            .unwrap();
        let other = ProductIdentity::new("amazon.de", "B000000DE1");
        db.add_rule(&other, &AlertKind::PriceDropPercent, Some(10), None)
            .unwrap();

        let rules = db.read_rules(&identity()).unwrap();
        assert_eq!(rules, vec![below.clone(), stock]);
        assert_eq!(rules[0].currency.as_deref(), Some("USD"));
        assert_eq!(db.list_rules(None).unwrap().len(), 3);

        assert!(db.remove_rule(below.id).unwrap());
        assert!(!db.remove_rule(below.id).unwrap());
        assert_eq!(db.read_rules(&identity()).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_rule_kind_is_preserved() {
        let db = open_test_db();
        let kind = AlertKind::Unrecognized("price_above".to_string());
        db.add_rule(&identity(), &kind, Some(100), None).unwrap();
        let rules = db.read_rules(&identity()).unwrap();
        assert_eq!(rules[0].kind, kind);
    }

    #[test]
    fn test_meta_round_trip() {
        let db = open_test_db();
        assert!(db.get_meta("last_poll_at").unwrap().is_none());
        db.set_meta("last_poll_at", "2024-06-01T12:00:00Z").unwrap();
        db.set_meta("last_poll_at", "2024-06-01T13:00:00Z").unwrap();
        assert_eq!(
            db.get_meta("last_poll_at").unwrap().as_deref(),
            Some("2024-06-01T13:00:00Z")
        );
    }

    #[test]
    fn test_time_format_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let late = early + Duration::nanoseconds(1);
        assert!(format_time(early) < format_time(late));
        assert_eq!(parse_time(&format_time(late)).unwrap(), late);
    }
}
