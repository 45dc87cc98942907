use std::sync::Arc;
use std::time::Duration;

use pricewatch_lib::{
    AlertKind, ChannelNotifier, DomainAllowList, Extractor, FetchConfig, FetchError, Fetcher,
    MemoryStore, PipelineError, PriceStore, PriceWatch, ProductIdentity, ProxyPool, Stage,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT: &str = include_str!("fixtures/product.html");
const LEGACY_PRODUCT: &str = include_str!("fixtures/legacy_product.html");
const ROBOT_CHECK: &str = include_str!("fixtures/robot_check.html");

const ASIN: &str = "B08N5WRWNW";

fn product_page(price: &str, availability: &str) -> String {
    PRODUCT
        .replace("{{PRICE}}", price)
        .replace("{{AVAILABILITY}}", availability)
}

fn fast_config() -> FetchConfig {
    FetchConfig {
        max_attempts: 3,
        timeout: Duration::from_millis(500),
        backoff_base: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        backoff_max: Duration::from_millis(50),
        jitter: false,
    }
}

struct Harness {
    server: MockServer,
    store: Arc<MemoryStore>,
    watch: Arc<PriceWatch>,
    alerts: tokio::sync::mpsc::UnboundedReceiver<pricewatch_lib::AlertEvent>,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        let (notifier, alerts) = ChannelNotifier::new();
        let watch = Arc::new(PriceWatch::new(
            Fetcher::new(fast_config(), ProxyPool::direct()),
            Extractor::amazon().unwrap(),
            store.clone(),
            Arc::new(notifier),
            DomainAllowList::new(&["127.0.0.1"]).unwrap(),
        ));
        Self {
            server,
            store,
            watch,
            alerts,
        }
    }

    fn url(&self) -> String {
        format!("{}/Electric-Kettle/dp/{}?th=1", self.server.uri(), ASIN)
    }

    fn identity(&self) -> ProductIdentity {
        ProductIdentity::from_url(&self.url().parse().unwrap()).unwrap()
    }

    /// Replaces every mounted response with `body`.
    async fn serve(&self, status: u16, body: String) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(format!("/Electric-Kettle/dp/{}", ASIN)))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    fn drain_alerts(&mut self) -> Vec<pricewatch_lib::AlertEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.alerts.try_recv() {
            events.push(event);
        }
        events
    }
}

#[tokio::test]
async fn track_product_records_normalized_snapshot() {
    let h = Harness::start().await;
    h.serve(200, product_page("$29.99", "In Stock")).await;

    let snapshot = h.watch.track_product(&h.url()).await.unwrap();

    assert_eq!(snapshot.identity.product_id, ASIN);
    assert_eq!(snapshot.title, "Electric Kettle 1.7L, Stainless Steel");
    assert_eq!(snapshot.price_minor, 2999);
    assert_eq!(snapshot.currency, "USD");
    assert_eq!(snapshot.rating, Some(4.6));
    assert_eq!(snapshot.review_count, Some(1204));
    assert_eq!(
        snapshot.image_url.as_deref(),
        Some("https://m.media-amazon.com/images/I/kettle._AC_SL1500_.jpg")
    );
    assert!(snapshot.in_stock);

    let history = h.store.read_history(&h.identity()).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.latest(), Some(&snapshot));
}

#[tokio::test]
async fn unchanged_page_is_recorded_once() {
    let h = Harness::start().await;
    h.serve(200, product_page("$29.99", "In Stock")).await;

    let first = h.watch.track(&h.url()).await.unwrap();
    let second = h.watch.track(&h.url()).await.unwrap();

    assert!(first.appended);
    assert!(!second.appended);
    assert_eq!(h.store.read_history(&h.identity()).unwrap().len(), 1);
}

#[tokio::test]
async fn price_below_alert_fires_once_on_crossing() {
    let mut h = Harness::start().await;
    let rule = h
        .store
        .add_rule(&h.identity(), AlertKind::PriceBelow, Some(9000), Some("USD"));

    let mut fired = Vec::new();
    for price in ["$100.00", "$100.00", "$80.00"] {
        h.serve(200, product_page(price, "In Stock")).await;
        let outcome = h.watch.track(&h.url()).await.unwrap();
        fired.push(outcome.alerts.len());
    }

    assert_eq!(fired, vec![0, 0, 1]);
    let events = h.drain_alerts();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].rule, rule);
    assert_eq!(events[0].triggering_snapshot.price_minor, 8000);
    assert_eq!(h.store.read_history(&h.identity()).unwrap().len(), 2);

    // Staying under the threshold does not alert again.
    h.serve(200, product_page("$75.00", "In Stock")).await;
    let outcome = h.watch.track(&h.url()).await.unwrap();
    assert!(outcome.appended);
    assert!(outcome.alerts.is_empty());
}

#[tokio::test]
async fn back_in_stock_alert() {
    let mut h = Harness::start().await;
    h.store
        .add_rule(&h.identity(), AlertKind::BackInStock, None, None);

    h.serve(200, product_page("$29.99", "Currently unavailable.")).await;
    let outcome = h.watch.track(&h.url()).await.unwrap();
    assert!(!outcome.snapshot.in_stock);
    assert!(outcome.alerts.is_empty());

    h.serve(200, product_page("$29.99", "Only 3 left in stock - order soon.")).await;
    let outcome = h.watch.track(&h.url()).await.unwrap();
    assert!(outcome.snapshot.in_stock);
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(h.drain_alerts().len(), 1);
}

#[tokio::test]
async fn malformed_rule_is_skipped_with_diagnostic() {
    let h = Harness::start().await;
    h.store.add_rule(
        &h.identity(),
        AlertKind::Unrecognized("price_above".to_string()),
        Some(100),
        None,
    );
    let good = h
        .store
        .add_rule(&h.identity(), AlertKind::PriceBelow, Some(5000), None);
    h.serve(200, product_page("$29.99", "In Stock")).await;

    let outcome = h.watch.track(&h.url()).await.unwrap();

    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].rule, good);
    assert_eq!(outcome.diagnostics.len(), 1);
}

#[tokio::test]
async fn empty_price_records_nothing() {
    let h = Harness::start().await;
    h.serve(200, product_page("", "In Stock")).await;

    let err = h.watch.track_product(&h.url()).await.unwrap_err();

    assert_eq!(err.stage(), Stage::Extract);
    assert_eq!(err.identity(), Some(&h.identity()));
    assert!(h.store.read_history(&h.identity()).unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_price_records_nothing() {
    let h = Harness::start().await;
    h.serve(200, product_page("See price in cart", "In Stock")).await;

    let err = h.watch.track_product(&h.url()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Validate { .. }));
    assert!(h.store.read_history(&h.identity()).unwrap().is_empty());
}

#[tokio::test]
async fn fallback_selectors_yield_same_fields() {
    let h = Harness::start().await;
    h.serve(200, LEGACY_PRODUCT.to_string()).await;

    let snapshot = h.watch.track_product(&h.url()).await.unwrap();

    assert_eq!(snapshot.title, "Cast Iron Casserole 24cm");
    assert_eq!(snapshot.price_minor, 123450);
    assert_eq!(snapshot.currency, "GBP");
    assert!(!snapshot.in_stock);
    assert_eq!(snapshot.rating, None);
}

#[tokio::test]
async fn robot_check_exhausts_retries() {
    let h = Harness::start().await;
    h.serve(200, ROBOT_CHECK.to_string()).await;

    let err = h.watch.track_product(&h.url()).await.unwrap_err();

    match err {
        PipelineError::Fetch { source, .. } => assert_eq!(source, FetchError::RobotCheck),
        other => panic!("expected fetch error, got {other:?}"),
    }
    assert_eq!(h.watch.fetcher().stats().summary().attempts, 3);
    assert!(h.store.read_history(&h.identity()).unwrap().is_empty());
}

#[tokio::test]
async fn disallowed_host_is_rejected_before_fetch() {
    let h = Harness::start().await;

    let err = h
        .watch
        .track_product("https://www.ebay.com/itm/1234")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidUrl(_)));
    assert_eq!(h.watch.fetcher().stats().summary().attempts, 0);
}

#[tokio::test]
async fn cancelled_cycle_leaves_store_untouched() {
    let h = Harness::start().await;
    h.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(product_page("$29.99", "In Stock"))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = h.watch.track_with_cancel(&h.url(), &token).await.unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { .. }));
    assert!(h.store.read_history(&h.identity()).unwrap().is_empty());
}

#[tokio::test]
async fn deadline_abandons_slow_cycle() {
    let h = Harness::start().await;
    h.server.reset().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(product_page("$29.99", "In Stock"))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&h.server)
        .await;

    let err = h
        .watch
        .track_with_deadline(&h.url(), Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { .. }));
    assert!(err.is_retryable());
    assert!(h.store.read_history(&h.identity()).unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_cycles_for_one_product_record_once() {
    let h = Harness::start().await;
    h.serve(200, product_page("$29.99", "In Stock")).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let watch = h.watch.clone();
        let url = h.url();
        handles.push(tokio::spawn(async move { watch.track(&url).await }));
    }
    let mut appended = 0;
    for handle in handles {
        // A cycle stamped earlier than one already recorded is rejected.
        if let Ok(outcome) = handle.await.unwrap() {
            appended += usize::from(outcome.appended);
        }
    }

    assert_eq!(appended, 1);
    assert_eq!(h.store.read_history(&h.identity()).unwrap().len(), 1);
}
