//! Delivery of fired alert events.

use tokio::sync::mpsc;

use crate::model::AlertEvent;

/// Receives every alert event a tracking cycle produces.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AlertEvent);
}

/// Logs events at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &AlertEvent) {
        tracing::info!(
            "ALERT [{} #{}] {}: {}",
            event.rule.kind,
            event.rule.id,
            event.identity,
            event.reason
        );
    }
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &AlertEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::warn!("Alert receiver dropped; discarding alert for {}", event.identity);
        }
    }
}

/// Sends each event to every inner notifier in order.
#[derive(Default)]
pub struct FanoutNotifier {
    inner: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.inner.push(Box::new(notifier));
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, event: &AlertEvent) {
        for notifier in &self.inner {
            notifier.notify(event);
        }
    }
}
