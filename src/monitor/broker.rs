//! Fan-out of reports to live subscribers.

use crate::report::Report;

use futures_core::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type ReportSender = mpsc::UnboundedSender<Arc<Report>>;

#[derive(Default)]
struct Subscribers {
    open: bool,
    senders: HashMap<u64, ReportSender>,
}

#[derive(Default)]
struct BrokerInner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publish/subscribe hub for reports.
///
/// Each subscriber has its own unbounded queue, so a slow reader never
/// loses reports and never holds up the others.
#[derive(Default)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept new subscriptions.
    pub fn open(&self) {
        self.inner.lock().open = true;
    }

    /// Open the broker if `admit` returns true, with subscriptions held off
    /// until both have happened.
    pub fn open_if(&self, admit: impl FnOnce() -> bool) -> bool {
        let mut subs = self.inner.lock();
        if !admit() {
            return false;
        }
        subs.open = true;
        true
    }

    /// Finish every subscription and refuse new ones.
    pub fn close(&self) {
        self.close_then(|| {});
    }

    /// Close the broker and run `after` before any new subscription or
    /// [`Broker::open_if`] can observe the closed state.
    pub fn close_then(&self, after: impl FnOnce()) {
        let mut subs = self.inner.lock();
        subs.open = false;
        let count = subs.senders.len();
        subs.senders.clear();
        after();
        tracing::debug!("Broker: closed {} subscriptions", count);
    }

    /// Register a new subscriber. A closed broker hands out a subscription
    /// that has already completed.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subs = self.inner.lock();
        if subs.open {
            subs.senders.insert(id, tx);
        }

        Subscription {
            id,
            rx,
            broker: Arc::downgrade(&self.inner),
        }
    }

    /// Send `report` to every subscriber. Returns how many received it.
    pub fn publish(&self, report: Arc<Report>) -> usize {
        let mut subs = self.inner.lock();
        subs.senders.retain(|_, tx| tx.send(report.clone()).is_ok());
        subs.senders.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

/// A live sequence of reports, in publication order.
///
/// Ends when the monitor stops. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<Report>>,
    broker: Weak<BrokerInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next report, or `None` once the stream has completed.
    pub async fn recv(&mut self) -> Option<Arc<Report>> {
        self.rx.recv().await
    }

    /// Stop receiving reports.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.broker.upgrade() {
            inner.lock().senders.remove(&self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = Arc<Report>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
