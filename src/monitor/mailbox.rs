//! Single-slot queue where the newest pending item wins.

use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Holds at most one pending item. Producers never block; a push replaces
/// whatever the consumer has not picked up yet.
pub(crate) struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `item`, returning the pending item it displaced, if any.
    pub(crate) fn push(&self, item: T) -> Option<T> {
        let displaced = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(item);
        self.notify.notify_one();
        displaced
    }

    /// Wait for the next item. Cancel safe.
    pub(crate) async fn recv(&self) -> T {
        loop {
            let pending = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(item) = pending {
                return item;
            }
            self.notify.notified().await;
        }
    }
}
