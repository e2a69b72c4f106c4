//! Ordered broadcast stream of [`DriftEvent`]s.
//!
//! Uses [`tokio::sync::broadcast`] so every subscriber sees every event in
//! publication order and a slow subscriber never stalls the frame loop: it
//! lags and loses the oldest events instead.
//!
//! Publishing never blocks and never fails.  With nobody listening the
//! event is simply dropped; the retained [`DriftLog`][crate::DriftLog] is
//! the place to look afterwards.

use rigwarden_types::{DriftEvent, DriftKind};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Shared diagnostics bus. Clone it cheaply – all clones share the same
/// underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct DiagnosticsBus {
    sender: broadcast::Sender<DriftEvent>,
}

impl DiagnosticsBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event`.  Returns the number of subscribers it was handed to;
    /// `0` when nobody is listening.
    pub fn publish(&self, event: DriftEvent) -> usize {
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(node = %event.node, "drift event dropped: no subscribers");
                0
            }
        }
    }

    /// Subscribe to every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DriftEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events of a single [`DriftKind`].
    pub fn subscribe_kind(&self, kind: DriftKind) -> KindSubscriber {
        KindSubscriber {
            kind,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for DiagnosticsBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Kind-filtered subscriber
// ---------------------------------------------------------------------------

/// A subscriber that only delivers events of one [`DriftKind`].
pub struct KindSubscriber {
    kind: DriftKind,
    receiver: broadcast::Receiver<DriftEvent>,
}

impl KindSubscriber {
    /// Wait for the next matching event.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn recv(&mut self) -> Option<DriftEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.kind == self.kind => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(kind = ?self.kind, lagged_by = n, "diagnostics subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`KindSubscriber::recv`] for frame-stepped
    /// consumers.  Returns `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Option<DriftEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.kind == self.kind => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(kind = ?self.kind, lagged_by = n, "diagnostics subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    pub fn kind(&self) -> DriftKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(node: &str, kind: DriftKind) -> DriftEvent {
        DriftEvent::new(1, node, kind, Some(0.3), 0.2)
    }

    #[tokio::test]
    async fn publish_and_receive_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = DiagnosticsBus::default();
        let mut rx = bus.subscribe();

        let first = event("head", DriftKind::Ownership);
        let second = event("avatar_chest", DriftKind::Magnitude);
        assert_eq!(bus.publish(first.clone()), 1);
        bus.publish(second.clone());

        assert_eq!(rx.recv().await?.id, first.id);
        assert_eq!(rx.recv().await?.id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = DiagnosticsBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let e = event("head", DriftKind::Invalid);
        assert_eq!(bus.publish(e.clone()), 2);

        assert_eq!(rx1.recv().await?.id, e.id);
        assert_eq!(rx2.recv().await?.id, e.id);
        Ok(())
    }

    #[tokio::test]
    async fn kind_subscriber_filters() {
        let bus = DiagnosticsBus::default();
        let mut missing = bus.subscribe_kind(DriftKind::Missing);

        bus.publish(event("head", DriftKind::Magnitude));
        let wanted = event("avatar_hips", DriftKind::Missing);
        bus.publish(wanted.clone());

        let received = missing.recv().await.expect("missing event delivered");
        assert_eq!(received.id, wanted.id);
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = DiagnosticsBus::default();
        assert_eq!(bus.publish(event("head", DriftKind::Magnitude)), 0);
    }

    #[test]
    fn try_recv_drains_without_blocking() {
        let bus = DiagnosticsBus::default();
        let mut ownership = bus.subscribe_kind(DriftKind::Ownership);
        assert!(ownership.try_recv().is_none());

        bus.publish(event("head", DriftKind::Invalid));
        bus.publish(event("head", DriftKind::Ownership));
        assert_eq!(ownership.try_recv().map(|e| e.kind), Some(DriftKind::Ownership));
        assert!(ownership.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = DiagnosticsBus::new(8);
        let mut slow = bus.subscribe();
        for _ in 0..100 {
            bus.publish(event("head", DriftKind::Magnitude));
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
