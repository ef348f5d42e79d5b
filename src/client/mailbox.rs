//! Bounded mailbox between inbound handlers and the notification consumer.
//!
//! Contract:
//! - `deliver` waits while the mailbox is full. Nothing is ever dropped to
//!   make room; a slow consumer throttles the remote peer instead.
//! - `recv` waits until a notification is available.
//! - Notifications from one handler keep their order. Across concurrent
//!   handlers the order is whatever order the deliveries complete in.
//!
//! The protocol client keeps a sender for its whole lifetime, so the
//! mailbox is never closed from the producing side while the client exists.

use tokio::sync::mpsc;

use super::types::InboundNotification;

/// Default number of notifications held before handlers start waiting
pub const DEFAULT_MAILBOX_CAPACITY: usize = 5;

/// Create a mailbox holding at most `capacity` notifications (minimum 1)
pub fn mailbox(capacity: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MailboxSender { tx }, Mailbox { rx })
}

/// Producing half, cloned into every inbound handler
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<InboundNotification>,
}

impl MailboxSender {
    /// Enqueue a notification, waiting while the mailbox is full.
    ///
    /// Returns `false` if the consuming half was dropped.
    pub async fn deliver(&self, notification: InboundNotification) -> bool {
        if self.tx.capacity() == 0 {
            tracing::debug!(
                max_capacity = self.tx.max_capacity(),
                "Mailbox full, waiting for the consumer"
            );
        }

        match self.tx.send(notification).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(notification)) => {
                tracing::warn!(
                    uri = %notification.uri,
                    "Mailbox consumer is gone, notification discarded"
                );
                false
            }
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consuming half, handed to the single external reader
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<InboundNotification>,
}

impl Mailbox {
    /// Wait for the next notification
    pub async fn recv(&mut self) -> Option<InboundNotification> {
        self.rx.recv().await
    }

    /// Take a notification if one is waiting
    pub fn try_recv(&mut self) -> Option<InboundNotification> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next notification from a thread outside the async runtime
    pub fn blocking_recv(&mut self) -> Option<InboundNotification> {
        self.rx.blocking_recv()
    }

    /// Number of notifications waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn notification(body: &str) -> InboundNotification {
        InboundNotification {
            remote_address: "127.0.0.1:4000".to_string(),
            uri: "/siri".to_string(),
            body: body.to_string(),
            language: "xml".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fifo_from_one_producer() {
        let (tx, mut rx) = mailbox(DEFAULT_MAILBOX_CAPACITY);

        for i in 0..3 {
            assert!(tx.deliver(notification(&i.to_string())).await);
        }

        assert_eq!(rx.len(), 3);
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().body, i.to_string());
        }
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_full_mailbox_blocks_producer() {
        let (tx, mut rx) = mailbox(1);
        assert!(tx.deliver(notification("first")).await);
        assert_eq!(tx.available(), 0);

        let pending = tokio::spawn({
            let tx = tx.clone();
            async move { tx.deliver(notification("second")).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx.recv().await.unwrap().body, "first");
        assert!(pending.await.unwrap());
        assert_eq!(rx.try_recv().unwrap().body, "second");
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let (tx, mut rx) = mailbox(0);
        assert!(tx.deliver(notification("only")).await);
        assert_eq!(rx.try_recv().unwrap().body, "only");
    }

    #[tokio::test]
    async fn test_deliver_after_consumer_dropped() {
        let (tx, rx) = mailbox(1);
        drop(rx);
        assert!(!tx.deliver(notification("lost")).await);
    }
}
