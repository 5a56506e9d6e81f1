//! Bounded outbound queue owned by one connection.
//!
//! Any task may enqueue (the broadcast engine, the connection's own reader
//! for replies); only the connection's writer loop dequeues. Enqueue never
//! waits: a full mailbox hands the message straight back.

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// Why a message was not accepted. The message is returned to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError {
    Full(Bytes),
    Closed(Bytes),
}

impl EnqueueError {
    pub fn into_inner(self) -> Bytes {
        match self {
            EnqueueError::Full(msg) | EnqueueError::Closed(msg) => msg,
        }
    }
}

impl From<TrySendError<Bytes>> for EnqueueError {
    fn from(err: TrySendError<Bytes>) -> Self {
        match err {
            TrySendError::Full(msg) => EnqueueError::Full(msg),
            TrySendError::Closed(msg) => EnqueueError::Closed(msg),
        }
    }
}

#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<Bytes>,
    // Single consumer: the writer loop holds this for as long as it waits
    rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl Mailbox {
    /// `capacity` must be at least one.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Append `msg` unless the mailbox is closed or already full.
    pub fn try_enqueue(&self, msg: Bytes) -> Result<(), EnqueueError> {
        self.tx.try_send(msg).map_err(EnqueueError::from)
    }

    /// Take the oldest message without waiting. Yields nothing while the
    /// writer is parked in `recv`.
    pub fn try_dequeue(&self) -> Option<Bytes> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the mailbox is closed and every remaining message
    /// has been handed out.
    pub async fn recv(&self) -> Option<Bytes> {
        self.rx.lock().await.recv().await
    }

    /// Refuse further messages. Already queued messages can still be drained.
    /// Closing twice is harmless.
    pub async fn close(&self) {
        self.rx.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn overflow_rejects_only_the_extra_message() {
        let mailbox = Mailbox::new(3);
        for msg in ["a", "b", "c"] {
            assert!(mailbox.try_enqueue(Bytes::from(msg)).is_ok());
        }
        assert_eq!(
            mailbox.try_enqueue(Bytes::from("d")),
            Err(EnqueueError::Full(Bytes::from("d")))
        );
        assert_eq!(mailbox.len(), 3);

        let drained: Vec<_> = std::iter::from_fn(|| mailbox.try_dequeue()).collect();
        assert_eq!(drained, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn closed_mailbox_refuses_messages() {
        let mailbox = Mailbox::new(1);
        mailbox.close().await;
        mailbox.close().await;
        assert!(mailbox.is_closed());
        let err = mailbox.try_enqueue(Bytes::from("late")).unwrap_err();
        assert!(matches!(err, EnqueueError::Closed(_)));
        assert_eq!(err.into_inner(), Bytes::from("late"));
    }

    #[tokio::test]
    async fn recv_drains_then_ends_after_close() {
        let mailbox = Mailbox::new(4);
        mailbox.try_enqueue(Bytes::from("x")).unwrap();
        mailbox.try_enqueue(Bytes::from("y")).unwrap();
        mailbox.close().await;

        assert_eq!(mailbox.recv().await, Some(Bytes::from("x")));
        assert_eq!(mailbox.recv().await, Some(Bytes::from("y")));
        assert_eq!(mailbox.recv().await, None);
    }

    #[tokio::test]
    async fn recv_wakes_on_enqueue_from_another_task() {
        let mailbox = Arc::new(Mailbox::new(1));
        let producer = Arc::clone(&mailbox);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.try_enqueue(Bytes::from("hello")).unwrap();
        });

        let got = tokio::time::timeout(Duration::from_secs(2), mailbox.recv())
            .await
            .expect("recv should wake up");
        assert_eq!(got, Some(Bytes::from("hello")));
    }
}
