use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Default number of messages buffered between ingress and the worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("dispatch queue is full (capacity {0})")]
    Full(usize),

    #[error("dispatch queue is closed")]
    Closed,

    #[error("dispatch queue capacity must be greater than zero")]
    InvalidCapacity,
}

/// A message as received from the broker, before any parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl IngressMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Create a bounded FIFO queue with a single consumer
///
/// The sender side never waits: when `capacity` messages are buffered,
/// `enqueue` fails with `QueueError::Full` and the message is dropped by the caller.
pub fn dispatch_queue(
    capacity: usize,
) -> Result<(DispatchQueueSender, DispatchQueueReceiver), QueueError> {
    if capacity == 0 {
        return Err(QueueError::InvalidCapacity);
    }

    let (tx, rx) = mpsc::channel(capacity);
    Ok((
        DispatchQueueSender { tx, capacity },
        DispatchQueueReceiver { rx },
    ))
}

/// Ingress-side handle; cheap to clone
#[derive(Debug, Clone)]
pub struct DispatchQueueSender {
    tx: mpsc::Sender<IngressMessage>,
    capacity: usize,
}

impl DispatchQueueSender {
    pub fn enqueue(&self, message: IngressMessage) -> Result<(), QueueError> {
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::Full(self.capacity),
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Number of messages currently buffered
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Worker-side handle; there is exactly one
#[derive(Debug)]
pub struct DispatchQueueReceiver {
    rx: mpsc::Receiver<IngressMessage>,
}

impl DispatchQueueReceiver {
    /// Wait for the next message
    ///
    /// Returns `None` once `token` is cancelled or every sender is gone.
    /// Cancellation is checked first, so nothing is dequeued after it fires.
    pub async fn dequeue(&mut self, token: &CancellationToken) -> Option<IngressMessage> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(n: u8) -> IngressMessage {
        IngressMessage::new("FCTS/INGRESS/ENRICH", vec![n])
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(dispatch_queue(0).unwrap_err(), QueueError::InvalidCapacity);
    }

    #[tokio::test]
    async fn test_enqueue_fails_when_full_and_recovers_after_dequeue() {
        let (tx, mut rx) = dispatch_queue(3).unwrap();
        let token = CancellationToken::new();

        for n in 0..3 {
            assert!(tx.enqueue(message(n)).is_ok());
        }
        assert_eq!(tx.len(), 3);
        assert_eq!(tx.enqueue(message(3)), Err(QueueError::Full(3)));

        let first = rx.dequeue(&token).await.unwrap();
        assert_eq!(first, message(0));

        assert!(tx.enqueue(message(4)).is_ok());
        assert_eq!(tx.enqueue(message(5)), Err(QueueError::Full(3)));
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let (tx, mut rx) = dispatch_queue(DEFAULT_QUEUE_CAPACITY).unwrap();
        let token = CancellationToken::new();

        for n in 0..5 {
            tx.enqueue(message(n)).unwrap();
        }

        for n in 0..5 {
            assert_eq!(rx.dequeue(&token).await, Some(message(n)));
        }
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_after_cancellation_even_with_items() {
        let (tx, mut rx) = dispatch_queue(10).unwrap();
        let token = CancellationToken::new();

        tx.enqueue(message(1)).unwrap();
        token.cancel();

        assert_eq!(rx.dequeue(&token).await, None);
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_item() {
        let (tx, mut rx) = dispatch_queue(10).unwrap();
        let token = CancellationToken::new();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.enqueue(message(9)).unwrap();
        });

        assert_eq!(rx.dequeue(&token).await, Some(message(9)));
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped_is_closed() {
        let (tx, rx) = dispatch_queue(10).unwrap();
        drop(rx);

        assert_eq!(tx.enqueue(message(1)), Err(QueueError::Closed));
    }
}
