//! Generic size+timeout batcher (§4.9): single-producer, no scheduling, no binary search.
//!
//! Collects from a channel until the buffer reaches `size` or `timeout` elapses since the first
//! item of the current batch, then flushes. Used by the event unit to shape rendered events into
//! Queue B.

use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Batches items pulled from an `flume::Receiver` by size or timeout, whichever comes first.
pub struct GenericBatcher<T> {
    input: flume::Receiver<T>,
    size: usize,
    timeout: Duration,
    closed: bool,
}

impl<T> GenericBatcher<T> {
    /// Builds a batcher over `input`, flushing every `size` items or `timeout` since the first
    /// item of the current batch, whichever comes first.
    pub fn new(input: flume::Receiver<T>, size: usize, timeout: Duration) -> Self {
        GenericBatcher {
            input,
            size: size.max(1),
            timeout,
            closed: false,
        }
    }

    /// Pulls the next batch, or `None` once the input has closed and any remainder has already
    /// been returned.
    pub async fn next_batch(&mut self) -> Option<Vec<T>> {
        if self.closed {
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        let mut batch = Vec::with_capacity(self.size);

        while batch.len() < self.size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.input.recv_async()).await {
                Ok(Ok(item)) => batch.push(item),
                Ok(Err(_)) => {
                    self.closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flushes_on_size() {
        let (tx, rx) = flume::unbounded();
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        let mut batcher = GenericBatcher::new(rx, 3, Duration::from_secs(5));
        let first = batcher.next_batch().await.unwrap();
        assert_eq!(first, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn flushes_on_timeout() {
        let (tx, rx) = flume::unbounded();
        tx.send(1).unwrap();
        let mut batcher = GenericBatcher::new(rx, 100, Duration::from_millis(20));
        let batch = batcher.next_batch().await.unwrap();
        assert_eq!(batch, vec![1]);
    }

    #[tokio::test]
    async fn flushes_remainder_on_close_then_terminates() {
        let (tx, rx) = flume::unbounded();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        drop(tx);
        let mut batcher = GenericBatcher::new(rx, 100, Duration::from_secs(5));
        let batch = batcher.next_batch().await.unwrap();
        assert_eq!(batch, vec![1, 2]);
        assert!(batcher.next_batch().await.is_none());
    }
}
