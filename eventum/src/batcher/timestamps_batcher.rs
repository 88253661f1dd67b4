//! Timestamps batcher (§4.2): the bounded, thread-safe queue between producers and Queue A.
//!
//! Built on `tokio::sync::Mutex` plus three `tokio::sync::Notify` instances standing in for
//! "first-item-arrived", "flush-ready", and "queue-consumed" -- `Notify` is the idiomatic async
//! equivalent of a condition variable for edge-triggered wakeups, since Tokio has no native
//! re-entrant condvar. Consumers drain [`TimestampsBatcher::next_batch`] in a loop rather than a
//! blocking iterator.

use super::MIN_BATCH_DELAY;
use crate::model::{ProducerId, Timestamp};
use crate::time::count_past;
use crate::Error;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

/// Validated configuration for a [`TimestampsBatcher`].
#[derive(Clone, Copy, Debug)]
pub struct TimestampsBatcherConfig {
    /// Batch size `S`. Default 100,000.
    pub size: usize,
    /// Maximum accumulation delay `D`. `None` disables the delay trigger.
    pub duration: Option<Duration>,
    /// Input queue capacity `Q`. Must be `>= size`.
    pub queue_capacity: usize,
    /// Scheduling mode: batch-ready conditions only count timestamps `<= now`, and a watcher
    /// polls at `MIN_BATCH_DELAY / 2` so that batches drain even without new arrivals (live
    /// mode). When `false`, readiness counts every queued timestamp regardless of wall clock.
    pub scheduling: bool,
}

impl TimestampsBatcherConfig {
    /// Builds a config, validating `size >= 1`, `duration >= 100ms` when set, at least one of
    /// `size`/`duration` set, and `queue_capacity >= size`.
    pub fn new(
        size: usize,
        duration: Option<Duration>,
        queue_capacity: usize,
        scheduling: bool,
    ) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::Configuration("batcher size must be >= 1".into()));
        }
        if let Some(d) = duration {
            if d < MIN_BATCH_DELAY {
                return Err(Error::Configuration(format!(
                    "batcher duration must be >= {MIN_BATCH_DELAY:?}"
                )));
            }
        }
        if queue_capacity < size {
            return Err(Error::Configuration(
                "batcher queue_capacity must be >= size".into(),
            ));
        }
        Ok(TimestampsBatcherConfig {
            size,
            duration,
            queue_capacity,
            scheduling,
        })
    }
}

struct Inner {
    timestamps: Vec<Timestamp>,
    producer_ids: Vec<ProducerId>,
    closed: bool,
    batch_started_at: Option<Instant>,
}

/// Bounded queue that groups timestamps into size- and delay-bounded batches, optionally
/// holding each batch until its wall-clock moment arrives.
pub struct TimestampsBatcher {
    config: TimestampsBatcherConfig,
    inner: Mutex<Inner>,
    item_arrived: Notify,
    flush_ready: Notify,
    queue_consumed: Notify,
}

impl TimestampsBatcher {
    /// Builds an empty, open batcher.
    pub fn new(config: TimestampsBatcherConfig) -> Self {
        TimestampsBatcher {
            config,
            inner: Mutex::new(Inner {
                timestamps: Vec::new(),
                producer_ids: Vec::new(),
                closed: false,
                batch_started_at: None,
            }),
            item_arrived: Notify::new(),
            flush_ready: Notify::new(),
            queue_consumed: Notify::new(),
        }
    }

    /// Appends `timestamps` (already tagged with the producer that emitted them, in
    /// non-decreasing order; the batcher never re-sorts). Blocks until there is free capacity
    /// when `block` is `true`; otherwise raises [`Error::BatcherFull`] immediately. Raises
    /// [`Error::BatcherClosed`] if called after [`TimestampsBatcher::close`].
    pub async fn add(
        &self,
        timestamps: Vec<(Timestamp, ProducerId)>,
        block: bool,
    ) -> Result<(), Error> {
        if timestamps.is_empty() {
            return Ok(());
        }
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(Error::BatcherClosed);
                }
                let free = self.config.queue_capacity.saturating_sub(inner.timestamps.len());
                if timestamps.len() <= free {
                    if inner.timestamps.is_empty() {
                        inner.batch_started_at = Some(Instant::now());
                    }
                    for (t, id) in &timestamps {
                        inner.timestamps.push(*t);
                        inner.producer_ids.push(*id);
                    }
                    drop(inner);
                    self.item_arrived.notify_waiters();
                    return Ok(());
                }
                if !block {
                    return Err(Error::BatcherFull);
                }
            }
            self.queue_consumed.notified().await;
        }
    }

    /// Marks "no more input". A subsequent drain yields any remaining partial batch and then
    /// terminates.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        drop(inner);
        self.item_arrived.notify_waiters();
        self.flush_ready.notify_waiters();
    }

    /// Returns the next ready batch, or `None` once the batcher is closed and fully drained.
    pub async fn next_batch(&self) -> Option<Vec<(Timestamp, ProducerId)>> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                let ready = if self.config.scheduling {
                    count_past(&inner.timestamps, Timestamp::now())
                } else {
                    inner.timestamps.len()
                };
                let size_ready = ready >= self.config.size;
                let duration_elapsed = self.config.duration.is_some_and(|d| {
                    inner.batch_started_at.is_some_and(|start| start.elapsed() >= d)
                });
                let closing_remainder = inner.closed && !inner.timestamps.is_empty();

                if size_ready || duration_elapsed || closing_remainder {
                    let take = if size_ready {
                        self.config.size.min(ready)
                    } else {
                        ready
                    }
                    .max(if closing_remainder { inner.timestamps.len() } else { 0 });
                    let take = take.min(inner.timestamps.len());
                    if take > 0 {
                        let batch: Vec<(Timestamp, ProducerId)> = inner
                            .timestamps
                            .drain(..take)
                            .zip(inner.producer_ids.drain(..take))
                            .collect();
                        inner.batch_started_at = if inner.timestamps.is_empty() {
                            None
                        } else {
                            Some(Instant::now())
                        };
                        drop(inner);
                        self.queue_consumed.notify_waiters();
                        return Some(batch);
                    }
                }

                if inner.closed && inner.timestamps.is_empty() {
                    return None;
                }
            }

            let poll = if self.config.scheduling {
                MIN_BATCH_DELAY / 2
            } else {
                self.config.duration.unwrap_or(Duration::from_secs(3600))
            };
            tokio::select! {
                _ = self.item_arrived.notified() => {}
                _ = self.flush_ready.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
