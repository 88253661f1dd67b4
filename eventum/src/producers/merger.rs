//! Live merger: combines several concurrently running producers into one globally ordered
//! `(timestamp, producer_id)` stream (§4.3).
//!
//! Each producer runs as its own worker task, pushing its batches onto a shared
//! `flume::unbounded` channel tagged with the producer's id; a worker posts [`Arrival::Done`]
//! when its producer finishes. The merger drains the channel in cycles of length `L`: whatever
//! arrives within a cycle gets k-way merged (every per-producer batch is already ascending) and
//! re-chunked to size `B` before being handed to the caller's sink. `L` is the ordering/latency
//! knob described in §4.3 — batches arriving more than `L` apart from their neighbours can come
//! out of order relative to each other.

use super::{EmitSink, Producer, TaggedEmitSink};
use crate::model::{ProducerId, Timestamp};
use crate::time::{chunk, merge_sorted, Mode};
use crate::Error;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One arrival on the merger's shared channel.
enum Arrival {
    /// A batch of timestamps from `producer_id`.
    Batch(ProducerId, Vec<Timestamp>),
    /// `producer_id` has finished generating and will post nothing further.
    Done(ProducerId),
}

/// Sink adapter handed to each producer worker: tags every emission with the producer's id and
/// forwards it to the merger's shared channel.
struct WorkerSink {
    producer_id: ProducerId,
    tx: flume::Sender<Arrival>,
}

#[async_trait::async_trait]
impl EmitSink for WorkerSink {
    async fn emit(&self, timestamps: Vec<Timestamp>) -> Result<(), Error> {
        if timestamps.is_empty() {
            return Ok(());
        }
        self.tx
            .send_async(Arrival::Batch(self.producer_id, timestamps))
            .await
            .map_err(|_| Error::UnitFailure {
                unit: "merger",
                reason: "collection channel closed".into(),
            })
    }
}

/// Runs `producers` concurrently and forwards their merged output to `sink` in chunks of `chunk_size`
/// (`0` means unbounded), flushing whatever has arrived at least every `look_ahead`.
///
/// A producer failing is logged and excluded from the remaining merge; the merger only fails
/// outright once every producer has failed or finished abnormally and there is nothing left to
/// merge, matching §4.1's "merger continues with others and logs".
pub async fn run_merged(
    mut producers: Vec<Box<dyn Producer>>,
    mode: Mode,
    look_ahead: Duration,
    chunk_size: usize,
    sink: &dyn TaggedEmitSink,
) -> Result<(), Error> {
    let (tx, rx) = flume::unbounded::<Arrival>();
    let mut pending: HashSet<ProducerId> = producers.iter().map(|p| p.id()).collect();
    let mut join_set: JoinSet<Result<(), Error>> = JoinSet::new();

    for mut producer in producers.drain(..) {
        let worker_tx = tx.clone();
        let id = producer.id();
        join_set.spawn(async move {
            let worker_sink = WorkerSink {
                producer_id: id,
                tx: worker_tx.clone(),
            };
            let result = producer.generate(mode, &worker_sink).await;
            if let Err(e) = &result {
                warn!(producer_id = id, error = %e, "producer failed, merger continues with the rest");
            }
            let _ = worker_tx.send_async(Arrival::Done(id)).await;
            result
        });
    }
    drop(tx);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        while join_set.join_next().await.is_some() {}
        let _ = done_tx.send(());
    });

    loop {
        let mut by_producer: HashMap<ProducerId, Vec<Timestamp>> = HashMap::new();
        let deadline = tokio::time::Instant::now() + look_ahead;

        loop {
            tokio::select! {
                biased;
                arrival = rx.recv_async() => {
                    match arrival {
                        Ok(Arrival::Batch(id, ts)) => {
                            by_producer.entry(id).or_default().extend(ts);
                        }
                        Ok(Arrival::Done(id)) => {
                            pending.remove(&id);
                        }
                        Err(_) => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => break,
                _ = done_rx.recv(), if pending.is_empty() => break,
            }
        }

        let streams: Vec<Vec<(Timestamp, ProducerId)>> = by_producer
            .into_iter()
            .map(|(id, timestamps)| timestamps.into_iter().map(|t| (t, id)).collect())
            .collect();
        let merged = merge_sorted(streams);
        debug!(count = merged.len(), remaining = pending.len(), "merger cycle flushed");

        for part in chunk(&merged, chunk_size) {
            sink.emit_tagged(part.to_vec()).await?;
        }

        if pending.is_empty() && rx.is_empty() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producers::{StaticConfig, StaticProducer};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Collector(Mutex<Vec<Timestamp>>);

    #[async_trait]
    impl TaggedEmitSink for Collector {
        async fn emit_tagged(&self, items: Vec<(Timestamp, ProducerId)>) -> Result<(), Error> {
            self.0.lock().unwrap().extend(items.into_iter().map(|(t, _)| t));
            Ok(())
        }
    }

    #[tokio::test]
    async fn merges_two_static_producers_in_one_cycle() {
        let a = StaticProducer::new(1, StaticConfig { count: 5, tags: Vec::new() }).unwrap();
        let b = StaticProducer::new(2, StaticConfig { count: 5, tags: Vec::new() }).unwrap();
        let producers: Vec<Box<dyn Producer>> = vec![Box::new(a), Box::new(b)];
        let sink = Collector(Mutex::new(Vec::new()));

        run_merged(producers, Mode::Sample, Duration::from_millis(50), 0, &sink)
            .await
            .unwrap();

        let out = sink.0.into_inner().unwrap();
        assert_eq!(out.len(), 10);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn respects_chunk_size() {
        let a = StaticProducer::new(1, StaticConfig { count: 7, tags: Vec::new() }).unwrap();
        let producers: Vec<Box<dyn Producer>> = vec![Box::new(a)];
        let sink = Collector(Mutex::new(Vec::new()));

        run_merged(producers, Mode::Sample, Duration::from_millis(50), 3, &sink)
            .await
            .unwrap();

        assert_eq!(sink.0.into_inner().unwrap().len(), 7);
    }
}
