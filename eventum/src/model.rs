//! Core data types shared across producers, the batcher, the merger, and the event stage.
//!
//! Timestamps are stored as microseconds since the Unix epoch, naive in the pipeline's
//! configured timezone (§3: "no tz offset carried per value"). A single `i64` gives ~292,000
//! years of range at microsecond resolution, which is the representation §9 asks for
//! ("a typed array of µs-since-epoch integers").

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in time at microsecond resolution.
///
/// Ordering and equality are the natural integer ones; a stream leaving a single producer is
/// required to be non-decreasing in this order (§3 invariant).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Builds a `Timestamp` from a `chrono` naive datetime, truncating to microseconds.
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Timestamp(dt.and_utc().timestamp_micros())
    }

    /// The current wall-clock instant.
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_micros())
    }

    /// Microseconds since the Unix epoch.
    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Renders this timestamp as a naive (no offset) `chrono` datetime for presentation and
    /// template rendering.
    pub fn to_naive(self) -> NaiveDateTime {
        DateTime::from_timestamp_micros(self.0)
            .unwrap_or_default()
            .naive_utc()
    }

    /// `self + duration`.
    pub fn add(self, micros: i64) -> Self {
        Timestamp(self.0.saturating_add(micros))
    }

    /// Whether this timestamp is at or before the current wall-clock instant.
    pub fn is_past(self) -> bool {
        self.0 <= Utc::now().timestamp_micros()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_naive().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

/// Identifies a single configured producer within a run. Stable for the lifetime of the
/// pipeline; used by the live merger to tag emissions and by the event stage to look up the
/// originating producer's tag tuple.
pub type ProducerId = u32;

/// Arbitrary labels a producer attaches to its emissions. Tested by the FSM condition
/// `has_tags` (§3).
pub type Tags = std::sync::Arc<Vec<String>>;

/// A finite, ordered sequence of timestamps emitted by a single producer, optionally paired
/// with the id of the producer that emitted it (used once batches pass through the merger).
#[derive(Clone, Debug, Default)]
pub struct TimestampBatch {
    /// Ordered, non-decreasing timestamps.
    pub timestamps: Vec<Timestamp>,
    /// Parallel sequence of producer ids, present once timestamps have passed through the
    /// merger (§3: "used by the merger so the event stage can route tag sets per producer").
    pub producer_ids: Option<Vec<ProducerId>>,
}

impl TimestampBatch {
    /// Builds a batch from a single producer's output; `producer_ids` is left unset since a
    /// lone producer's tags are already known to its consumer.
    pub fn single(timestamps: Vec<Timestamp>) -> Self {
        TimestampBatch {
            timestamps,
            producer_ids: None,
        }
    }

    /// Builds a batch tagged with the producer that emitted each timestamp.
    pub fn tagged(timestamps: Vec<Timestamp>, producer_ids: Vec<ProducerId>) -> Self {
        debug_assert_eq!(timestamps.len(), producer_ids.len());
        TimestampBatch {
            timestamps,
            producer_ids: Some(producer_ids),
        }
    }

    /// Number of timestamps in the batch.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the batch carries no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Producer id for the `i`th timestamp, defaulting to `0` for single-producer batches.
    pub fn producer_id_at(&self, i: usize) -> ProducerId {
        self.producer_ids.as_ref().map(|ids| ids[i]).unwrap_or(0)
    }
}

/// A finite, ordered sequence of rendered (and possibly already-formatted) events.
pub type EventBatch = Vec<String>;
