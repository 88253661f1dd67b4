//! Timestamp producers (§4.1): pluggable sources of timestamps, one module per kind.
//!
//! Every producer implements [`Producer`], which exposes `generate_sample`/`generate_live` and
//! pushes its output through an [`EmitSink`] — either straight into the
//! [`crate::batcher::TimestampsBatcher`] feeding Queue A, or into the live merger's collection
//! channel when several producers share a run.

mod cron;
mod linspace;
pub mod merger;
mod static_producer;
mod time_pattern;
mod timer;
mod timestamps;

pub use cron::{CronConfig, CronProducer};
pub use linspace::{LinspaceConfig, LinspaceProducer};
pub use merger::run_merged;
pub use static_producer::{StaticConfig, StaticProducer};
pub use time_pattern::{
    MultiplierConfig, OscillatorConfig, RandomizerConfig, RandomizerDirection, SpreaderConfig,
    SpreaderDistribution, TimePatternConfig, TimePatternProducer, TimePatternsPoolConfig,
};
pub use timer::{TimerConfig, TimerProducer};
pub use timestamps::{TimestampsConfig, TimestampsProducer};

use crate::model::{ProducerId, Tags, Timestamp};
use crate::time::Mode;
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;

/// Sink that a producer pushes freshly generated timestamps into. Implementations decide what
/// happens next: bounded queuing through the timestamps batcher, or collection for the live
/// merger's k-way merge.
#[async_trait]
pub trait EmitSink: Send + Sync {
    /// Accepts a non-decreasing slice of timestamps from a single producer.
    async fn emit(&self, timestamps: Vec<Timestamp>) -> Result<(), Error>;
}

/// Sink for the live merger's output: a globally ordered stream still tagged with which producer
/// emitted each timestamp, so the event stage can route tag sets per producer (§3 "Tags").
#[async_trait]
pub trait TaggedEmitSink: Send + Sync {
    /// Accepts a non-decreasing, `(timestamp, producer_id)`-tagged slice.
    async fn emit_tagged(&self, items: Vec<(Timestamp, ProducerId)>) -> Result<(), Error>;
}

/// A timestamp producer: the contract every `cron`/`linspace`/`static`/`timer`/`timestamps`/
/// `time_patterns` implementation satisfies (§4.1).
#[async_trait]
pub trait Producer: Send {
    /// This producer's unique id within the run.
    fn id(&self) -> ProducerId;

    /// Tags attached to every timestamp this producer emits, exposed to FSM's `has_tags`.
    fn tags(&self) -> Tags;

    /// Whether this producer can run in sample mode. Configurations with an open-ended range
    /// are rejected for producers that require a finite end in sample mode (enforced at
    /// construction, not here).
    fn supports_sample(&self) -> bool {
        true
    }

    /// Whether this producer can run in live mode.
    fn supports_live(&self) -> bool {
        true
    }

    /// Enumerates the full range as fast as possible and pushes it to `sink`.
    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error>;

    /// Releases timestamps as their wall-clock value is reached.
    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error>;

    /// Dispatches to [`Producer::generate_sample`] or [`Producer::generate_live`] per `mode`.
    async fn generate(&mut self, mode: Mode, sink: &dyn EmitSink) -> Result<(), Error> {
        match mode {
            Mode::Sample => self.generate_sample(sink).await,
            Mode::Live => self.generate_live(sink).await,
        }
    }
}

/// Common `start`/`end` fields shared by every producer kind.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct TimeRange {
    /// Absolute datetime, human expression, relative expression, or empty (defaults per mode).
    pub start: Option<String>,
    /// Absolute datetime, human expression, relative expression, or the literal `never`.
    pub end: Option<String>,
}

/// Tagged union of the six producer kinds, matching the `input:` section of the configuration
/// schema (§6). Exactly one variant is present in a valid configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerSpec {
    /// Cron-scheduled timestamps.
    Cron(CronConfig),
    /// Equally spaced timestamps over a range.
    Linspace(LinspaceConfig),
    /// Repeated copies of the current instant.
    Static(StaticConfig),
    /// Periodic timestamps at a fixed interval.
    Timer(TimerConfig),
    /// An explicit, in-config or file-backed list of timestamps.
    Timestamps(TimestampsConfig),
    /// Stochastic, oscillator-driven time patterns.
    TimePatterns(TimePatternsPoolConfig),
}

impl ProducerSpec {
    /// Instantiates this spec's producer(s) for `mode`. Every kind but `time_patterns` yields
    /// exactly one producer with id `0`; a `time_patterns` pool yields one producer per pattern
    /// file, ids `0..N`. The second return value is whether the input unit should route this
    /// spec's live output through the ordered merger (always `true` except a `time_patterns`
    /// pool configured with `ordered_merging: false`, §4.1 Open Question 1).
    pub fn build(&self, mode: Mode) -> Result<(Vec<Box<dyn Producer>>, bool), Error> {
        match self {
            ProducerSpec::Cron(c) => {
                Ok((vec![Box::new(CronProducer::new(0, c.clone(), mode)?)], true))
            }
            ProducerSpec::Linspace(c) => {
                Ok((vec![Box::new(LinspaceProducer::new(0, c.clone(), mode)?)], true))
            }
            ProducerSpec::Static(c) => Ok((vec![Box::new(StaticProducer::new(0, c.clone())?)], true)),
            ProducerSpec::Timer(c) => {
                Ok((vec![Box::new(TimerProducer::new(0, c.clone(), mode)?)], true))
            }
            ProducerSpec::Timestamps(c) => {
                Ok((vec![Box::new(TimestampsProducer::new(0, c.clone())?)], true))
            }
            ProducerSpec::TimePatterns(pool) => {
                let producers = pool.load(0, mode)?;
                let ordered = pool.ordered_merging;
                let boxed = producers
                    .into_iter()
                    .map(|p| Box::new(p) as Box<dyn Producer>)
                    .collect();
                Ok((boxed, ordered))
            }
        }
    }
}
