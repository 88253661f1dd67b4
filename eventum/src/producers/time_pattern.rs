//! Time-pattern producer: the stochastic, oscillator-driven source (§4.1 "Time-Pattern").
//!
//! Each period of the oscillator gets an interval count drawn from `multiplier` jittered by
//! `randomizer`, then that many points are drawn from `spreader`'s distribution on `[0, 1]`,
//! sorted, scaled by the period length, and offset into the interval.

use super::{EmitSink, Producer};
use crate::model::{ProducerId, Tags, Timestamp};
use crate::time::{resolve_end, resolve_start, Mode};
use crate::Error;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution, Triangular, Uniform};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Oscillator: defines each periodic interval's length and the overall range it tiles.
#[derive(Clone, Debug, Deserialize)]
pub struct OscillatorConfig {
    /// Period length, in `unit`s.
    pub period: f64,
    /// Unit the period is expressed in.
    pub unit: OscillatorUnit,
    /// Start of the overall range.
    pub start: Option<String>,
    /// End of the overall range (`never` only valid in live mode).
    pub end: Option<String>,
}

/// Units an oscillator period may be expressed in.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OscillatorUnit {
    /// Seconds.
    S,
    /// Minutes.
    M,
    /// Hours.
    H,
    /// Days.
    D,
}

impl OscillatorUnit {
    fn seconds(self) -> f64 {
        match self {
            OscillatorUnit::S => 1.0,
            OscillatorUnit::M => 60.0,
            OscillatorUnit::H => 3600.0,
            OscillatorUnit::D => 86_400.0,
        }
    }
}

/// Multiplier: base event count per interval, before jitter.
#[derive(Clone, Debug, Deserialize)]
pub struct MultiplierConfig {
    /// Base count multiplier. Must be `>= 1`.
    pub ratio: f64,
}

/// Which way the randomizer is allowed to jitter the per-interval count.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RandomizerDirection {
    /// Only ever reduces the count.
    Decrease,
    /// Only ever increases the count.
    Increase,
    /// May do either.
    Mixed,
}

/// Randomizer: jitters the per-interval count drawn from `multiplier`.
#[derive(Clone, Debug, Deserialize)]
pub struct RandomizerConfig {
    /// Jitter magnitude, in `[0, 1]`.
    pub deviation: f64,
    /// Which way the jitter is allowed to move the count.
    pub direction: RandomizerDirection,
    /// Size of the precomputed jitter-factor pool, reshuffled once exhausted. Default 256.
    #[serde(default = "default_sampling")]
    pub sampling: usize,
}

fn default_sampling() -> usize {
    256
}

/// Distribution used to spread points inside an interval.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "distribution", rename_all = "snake_case")]
pub enum SpreaderDistribution {
    /// Uniform over `[0, 1]`.
    Uniform,
    /// Triangular over `[0, 1]` with the given mode.
    Triangular {
        /// Peak of the triangular distribution, in `[0, 1]`.
        mode: f64,
    },
    /// Beta distribution with the given shape parameters.
    Beta {
        /// Alpha shape parameter.
        alpha: f64,
        /// Beta shape parameter.
        beta: f64,
    },
}

/// Spreader: distributes `n` points inside each interval.
#[derive(Clone, Debug, Deserialize)]
pub struct SpreaderConfig {
    /// Distribution and its parameters.
    #[serde(flatten)]
    pub distribution: SpreaderDistribution,
}

/// A single time-pattern's full configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct TimePatternConfig {
    /// Defines each periodic interval.
    pub oscillator: OscillatorConfig,
    /// Base event count per interval.
    pub multiplier: MultiplierConfig,
    /// Jitters the per-interval count.
    pub randomizer: RandomizerConfig,
    /// Distributes points inside an interval.
    pub spreader: SpreaderConfig,
    /// Tags attached to every emission.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `time_patterns` top-level producer configuration: a pool of pattern files.
#[derive(Clone, Debug, Deserialize)]
pub struct TimePatternsPoolConfig {
    /// Absolute paths to pattern configuration files.
    pub patterns: Vec<String>,
    /// When `true`, live-mode emissions from the pool are merged through the ordered live
    /// merger (§4.3); when `false`, the unordered fast path is used and the ordering
    /// compromise described there applies (§9 Open Question 1).
    #[serde(default = "default_ordered_merging")]
    pub ordered_merging: bool,
}

fn default_ordered_merging() -> bool {
    true
}

impl TimePatternsPoolConfig {
    /// Loads every pattern file and builds one producer per pattern, with sequential ids
    /// starting at `first_id`.
    pub fn load(&self, first_id: ProducerId, mode: Mode) -> Result<Vec<TimePatternProducer>, Error> {
        self.patterns
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("unable to read time pattern file {path}: {e}"))
                })?;
                let config: TimePatternConfig = serde_yaml::from_str(&contents)?;
                TimePatternProducer::new(first_id + i as ProducerId, config, mode)
            })
            .collect()
    }
}

/// Precomputed, reshuffled-on-exhaustion pool of jitter factors.
struct FactorPool {
    factors: Vec<f64>,
    cursor: usize,
    rng: StdRng,
}

impl FactorPool {
    fn new(config: &RandomizerConfig) -> Self {
        let mut rng = StdRng::from_entropy();
        let dist = match config.direction {
            RandomizerDirection::Decrease => Uniform::new_inclusive(1.0 - config.deviation, 1.0),
            RandomizerDirection::Increase => Uniform::new_inclusive(1.0, 1.0 + config.deviation),
            RandomizerDirection::Mixed => {
                Uniform::new_inclusive(1.0 - config.deviation, 1.0 + config.deviation)
            }
        };
        let factors: Vec<f64> = (0..config.sampling.max(1)).map(|_| dist.sample(&mut rng)).collect();
        FactorPool {
            factors,
            cursor: 0,
            rng,
        }
    }

    fn next(&mut self) -> f64 {
        if self.cursor >= self.factors.len() {
            self.factors.shuffle(&mut self.rng);
            self.cursor = 0;
        }
        let v = self.factors[self.cursor];
        self.cursor += 1;
        v
    }
}

/// Stochastic, oscillator-driven timestamp producer.
pub struct TimePatternProducer {
    id: ProducerId,
    tags: Tags,
    config: TimePatternConfig,
    start: Timestamp,
    end: Option<Timestamp>,
    period_micros: i64,
    factors: FactorPool,
    rng: StdRng,
}

impl TimePatternProducer {
    /// Validates `config` and builds a producer.
    pub fn new(id: ProducerId, config: TimePatternConfig, mode: Mode) -> Result<Self, Error> {
        if config.multiplier.ratio < 1.0 {
            return Err(Error::Configuration(
                "time_pattern.multiplier.ratio must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.randomizer.deviation) {
            return Err(Error::Configuration(
                "time_pattern.randomizer.deviation must be in [0, 1]".into(),
            ));
        }
        if config.randomizer.sampling < 256 {
            return Err(Error::Configuration(
                "time_pattern.randomizer.sampling must be >= 256".into(),
            ));
        }
        let start = resolve_start(config.oscillator.start.as_deref(), mode)?;
        let end = resolve_end(config.oscillator.end.as_deref(), start, mode)?;
        if mode == Mode::Sample && end.is_none() {
            return Err(Error::Configuration(
                "time_pattern requires a finite end in sample mode".into(),
            ));
        }
        let period_micros = (config.oscillator.period * config.oscillator.unit.seconds() * 1_000_000.0).round() as i64;
        if period_micros <= 0 {
            return Err(Error::Configuration(
                "time_pattern.oscillator.period must be positive".into(),
            ));
        }

        let factors = FactorPool::new(&config.randomizer);
        Ok(TimePatternProducer {
            id,
            tags: Arc::new(config.tags.clone()),
            start,
            end,
            period_micros,
            factors,
            rng: StdRng::from_entropy(),
            config,
        })
    }

    /// Draws the `n` in-interval offsets (µs, relative to the interval start) for one interval.
    fn draw_interval_offsets(&mut self, n: usize) -> Vec<i64> {
        let mut points: Vec<f64> = match &self.config.spreader.distribution {
            SpreaderDistribution::Uniform => {
                let dist = Uniform::new(0.0f64, 1.0);
                (0..n).map(|_| dist.sample(&mut self.rng)).collect()
            }
            SpreaderDistribution::Triangular { mode } => {
                match Triangular::new(0.0, 1.0, *mode) {
                    Ok(dist) => (0..n).map(|_| dist.sample(&mut self.rng)).collect(),
                    Err(_) => (0..n).map(|_| 0.5).collect(),
                }
            }
            SpreaderDistribution::Beta { alpha, beta } => {
                match Beta::new(*alpha, *beta) {
                    Ok(dist) => (0..n).map(|_| dist.sample(&mut self.rng)).collect(),
                    Err(_) => (0..n).map(|_| 0.5).collect(),
                }
            }
        };
        points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        points
            .into_iter()
            .map(|p| (p * self.period_micros as f64).round() as i64)
            .collect()
    }

    /// Generates every interval's timestamps from `self.start` up to (and clipped at) `end`.
    fn generate_all(&mut self, end: Timestamp) -> Vec<Timestamp> {
        let mut out = Vec::new();
        let mut interval_start = self.start;
        while interval_start < end {
            let factor = self.factors.next();
            let n = (self.config.multiplier.ratio * factor).round().max(0.0) as usize;
            if n > 0 {
                let offsets = self.draw_interval_offsets(n);
                for offset in offsets {
                    let t = interval_start.add(offset);
                    if t <= end {
                        out.push(t);
                    }
                }
            }
            interval_start = interval_start.add(self.period_micros);
        }
        out
    }
}

#[async_trait]
impl Producer for TimePatternProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn tags(&self) -> Tags {
        Arc::clone(&self.tags)
    }

    fn supports_sample(&self) -> bool {
        self.end.is_some()
    }

    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let end = self.end.ok_or_else(|| {
            Error::Configuration("time_pattern requires a finite end in sample mode".into())
        })?;
        let out = self.generate_all(end);
        sink.emit(out).await
    }

    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let now = Timestamp::now();
        let horizon = self.end.unwrap_or_else(|| now.add(self.period_micros * 10));
        let all = self.generate_all(horizon);
        let (past, future) = crate::time::partition_past(&all, now);
        if !past.is_empty() {
            warn!(producer_id = self.id, dropped = past.len(), "dropped past time-pattern samples entering live mode");
        }
        sink.emit(future.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TimePatternConfig {
        TimePatternConfig {
            oscillator: OscillatorConfig {
                period: 1.0,
                unit: OscillatorUnit::H,
                start: Some("2024-01-01T00:00:00Z".into()),
                end: Some("2024-01-01T06:00:00Z".into()),
            },
            multiplier: MultiplierConfig { ratio: 10.0 },
            randomizer: RandomizerConfig {
                deviation: 0.2,
                direction: RandomizerDirection::Mixed,
                sampling: 256,
            },
            spreader: SpreaderConfig {
                distribution: SpreaderDistribution::Uniform,
            },
            tags: Vec::new(),
        }
    }

    struct Collector(std::sync::Mutex<Vec<Timestamp>>);

    #[async_trait]
    impl EmitSink for Collector {
        async fn emit(&self, timestamps: Vec<Timestamp>) -> Result<(), Error> {
            self.0.lock().unwrap().extend(timestamps);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sample_mode_stays_within_bounds_and_sorted_per_interval() {
        let mut producer = TimePatternProducer::new(1, base_config(), Mode::Sample).unwrap();
        let sink = Collector(std::sync::Mutex::new(Vec::new()));
        producer.generate_sample(&sink).await.unwrap();
        let out = sink.0.into_inner().unwrap();
        assert!(!out.is_empty());
        let start = Timestamp(chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().timestamp_micros());
        let end = Timestamp(chrono::DateTime::parse_from_rfc3339("2024-01-01T06:00:00Z").unwrap().timestamp_micros());
        assert!(out.iter().all(|t| *t >= start && *t <= end));
    }

    #[test]
    fn rejects_sub_unity_ratio() {
        let mut cfg = base_config();
        cfg.multiplier.ratio = 0.5;
        assert!(TimePatternProducer::new(1, cfg, Mode::Sample).is_err());
    }

    #[test]
    fn rejects_deviation_out_of_range() {
        let mut cfg = base_config();
        cfg.randomizer.deviation = 1.5;
        assert!(TimePatternProducer::new(1, cfg, Mode::Sample).is_err());
    }

    #[test]
    fn rejects_sampling_below_256() {
        let mut cfg = base_config();
        cfg.randomizer.sampling = 32;
        assert!(TimePatternProducer::new(1, cfg, Mode::Sample).is_err());
    }
}
