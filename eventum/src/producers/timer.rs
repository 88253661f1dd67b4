//! Timer producer: `count` copies every `seconds` seconds, for `repeat` cycles (§4.1 "Timer").
//!
//! Fires land at `start + k * seconds` for `k = 1..=repeat`; an absent `repeat` means infinite
//! and is valid only in live mode, since sample generation requires a finite end (§4.1).

use super::{EmitSink, Producer};
use crate::model::{ProducerId, Tags, Timestamp};
use crate::time::Mode;
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

/// Validated `timer` producer configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct TimerConfig {
    /// Start instant; empty defaults per mode (now in live, min in sample).
    pub start: Option<String>,
    /// Period length in seconds. Must be `>= 0.1`.
    pub seconds: f64,
    /// Copies emitted per period. Must be `>= 1`.
    pub count: usize,
    /// Number of periods; `None` means infinite (live mode only).
    pub repeat: Option<u64>,
    /// Tags attached to every emission.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fixed-period timestamp producer.
pub struct TimerProducer {
    id: ProducerId,
    tags: Tags,
    start: Timestamp,
    period_micros: i64,
    count: usize,
    repeat: Option<u64>,
}

impl TimerProducer {
    /// Validates `config` and builds a producer.
    pub fn new(id: ProducerId, config: TimerConfig, mode: Mode) -> Result<Self, Error> {
        if config.seconds < 0.1 {
            return Err(Error::Configuration("timer.seconds must be >= 0.1".into()));
        }
        if config.count == 0 {
            return Err(Error::Configuration("timer.count must be >= 1".into()));
        }
        if config.repeat.is_none() && mode == Mode::Sample {
            return Err(Error::Configuration(
                "timer.repeat is required in sample mode (infinite repeat is live-only)".into(),
            ));
        }
        let start = crate::time::resolve_start(config.start.as_deref(), mode)?;

        Ok(TimerProducer {
            id,
            tags: Arc::new(config.tags),
            start,
            period_micros: (config.seconds * 1_000_000.0).round() as i64,
            count: config.count,
            repeat: config.repeat,
        })
    }

    fn fire_at(&self, k: u64) -> Timestamp {
        self.start.add(self.period_micros * k as i64)
    }
}

#[async_trait]
impl Producer for TimerProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn tags(&self) -> Tags {
        Arc::clone(&self.tags)
    }

    fn supports_sample(&self) -> bool {
        self.repeat.is_some()
    }

    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let repeat = self.repeat.expect("validated at construction");
        let mut out = Vec::with_capacity(repeat as usize * self.count);
        for k in 1..=repeat {
            let fire = self.fire_at(k);
            for _ in 0..self.count {
                out.push(fire);
            }
        }
        sink.emit(out).await
    }

    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let now = Timestamp::now();
        let mut k = if now > self.start {
            let elapsed = now.as_micros() - self.start.as_micros();
            (elapsed / self.period_micros).max(0) as u64 + 1
        } else {
            1
        };

        loop {
            if let Some(repeat) = self.repeat {
                if k > repeat {
                    break;
                }
            }
            let fire = self.fire_at(k);
            let now = Timestamp::now();
            if fire > now {
                let wait = TokioDuration::from_micros((fire.as_micros() - now.as_micros()) as u64);
                sleep(wait).await;
            }
            sink.emit(vec![fire; self.count]).await?;
            k += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collector(Mutex<Vec<Timestamp>>);

    #[async_trait]
    impl EmitSink for Collector {
        async fn emit(&self, timestamps: Vec<Timestamp>) -> Result<(), Error> {
            self.0.lock().unwrap().extend(timestamps);
            Ok(())
        }
    }

    #[tokio::test]
    async fn sample_generates_repeat_times_count() {
        let config = TimerConfig {
            start: Some("2024-01-01T00:00:00Z".into()),
            seconds: 1.0,
            count: 3,
            repeat: Some(86400),
            tags: Vec::new(),
        };
        let mut producer = TimerProducer::new(1, config, Mode::Sample).unwrap();
        let sink = Collector(Mutex::new(Vec::new()));
        producer.generate_sample(&sink).await.unwrap();
        let out = sink.0.into_inner().unwrap();
        assert_eq!(out.len(), 3 * 86400);
        assert_eq!(out.first().unwrap().to_string(), "2024-01-01T00:00:01.000000");
        assert_eq!(out.last().unwrap().to_string(), "2024-01-02T00:00:00.000000");
    }

    #[test]
    fn infinite_repeat_requires_live() {
        let config = TimerConfig {
            start: None,
            seconds: 1.0,
            count: 1,
            repeat: None,
            tags: Vec::new(),
        };
        assert!(TimerProducer::new(1, config, Mode::Sample).is_err());
    }
}
