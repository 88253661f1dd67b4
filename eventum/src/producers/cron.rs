//! Cron producer: fires at every moment a cron expression matches within `[start, end]`,
//! emitting `count` copies of each fire (§4.1 "Cron").

use super::{EmitSink, Producer, TimeRange};
use crate::model::{ProducerId, Tags, Timestamp};
use crate::time::{Bounds, Mode};
use crate::Error;
use async_trait::async_trait;
use chrono::TimeZone;
use cron::Schedule;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{debug, warn};

/// Validated `cron` producer configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct CronConfig {
    /// Seconds-precision cron expression (six fields).
    pub expression: String,
    /// Number of copies emitted per fire. Must be `> 0`.
    pub count: usize,
    /// Time range fields, common to every producer.
    #[serde(flatten)]
    pub range: TimeRange,
    /// Tags attached to every emission.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Cron-driven timestamp producer.
pub struct CronProducer {
    id: ProducerId,
    tags: Tags,
    schedule: Schedule,
    count: usize,
    bounds: Bounds,
}

/// The `cron` crate requires a leading seconds field; standard 5-field unix cron expressions
/// (minute hour day-of-month month day-of-week) are accepted by prepending `"0 "`.
fn normalize_expression(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

impl CronProducer {
    /// Validates `config` and builds a producer. Rejects a malformed cron expression, a
    /// non-positive `count`, or a reversed/open-ended (in sample mode) range.
    pub fn new(id: ProducerId, config: CronConfig, mode: Mode) -> Result<Self, Error> {
        if config.count == 0 {
            return Err(Error::Configuration("cron.count must be > 0".into()));
        }
        let normalized = normalize_expression(&config.expression);
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| Error::Configuration(format!("invalid cron expression: {e}")))?;
        let bounds = Bounds::resolve(config.range.start.as_deref(), config.range.end.as_deref(), mode)?;

        Ok(CronProducer {
            id,
            tags: Arc::new(config.tags),
            schedule,
            count: config.count,
            bounds,
        })
    }

    fn fires_in_range(&self) -> Vec<Timestamp> {
        let start = chrono::Utc.timestamp_micros(self.bounds.start.as_micros()).unwrap();
        let end = self.bounds.end.map(|e| chrono::Utc.timestamp_micros(e.as_micros()).unwrap());

        // `Schedule::after` is exclusive of its argument; search from one microsecond before
        // `start` so a fire landing exactly on `start` is included in the range.
        let search_from = start - chrono::Duration::microseconds(1);
        let mut fires = Vec::new();
        for fire in self.schedule.after(&search_from) {
            if let Some(end) = end {
                if fire > end {
                    break;
                }
            }
            fires.push(Timestamp(fire.timestamp_micros()));
        }
        fires
    }
}

#[async_trait]
impl Producer for CronProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn tags(&self) -> Tags {
        Arc::clone(&self.tags)
    }

    fn supports_sample(&self) -> bool {
        self.bounds.end.is_some()
    }

    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let fires = self.fires_in_range();
        let mut out = Vec::with_capacity(fires.len() * self.count);
        for fire in fires {
            for _ in 0..self.count {
                out.push(fire);
            }
        }
        debug!(producer_id = self.id, count = out.len(), "cron sample generated");
        sink.emit(out).await
    }

    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        loop {
            let now = chrono::Utc::now();
            let search_from = now - chrono::Duration::microseconds(1);
            let Some(next) = self.schedule.after(&search_from).next() else {
                break;
            };
            if let Some(end) = self.bounds.end {
                if Timestamp(next.timestamp_micros()) > end {
                    break;
                }
            }
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
            sleep(TokioDuration::from_std(wait).unwrap_or_default()).await;

            let fire = Timestamp(next.timestamp_micros());
            let batch = vec![fire; self.count];
            if let Err(e) = sink.emit(batch).await {
                warn!(producer_id = self.id, error = %e, "cron producer failed to emit");
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producers::EmitSink;
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
    async fn one_minute_cron_yields_1440_fires() {
        let config = CronConfig {
            expression: "0 * * * * *".into(),
            count: 1,
            range: TimeRange {
                start: Some("2024-01-01T00:00:00Z".into()),
                end: Some("2024-01-01T23:59:59Z".into()),
            },
            tags: Vec::new(),
        };
        let mut producer = CronProducer::new(1, config, Mode::Sample).unwrap();
        let sink = Collector(Mutex::new(Vec::new()));
        producer.generate_sample(&sink).await.unwrap();
        let out = sink.0.into_inner().unwrap();
        assert_eq!(out.len(), 1440);
        assert_eq!(out.first().unwrap().to_string(), "2024-01-01T00:00:00.000000");
        assert_eq!(out.last().unwrap().to_string(), "2024-01-01T23:59:00.000000");
    }

    #[test]
    fn rejects_zero_count() {
        let config = CronConfig {
            expression: "* * * * * *".into(),
            count: 0,
            range: TimeRange::default(),
            tags: Vec::new(),
        };
        assert!(CronProducer::new(1, config, Mode::Live).is_err());
    }
}
