//! Linspace producer: `count` equally spaced points across `[start, end]` (§4.1 "Linspace").

use super::{EmitSink, Producer, TimeRange};
use crate::model::{ProducerId, Tags, Timestamp};
use crate::time::{Bounds, Mode};
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Validated `linspace` producer configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct LinspaceConfig {
    /// Number of points to generate. Must be `>= 1`.
    pub count: usize,
    /// Whether the last point lands exactly on `end` (default `true`).
    #[serde(default = "default_endpoint")]
    pub endpoint: bool,
    /// Time range; `end` must not be `never` (linspace needs a finite range).
    #[serde(flatten)]
    pub range: TimeRange,
    /// Tags attached to every emission.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_endpoint() -> bool {
    true
}

/// Equally spaced timestamp producer.
pub struct LinspaceProducer {
    id: ProducerId,
    tags: Tags,
    count: usize,
    endpoint: bool,
    bounds: Bounds,
}

impl LinspaceProducer {
    /// Validates `config` and builds a producer.
    pub fn new(id: ProducerId, config: LinspaceConfig, mode: Mode) -> Result<Self, Error> {
        if config.count == 0 {
            return Err(Error::Configuration("linspace.count must be >= 1".into()));
        }
        let bounds = Bounds::resolve(config.range.start.as_deref(), config.range.end.as_deref(), mode)?;
        if bounds.end.is_none() {
            return Err(Error::Configuration(
                "linspace.end must not be `never`".into(),
            ));
        }
        Ok(LinspaceProducer {
            id,
            tags: Arc::new(config.tags),
            count: config.count,
            endpoint: config.endpoint,
            bounds,
        })
    }

    fn points(&self) -> Vec<Timestamp> {
        let start = self.bounds.start.as_micros();
        let end = self.bounds.end.expect("validated finite end").as_micros();
        let span = (end - start) as f64;

        if self.count == 1 {
            return vec![Timestamp(start)];
        }

        let divisor = if self.endpoint {
            (self.count - 1) as f64
        } else {
            self.count as f64
        };
        let step = span / divisor;

        (0..self.count)
            .map(|i| Timestamp(start + (step * i as f64).round() as i64))
            .collect()
    }
}

#[async_trait]
impl Producer for LinspaceProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn tags(&self) -> Tags {
        Arc::clone(&self.tags)
    }

    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let points = self.points();
        debug!(producer_id = self.id, count = points.len(), "linspace sample generated");
        sink.emit(points).await
    }

    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let points = self.points();
        let now = Timestamp::now();
        let future: Vec<Timestamp> = points.into_iter().filter(|t| *t > now).collect();
        debug!(
            producer_id = self.id,
            count = future.len(),
            "linspace live generated (past points dropped, scheduling deferred to batcher)"
        );
        sink.emit(future).await
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
    async fn three_points_without_endpoint() {
        let config = LinspaceConfig {
            count: 3,
            endpoint: false,
            range: TimeRange {
                start: Some("2024-01-01T00:00:00Z".into()),
                end: Some("2024-01-01T00:00:03Z".into()),
            },
            tags: Vec::new(),
        };
        let mut producer = LinspaceProducer::new(1, config, Mode::Sample).unwrap();
        let sink = Collector(Mutex::new(Vec::new()));
        producer.generate_sample(&sink).await.unwrap();
        let out = sink.0.into_inner().unwrap();
        let strs: Vec<String> = out.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            strs,
            vec![
                "2024-01-01T00:00:00.000000",
                "2024-01-01T00:00:01.000000",
                "2024-01-01T00:00:02.000000",
            ]
        );
    }

    #[test]
    fn rejects_never_end() {
        let config = LinspaceConfig {
            count: 3,
            endpoint: true,
            range: TimeRange {
                start: Some("2024-01-01T00:00:00Z".into()),
                end: Some("never".into()),
            },
            tags: Vec::new(),
        };
        assert!(LinspaceProducer::new(1, config, Mode::Live).is_err());
    }

    #[test]
    fn rejects_zero_count() {
        let config = LinspaceConfig {
            count: 0,
            endpoint: true,
            range: TimeRange {
                start: Some("2024-01-01T00:00:00Z".into()),
                end: Some("2024-01-01T00:00:03Z".into()),
            },
            tags: Vec::new(),
        };
        assert!(LinspaceProducer::new(1, config, Mode::Sample).is_err());
    }
}
