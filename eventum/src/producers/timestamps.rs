//! Timestamps producer: an explicit, in-config list or a newline-delimited file of ISO-8601
//! timestamps (§4.1 "Timestamps (explicit list)").

use super::{EmitSink, Producer};
use crate::model::{ProducerId, Tags, Timestamp};
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Either an inline list of ISO-8601 strings, or an absolute path to a newline-delimited file
/// of the same.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TimestampsSource {
    /// Timestamps given directly in the configuration.
    Inline(Vec<String>),
    /// Absolute path to a file with one ISO-8601 timestamp per line.
    File(String),
}

/// Validated `timestamps` producer configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct TimestampsConfig {
    /// Source of timestamps.
    pub source: TimestampsSource,
    /// Tags attached to every emission.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Producer backed by an explicit list of timestamps.
pub struct TimestampsProducer {
    id: ProducerId,
    tags: Tags,
    timestamps: Vec<Timestamp>,
}

impl TimestampsProducer {
    /// Validates `config`, loading and parsing the file source if given, and builds a producer.
    /// An unreadable file or an unparsable timestamp is a fatal configuration error (§4.1
    /// "Failure modes").
    pub fn new(id: ProducerId, config: TimestampsConfig) -> Result<Self, Error> {
        let raw: Vec<String> = match &config.source {
            TimestampsSource::Inline(v) => v.clone(),
            TimestampsSource::File(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("unable to read timestamps file {path}: {e}"))
                })?;
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            }
        };

        let mut timestamps: Vec<Timestamp> = raw
            .iter()
            .map(|s| {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|dt| Timestamp(dt.timestamp_micros()))
                    .or_else(|_| {
                        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                            .map(Timestamp::from_naive)
                    })
                    .map_err(|e| Error::Configuration(format!("invalid timestamp {s}: {e}")))
            })
            .collect::<Result<_, _>>()?;
        timestamps.sort();

        Ok(TimestampsProducer {
            id,
            tags: Arc::new(config.tags),
            timestamps,
        })
    }
}

#[async_trait]
impl Producer for TimestampsProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn tags(&self) -> Tags {
        Arc::clone(&self.tags)
    }

    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        sink.emit(self.timestamps.clone()).await
    }

    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let now = Timestamp::now();
        let future: Vec<Timestamp> = self
            .timestamps
            .iter()
            .copied()
            .filter(|t| *t > now)
            .collect();
        sink.emit(future).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    struct Collector(Mutex<Vec<Timestamp>>);

    #[async_trait]
    impl EmitSink for Collector {
        async fn emit(&self, timestamps: Vec<Timestamp>) -> Result<(), Error> {
            self.0.lock().unwrap().extend(timestamps);
            Ok(())
        }
    }

    fn rfc3339(dt: chrono::DateTime<chrono::Utc>) -> String {
        dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }

    #[tokio::test]
    async fn live_mode_drops_past_items() {
        let now = chrono::Utc::now();
        let config = TimestampsConfig {
            source: TimestampsSource::Inline(vec![
                rfc3339(now - Duration::seconds(1)),
                rfc3339(now + Duration::milliseconds(300)),
                rfc3339(now + Duration::milliseconds(500)),
            ]),
            tags: Vec::new(),
        };
        let mut producer = TimestampsProducer::new(1, config).unwrap();
        let sink = Collector(Mutex::new(Vec::new()));
        producer.generate_live(&sink).await.unwrap();
        let out = sink.0.into_inner().unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn rejects_unreadable_file() {
        let config = TimestampsConfig {
            source: TimestampsSource::File("/nonexistent/path.txt".into()),
            tags: Vec::new(),
        };
        assert!(TimestampsProducer::new(1, config).is_err());
    }
}
