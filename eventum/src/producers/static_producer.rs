//! Static producer: `count` identical copies of the current instant (§4.1 "Static").

use super::{EmitSink, Producer};
use crate::model::{ProducerId, Tags, Timestamp};
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Validated `static` producer configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct StaticConfig {
    /// Number of identical copies to emit. Must be `> 0`.
    pub count: usize,
    /// Tags attached to every emission.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Producer that emits `count` copies of a single instant.
pub struct StaticProducer {
    id: ProducerId,
    tags: Tags,
    count: usize,
}

impl StaticProducer {
    /// Validates `config` and builds a producer.
    pub fn new(id: ProducerId, config: StaticConfig) -> Result<Self, Error> {
        if config.count == 0 {
            return Err(Error::Configuration("static.count must be > 0".into()));
        }
        Ok(StaticProducer {
            id,
            tags: Arc::new(config.tags),
            count: config.count,
        })
    }
}

#[async_trait]
impl Producer for StaticProducer {
    fn id(&self) -> ProducerId {
        self.id
    }

    fn tags(&self) -> Tags {
        Arc::clone(&self.tags)
    }

    async fn generate_sample(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let now = Timestamp::now();
        sink.emit(vec![now; self.count]).await
    }

    async fn generate_live(&mut self, sink: &dyn EmitSink) -> Result<(), Error> {
        let now = Timestamp::now();
        sink.emit(vec![now; self.count]).await
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
    async fn emits_count_identical_copies() {
        let mut producer = StaticProducer::new(
            1,
            StaticConfig {
                count: 100,
                tags: Vec::new(),
            },
        )
        .unwrap();
        let sink = Collector(Mutex::new(Vec::new()));
        producer.generate_sample(&sink).await.unwrap();
        let out = sink.0.into_inner().unwrap();
        assert_eq!(out.len(), 100);
        assert!(out.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn rejects_zero_count() {
        assert!(StaticProducer::new(
            1,
            StaticConfig {
                count: 0,
                tags: Vec::new()
            }
        )
        .is_err());
    }
}
