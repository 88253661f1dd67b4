//! Output plugins (§4.7): fan-out sinks the output unit writes rendered/formatted events to.
//!
//! Every sink shares the same `open`/`write`/`close` contract; writes may be called
//! concurrently and each implementation serialises its own I/O behind an internal async mutex,
//! matching §4.7's "Writes may be called concurrently; plugin serialises internally".

#[cfg(feature = "clickhouse")]
mod clickhouse;
mod file;
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "opensearch")]
mod opensearch;
mod stdout;

#[cfg(feature = "clickhouse")]
pub use clickhouse::ClickhouseConfig;
pub use file::{FileConfig, WriteMode};
#[cfg(feature = "http")]
pub use http::HttpConfig;
#[cfg(feature = "opensearch")]
pub use opensearch::OpensearchConfig;
pub use stdout::{Stream, StdoutConfig};

use crate::formatter::FormatterSpec;
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;

/// Common contract every output plugin satisfies (§4.7). `write` returns the count of
/// successfully delivered events, which may be less than `events.len()` for per-event-failing
/// sinks like HTTP/OpenSearch.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Acquires whatever resource this sink needs (file handle, HTTP client, ...).
    async fn open(&self) -> Result<(), Error>;

    /// Writes `events`, already formatted for this sink, returning the delivered count.
    async fn write(&self, events: &[String]) -> Result<usize, Error>;

    /// Releases this sink's resources. Idempotent.
    async fn close(&self) -> Result<(), Error>;

    /// This sink's formatter, applied by the event unit before `write` is called.
    fn formatter(&self) -> &FormatterSpec;
}

/// Tagged union of the five output kinds, matching the `output:` list entries (§6). Every
/// element carries its own `formatter`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSpec {
    File(FileConfig),
    Stdout(StdoutConfig),
    #[cfg(feature = "http")]
    Http(HttpConfig),
    #[cfg(feature = "opensearch")]
    Opensearch(OpensearchConfig),
    #[cfg(feature = "clickhouse")]
    Clickhouse(ClickhouseConfig),
}

impl OutputSpec {
    /// Builds the concrete sink for this spec, validating config along the way.
    pub fn build(&self) -> Result<Box<dyn OutputSink>, Error> {
        match self {
            OutputSpec::File(c) => Ok(Box::new(file::FileOutput::new(c.clone())?)),
            OutputSpec::Stdout(c) => Ok(Box::new(stdout::StdoutOutput::new(c.clone()))),
            #[cfg(feature = "http")]
            OutputSpec::Http(c) => Ok(Box::new(http::HttpOutput::new(c.clone())?)),
            #[cfg(feature = "opensearch")]
            OutputSpec::Opensearch(c) => Ok(Box::new(opensearch::OpensearchOutput::new(c.clone())?)),
            #[cfg(feature = "clickhouse")]
            OutputSpec::Clickhouse(c) => Ok(Box::new(clickhouse::ClickhouseOutput::new(c.clone())?)),
        }
    }
}
