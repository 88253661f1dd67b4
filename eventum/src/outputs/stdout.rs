//! Stdout output (§4.7): writes rendered events to the process's standard streams.

use crate::formatter::FormatterSpec;
use crate::outputs::OutputSink;
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncWriteExt, Stdout, Stderr};
use tokio::sync::Mutex;

/// Which standard stream to write to.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Stdout,
    Stderr,
}

fn default_flush_interval() -> f64 {
    1.0
}

fn default_stream() -> Stream {
    Stream::Stdout
}

fn default_separator() -> String {
    "\n".to_string()
}

/// Configuration for the `stdout` output sink (§6 `output.stdout`).
#[derive(Clone, Debug, Deserialize)]
pub struct StdoutConfig {
    pub formatter: FormatterSpec,
    /// Seconds between flushes; `0` flushes after every write.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: f64,
    /// Which stream to write to.
    #[serde(default = "default_stream")]
    pub stream: Stream,
    /// Separator written between events. Defaults to `\n`.
    #[serde(default = "default_separator")]
    pub separator: String,
}

enum Writer {
    Stdout(Stdout),
    Stderr(Stderr),
}

/// Writes formatted events to stdout or stderr, behind an async mutex since `write` may be
/// called concurrently by the output unit's fan-out.
pub struct StdoutOutput {
    config: StdoutConfig,
    writer: Mutex<Writer>,
}

impl StdoutOutput {
    pub fn new(config: StdoutConfig) -> Self {
        let writer = match config.stream {
            Stream::Stdout => Writer::Stdout(tokio::io::stdout()),
            Stream::Stderr => Writer::Stderr(tokio::io::stderr()),
        };
        StdoutOutput {
            config,
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl OutputSink for StdoutOutput {
    async fn open(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, events: &[String]) -> Result<usize, Error> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut writer = self.writer.lock().await;
        for event in events {
            let line = format!("{event}{}", self.config.separator);
            match &mut *writer {
                Writer::Stdout(w) => w.write_all(line.as_bytes()).await.map_err(Error::Io)?,
                Writer::Stderr(w) => w.write_all(line.as_bytes()).await.map_err(Error::Io)?,
            }
        }
        if self.config.flush_interval == 0.0 {
            match &mut *writer {
                Writer::Stdout(w) => w.flush().await.map_err(Error::Io)?,
                Writer::Stderr(w) => w.flush().await.map_err(Error::Io)?,
            }
        }
        Ok(events.len())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        match &mut *writer {
            Writer::Stdout(w) => w.flush().await.map_err(Error::Io)?,
            Writer::Stderr(w) => w.flush().await.map_err(Error::Io)?,
        }
        Ok(())
    }

    fn formatter(&self) -> &FormatterSpec {
        &self.config.formatter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_events_without_error() {
        let output = StdoutOutput::new(StdoutConfig {
            formatter: FormatterSpec::Plain,
            flush_interval: 0.0,
            stream: Stream::Stdout,
            separator: "\n".to_string(),
        });
        output.open().await.unwrap();
        let count = output.write(&["hello".to_string()]).await.unwrap();
        assert_eq!(count, 1);
        output.close().await.unwrap();
    }
}
