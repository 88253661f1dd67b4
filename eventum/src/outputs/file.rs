//! File output (§4.7): appends rendered events to a path on disk.
//!
//! Flushes on a configurable interval and closes (then transparently reopens on the next write)
//! the handle after a period of inactivity, so a long-idle file doesn't hold a descriptor against
//! a rotated/deleted path.

use crate::formatter::FormatterSpec;
use crate::outputs::OutputSink;
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// How to open the target file when it already has content.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Append,
    Overwrite,
}

fn default_flush_interval() -> f64 {
    1.0
}

fn default_cleanup_interval() -> f64 {
    10.0
}

fn default_write_mode() -> WriteMode {
    WriteMode::Append
}

fn default_separator() -> String {
    "\n".to_string()
}

/// Configuration for the `file` output sink (§6 `output.file`).
#[derive(Clone, Debug, Deserialize)]
pub struct FileConfig {
    /// Absolute path of the file to write.
    pub path: PathBuf,
    /// Formatter applied before events reach this sink.
    pub formatter: FormatterSpec,
    /// Seconds between flushes; `0` flushes after every write.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: f64,
    /// Seconds of inactivity before the handle is closed; reopened transparently on the next
    /// write.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: f64,
    /// Unix file mode (e.g. `0o640`), or `-1` for the OS default.
    #[serde(default = "default_file_mode")]
    pub file_mode: i32,
    /// Whether to append to or overwrite an existing file.
    #[serde(default = "default_write_mode")]
    pub write_mode: WriteMode,
    /// Separator written between events. Defaults to `\n`.
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_file_mode() -> i32 {
    -1
}

struct Inner {
    handle: Option<std::fs::File>,
    last_write: Instant,
}

/// Writes formatted events to a file on disk, reopening the handle if it was closed by the
/// idle-cleanup timer.
pub struct FileOutput {
    config: FileConfig,
    inner: Mutex<Inner>,
}

impl FileOutput {
    pub fn new(config: FileConfig) -> Result<Self, Error> {
        if !config.path.is_absolute() {
            return Err(Error::Configuration(format!(
                "file output path {:?} must be absolute",
                config.path
            )));
        }
        Ok(FileOutput {
            config,
            inner: Mutex::new(Inner {
                handle: None,
                last_write: Instant::now(),
            }),
        })
    }

    fn open_handle(&self) -> Result<std::fs::File, Error> {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true);
        match self.config.write_mode {
            WriteMode::Append => {
                opts.append(true);
            }
            WriteMode::Overwrite => {
                opts.truncate(true);
            }
        }
        #[cfg(unix)]
        if self.config.file_mode >= 0 {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(self.config.file_mode as u32);
        }
        opts.open(&self.config.path).map_err(Error::Io)
    }

    /// Idle time since the last write exceeds `cleanup_interval`: the handle should be dropped.
    fn is_stale(&self, last_write: Instant) -> bool {
        self.config.cleanup_interval > 0.0
            && last_write.elapsed() >= Duration::from_secs_f64(self.config.cleanup_interval)
    }
}

#[async_trait]
impl OutputSink for FileOutput {
    async fn open(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        inner.handle = Some(self.open_handle()?);
        inner.last_write = Instant::now();
        debug!(path = %self.config.path.display(), "file output opened");
        Ok(())
    }

    async fn write(&self, events: &[String]) -> Result<usize, Error> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.lock().await;
        if inner.handle.is_none() || self.is_stale(inner.last_write) {
            inner.handle = Some(self.open_handle()?);
        }
        let handle = inner.handle.as_mut().expect("just opened above");
        for event in events {
            handle.write_all(event.as_bytes()).map_err(Error::Io)?;
            handle.write_all(self.config.separator.as_bytes()).map_err(Error::Io)?;
        }
        if self.config.flush_interval == 0.0 {
            handle.flush().map_err(Error::Io)?;
        }
        inner.last_write = Instant::now();
        Ok(events.len())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        if let Some(mut handle) = inner.handle.take() {
            handle.flush().map_err(Error::Io)?;
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

    fn config(path: PathBuf) -> FileConfig {
        FileConfig {
            path,
            formatter: FormatterSpec::Plain,
            flush_interval: 0.0,
            cleanup_interval: 10.0,
            file_mode: -1,
            write_mode: WriteMode::Append,
            separator: "\n".to_string(),
        }
    }

    #[tokio::test]
    async fn writes_and_reads_back_events() {
        let dir = std::env::temp_dir().join(format!("eventum-file-test-{}", uuid::Uuid::new_v4()));
        let output = FileOutput::new(config(dir.clone())).unwrap();
        output.open().await.unwrap();
        let count = output
            .write(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(count, 2);
        output.close().await.unwrap();
        let contents = std::fs::read_to_string(&dir).unwrap();
        assert_eq!(contents, "a\nb\n");
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn rejects_relative_path() {
        assert!(FileOutput::new(config(PathBuf::from("relative/path"))).is_err());
    }
}
