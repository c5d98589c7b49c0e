//! # Worker Log Sinks
//!
//! Where a worker process's output goes. Every worker gets its own sink;
//! stdout and stderr are pumped into it line by line. A sink is closed when
//! its worker dies, before the replacement gets a fresh one.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Line-oriented output capability for one worker process
pub trait LogSink: Send + Sync {
    /// Append one line; lines written after `close` are dropped
    fn write_line(&self, line: &str) -> io::Result<()>;

    /// Flush and release the underlying file
    fn close(&self) -> io::Result<()>;

    fn path(&self) -> &Path;
}

/// How worker output is surfaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkMode {
    /// One log file per worker
    #[default]
    FileOnly,
    /// Log file plus a colored, prefixed copy on the console
    FileAndConsole,
}

/// Log file sink
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }
}

impl LogSink for FileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut guard = self.writer.lock();
        match guard.as_mut() {
            Some(writer) => {
                writeln!(writer, "{line}")?;
                // Line buffered so a crash loses at most the current line
                writer.flush()
            }
            None => Ok(()),
        }
    }

    fn close(&self) -> io::Result<()> {
        match self.writer.lock().take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

const PREFIX_COLORS: [u8; 6] = [36, 33, 35, 32, 34, 31];

/// File sink that also mirrors each line to stdout with a per-worker prefix
#[derive(Debug)]
pub struct TeeSink {
    file: FileSink,
    prefix: String,
}

impl TeeSink {
    pub fn create(path: impl Into<PathBuf>, slot: usize) -> io::Result<Self> {
        let color = PREFIX_COLORS[slot % PREFIX_COLORS.len()];
        Ok(Self {
            file: FileSink::create(path)?,
            prefix: format!("\x1b[{color}m[worker-{slot}]\x1b[0m"),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl LogSink for TeeSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        if self.file.is_closed() {
            return Ok(());
        }
        self.file.write_line(line)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{} {}", self.prefix, line)
    }

    fn close(&self) -> io::Result<()> {
        self.file.close()
    }

    fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Open the sink for a worker slot according to `mode`
pub fn open_sink(mode: SinkMode, path: &Path, slot: usize) -> io::Result<Arc<dyn LogSink>> {
    Ok(match mode {
        SinkMode::FileOnly => Arc::new(FileSink::create(path)?),
        SinkMode::FileAndConsole => Arc::new(TeeSink::create(path, slot)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker_1.log");
        let sink = FileSink::create(&path).unwrap();

        sink.write_line("first").unwrap();
        sink.write_line("second").unwrap();
        sink.close().unwrap();
        sink.write_line("dropped").unwrap();
        sink.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
        assert!(sink.is_closed());
    }

    #[test]
    fn test_tee_sink_prefix_per_slot() {
        let dir = tempfile::tempdir().unwrap();
        let one = TeeSink::create(dir.path().join("a.log"), 1).unwrap();
        let two = TeeSink::create(dir.path().join("b.log"), 2).unwrap();

        assert!(one.prefix().contains("[worker-1]"));
        assert_ne!(one.prefix(), two.prefix());

        one.write_line("hello").unwrap();
        assert_eq!(std::fs::read_to_string(one.path()).unwrap(), "hello\n");
    }

    #[test]
    fn test_open_sink_modes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = open_sink(SinkMode::FileOnly, &dir.path().join("w.log"), 1).unwrap();
        sink.write_line("x").unwrap();
        sink.close().unwrap();
        assert!(dir.path().join("w.log").exists());
    }
}
