//! Logging setup
//!
//! JSON `tracing` output on the console, plus an optional size-rotated log
//! file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default maximum log file size (10MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum number of rotated files to keep
pub const DEFAULT_MAX_FILES: usize = 5;

/// Where console logs go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    /// Keeps stdout free for command output
    Stderr,
}

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `log_level`.
pub fn init(log_level: &str, log_file: Option<&Path>, console: ConsoleTarget) -> anyhow::Result<()> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let console_layer = match console {
        ConsoleTarget::Stdout => fmt::layer().json().with_filter(filter()).boxed(),
        ConsoleTarget::Stderr => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(filter())
            .boxed(),
    };

    let file_layer = match log_file {
        Some(path) => {
            let writer = SizeBasedRollingWriter::with_defaults(path)?;
            Some(fmt::layer().json().with_writer(writer).with_filter(filter()))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(path) = log_file {
        tracing::debug!(path = %path.display(), max_files = DEFAULT_MAX_FILES, "File logging enabled");
    }

    Ok(())
}

/// A size-based rolling file writer
///
/// Rotates when a write would push the file past `max_size`. Rotated files
/// get a numeric suffix (`app.log.1` is the newest).
#[derive(Debug, Clone)]
pub struct SizeBasedRollingWriter {
    inner: Arc<Mutex<RollingWriterInner>>,
}

#[derive(Debug)]
struct RollingWriterInner {
    base_path: PathBuf,
    file: Option<File>,
    current_size: u64,
    max_size: u64,
    max_files: usize,
}

impl SizeBasedRollingWriter {
    pub fn new(path: impl AsRef<Path>, max_size: u64, max_files: usize) -> io::Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if base_path.file_name().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("log path has no file name: {}", base_path.display()),
            ));
        }

        if let Some(parent) = base_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let current_size = fs::metadata(&base_path).map(|m| m.len()).unwrap_or(0);
        let file = open_append(&base_path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(RollingWriterInner {
                base_path,
                file: Some(file),
                current_size,
                max_size,
                max_files: max_files.max(1),
            })),
        })
    }

    /// 10MB per file, [`DEFAULT_MAX_FILES`] files
    pub fn with_defaults(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(path, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_FILES)
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, RollingWriterInner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl RollingWriterInner {
    fn rotate(&mut self) -> io::Result<()> {
        self.file = None;

        // Shift app.log.N-1 -> app.log.N, dropping the oldest
        let oldest = self.rotated_path(self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest).ok();
        }
        for i in (1..self.max_files).rev() {
            let from = self.rotated_path(i);
            if from.exists() {
                fs::rename(&from, self.rotated_path(i + 1)).ok();
            }
        }

        if self.base_path.exists() {
            fs::rename(&self.base_path, self.rotated_path(1))?;
        }

        self.file = Some(open_append(&self.base_path)?);
        self.current_size = 0;

        Ok(())
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        let mut name = self.base_path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}", index));
        self.base_path.with_file_name(name)
    }
}

impl Write for SizeBasedRollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock()?;

        if inner.current_size > 0 && inner.current_size + buf.len() as u64 > inner.max_size {
            inner.rotate()?;
        }

        let written = match inner.file.as_mut() {
            Some(file) => file.write(buf)?,
            None => return Err(io::Error::new(io::ErrorKind::Other, "Log file not open")),
        };
        inner.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.lock()?.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> fmt::MakeWriter<'a> for SizeBasedRollingWriter {
    type Writer = SizeBasedRollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/nested/runner.log");

        let _writer = SizeBasedRollingWriter::with_defaults(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_writer_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runner.log");

        let mut writer = SizeBasedRollingWriter::with_defaults(&path).unwrap();
        writer.write_all(b"{\"msg\":\"Sandbox released\"}\n").unwrap();
        writer.flush().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Sandbox released"));
    }

    #[test]
    fn test_rotation_keeps_at_most_max_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runner.log");

        let mut writer = SizeBasedRollingWriter::new(&path, 64, 2).unwrap();
        for i in 0..20 {
            writeln!(writer, "line {}: test command finished", i).unwrap();
        }
        writer.flush().unwrap();

        assert!(dir.path().join("runner.log.1").exists());
        assert!(dir.path().join("runner.log.2").exists());
        assert!(!dir.path().join("runner.log.3").exists());
        assert!(fs::metadata(&path).unwrap().len() <= 64);
    }

    #[test]
    fn test_rotated_path_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("runner.log");
        let writer = SizeBasedRollingWriter::new(&path, 1024, 3).unwrap();

        let inner = writer.lock().unwrap();
        assert_eq!(inner.rotated_path(2), dir.path().join("runner.log.2"));
    }

    #[test]
    fn test_rejects_directory_path() {
        assert!(SizeBasedRollingWriter::with_defaults("/").is_err());
    }
}
