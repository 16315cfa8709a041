//! Logging setup: console output plus a persistent log file that is rotated
//! by size, so diagnostics survive on hosts nobody is watching.

use crate::config::LoggingConfig;
use anyhow::Context;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `-v`, which wins over
/// the configured level. A log file that cannot be opened is reported and
/// skipped.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config.file_path().and_then(|path| match path {
        Some(path) => RotatingFile::open(&path, config.max_size_bytes())
            .map(Some)
            .with_context(|| format!("Failed to open log file {:?}", path)),
        None => Ok(None),
    });
    let (file, file_error) = match file {
        Ok(file) => (file, None),
        Err(e) => (None, Some(e)),
    };
    let file_path = file.as_ref().map(|f| f.path().to_path_buf());
    let file_layer = file.map(|file| fmt::layer().with_ansi(false).with_writer(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    match (file_path, file_error) {
        (Some(path), _) => tracing::debug!("Logging to {:?}", path),
        (None, Some(e)) => warn!("File logging disabled: {:#}", e),
        (None, None) => {}
    }
}

/// Append-only log file. Once a write would push it past `max_bytes` the
/// file is moved to `<name>.old`, replacing any previous backup, and a fresh
/// file is started.
#[derive(Clone)]
pub struct RotatingFile {
    path: Arc<PathBuf>,
    inner: Arc<Mutex<LogFile>>,
}

struct LogFile {
    path: PathBuf,
    max_bytes: u64,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut log = LogFile {
            path: path.to_path_buf(),
            max_bytes: max_bytes.max(1),
            file: None,
            size: 0,
        };
        log.file()?;
        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            inner: Arc::new(Mutex::new(log)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<path>.old`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".old");
    PathBuf::from(name)
}

impl LogFile {
    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.size = file.metadata()?.len();
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file closed"))
    }

    fn rotate(&mut self) {
        self.file = None;
        let backup = backup_path(&self.path);
        if backup.exists() {
            let _ = fs::remove_file(&backup);
        }
        // If the rename fails the current file keeps growing until the next
        // threshold crossing.
        let _ = fs::rename(&self.path, &backup);
        self.size = 0;
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.size > 0 && self.size + incoming > self.max_bytes {
            self.rotate();
        }
        let file = self.file()?;
        file.write_all(buf)?;
        self.size += incoming;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

pub struct RotatingWriter<'a>(MutexGuard<'a, LogFile>);

impl Write for RotatingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter(
            self.inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}
