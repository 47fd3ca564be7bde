use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::Context;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};
use weather_core::config::LogConfig;

const DEFAULT_FILTER: &str = "weather_web=info,weather_core=info";

/// Install the global subscriber: stdout always, plus ERROR events written
/// to `log.error_file` when one is configured.
pub fn init(log: &LogConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let error_layer = match log.error_file.as_deref() {
        Some(path) => {
            let file = RotatingFile::open(path, log.max_bytes)
                .with_context(|| format!("Failed to open error log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(error_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Append-only log file that keeps at most `max_bytes` before moving the
/// current contents to `<path>.1`, replacing any older backup.
///
/// A `max_bytes` of zero disables rollover.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    backup: PathBuf,
    max_bytes: u64,
    file: File,
    len: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        let file = open_append(path)?;
        let len = file.metadata()?.len();

        let mut backup = OsString::from(path.as_os_str());
        backup.push(".1");

        Ok(Self {
            path: path.to_path_buf(),
            backup: PathBuf::from(backup),
            max_bytes,
            file,
            len,
        })
    }

    fn rotate_if_needed(&mut self, incoming: usize) -> io::Result<()> {
        if self.max_bytes == 0 || self.len == 0 || self.len + incoming as u64 <= self.max_bytes {
            return Ok(());
        }

        self.file.flush()?;
        match fs::remove_file(&self.backup) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        fs::rename(&self.path, &self.backup)?;

        self.file = open_append(&self.path)?;
        self.len = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.rotate_if_needed(buf.len())?;
        let written = self.file.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
