//! Logging setup
//!
//! Console output plus optional log files that roll over by size, named after
//! the process start time, with expired files removed on start.

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_PREFIX: &str = "mirror-server.";
const LOG_SUFFIX: &str = ".log";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Size-capped log file sequence: `mirror-server.<start>.log`,
/// `mirror-server.<start>_1.log`, ...
struct RollingState {
    log_dir: PathBuf,
    started: String,
    index: u32,
    max_file_size: u64,
    written: u64,
    file: File,
}

impl RollingState {
    fn open(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let started = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        let file = open_append(&file_path(&log_dir, &started, 0))?;
        Ok(Self {
            log_dir,
            started,
            index: 0,
            max_file_size,
            written: 0,
            file,
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            self.file.flush()?;
            self.index += 1;
            self.file = open_append(&file_path(&self.log_dir, &self.started, self.index))?;
            self.written = 0;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

fn file_path(log_dir: &Path, started: &str, index: u32) -> PathBuf {
    let name = if index == 0 {
        format!("{}{}{}", LOG_PREFIX, started, LOG_SUFFIX)
    } else {
        format!("{}{}_{}{}", LOG_PREFIX, started, index, LOG_SUFFIX)
    };
    log_dir.join(name)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Writer handed to the non-blocking appender
#[derive(Clone)]
pub struct RollingFile {
    state: Arc<Mutex<RollingState>>,
}

impl RollingFile {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(RollingState::open(log_dir, max_file_size)?)),
        })
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.lock().file.flush()
    }
}

/// Keeps the file writer thread alive; hold it until the process exits
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. If the log directory
/// cannot be prepared, only console output is installed.
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(true);

    let file_writer = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| RollingFile::new(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| {
                eprintln!(
                    "log files disabled, cannot open {:?}: {}",
                    config.log_dir, e
                )
            })
            .ok()
    } else {
        None
    };

    let Some(writer) = file_writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("logging initialised (console only)");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "logging initialised: dir={:?}, retention={}d, level={}, max_file={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = remove_expired_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
    if removed > 0 {
        info!("removed {} expired log file(s)", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// Delete log files whose start date is older than `retention_days`
fn remove_expired_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("cannot read log dir {:?}: {}", log_dir, e);
            return 0;
        }
    };

    let retention = chrono::Duration::days(retention_days as i64);
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(log_file_date)
        else {
            continue;
        };

        if today.signed_duration_since(date) <= retention {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("cannot remove expired log {:?}: {}", path, e),
        }
    }
    removed
}

/// Start date encoded in `mirror-server.YYYY-MM-DD-HHMMSS[_N].log`
fn log_file_date(file_name: &str) -> Option<NaiveDate> {
    let stamp = file_name
        .strip_prefix(LOG_PREFIX)?
        .strip_suffix(LOG_SUFFIX)?;
    NaiveDate::parse_from_str(stamp.get(..10)?, "%Y-%m-%d").ok()
}
