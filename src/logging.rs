//! Structured logging setup using tracing.

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Guard that must be kept alive for the duration of the program.
/// When dropped, flushes and closes the file writer.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global subscriber: stdout in the configured format, plus
/// JSON lines to a rolling file when `logging.file` is set.
pub fn init_logging(config: &LoggingConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (stdout_text, stdout_json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_writer(io::stdout)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(io::stdout))),
    };

    let (file_layer, file_guard) = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_text)
        .with(stdout_json)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}

fn create_file_writer(
    config: &FileLoggingConfig,
) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    fs::create_dir_all(&config.log_dir).ok();

    let rotation = match config.rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Never => Rotation::NEVER,
    };

    let file_appender = RollingFileAppender::new(rotation, &config.log_dir, &config.file_prefix);
    tracing_appender::non_blocking(file_appender)
}

/// Housekeeping for rotated log files: gzip them and delete old ones
#[derive(Debug, Clone)]
pub struct LogMaintenance {
    log_dir: PathBuf,
    file_prefix: String,
    rotation: LogRotation,
    max_age: Option<Duration>,
    compress: bool,
}

impl LogMaintenance {
    pub fn new(config: &FileLoggingConfig) -> Self {
        LogMaintenance {
            log_dir: PathBuf::from(&config.log_dir),
            file_prefix: config.file_prefix.clone(),
            rotation: config.rotation.clone(),
            max_age: (config.max_age_days > 0)
                .then(|| Duration::from_secs(config.max_age_days * 24 * 60 * 60)),
            compress: config.compress,
        }
    }

    /// Name of the file the appender is currently writing.
    /// tracing-appender suffixes rotated files with the UTC period.
    fn active_file(&self) -> String {
        let now = chrono::Utc::now();
        match self.rotation {
            LogRotation::Daily => format!("{}{}", self.file_prefix, now.format(".%Y-%m-%d")),
            LogRotation::Hourly => format!("{}{}", self.file_prefix, now.format(".%Y-%m-%d-%H")),
            LogRotation::Never => self.file_prefix.clone(),
        }
    }

    /// Whether `filename` is a closed log file of ours
    fn is_rotated_log(&self, filename: &str, active: &str) -> bool {
        filename.starts_with(&self.file_prefix) && filename != self.file_prefix && filename != active
    }

    /// One maintenance pass over the log directory
    pub fn run_once(&self) {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, dir = %self.log_dir.display(), "Failed to read log directory");
                return;
            }
        };

        let active = self.active_file();

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let filename = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !self.is_rotated_log(&filename, &active) {
                continue;
            }

            if let Some(max_age) = self.max_age {
                if file_age(&path).is_some_and(|age| age > max_age) {
                    match fs::remove_file(&path) {
                        Ok(()) => tracing::info!(path = %path.display(), "Deleted old log file"),
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Failed to delete old log file")
                        }
                    }
                    continue;
                }
            }

            if self.compress && !filename.ends_with(".gz") {
                match compress_file(&path) {
                    Ok(gz) => tracing::info!(path = %gz.display(), "Compressed rotated log file"),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to compress log file")
                    }
                }
            }
        }
    }
}

/// Spawn the periodic maintenance task when file logging is enabled
pub fn spawn_log_maintenance(config: &LoggingConfig) {
    let Some(file_config) = &config.file else {
        return;
    };
    let maintenance = LogMaintenance::new(file_config);

    tokio::spawn(async move {
        // First pass after a minute, then hourly to catch rotations promptly
        tokio::time::sleep(Duration::from_secs(60)).await;
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            maintenance.run_once();
        }
    });
}

fn file_age(path: &Path) -> Option<Duration> {
    let modified = path.metadata().ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Gzip `path` to `path.gz` and remove the original
fn compress_file(path: &Path) -> io::Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_os_string();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let mut reader = BufReader::new(File::open(path)?);
    let writer = BufWriter::new(File::create(&gz_path)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());

    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;

    Ok(gz_path)
}
