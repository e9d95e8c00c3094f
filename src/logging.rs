//! Process-wide logging setup
//!
//! One global `tracing` subscriber: a human-readable console layer, plus
//! JSON-lines and plain-text file layers in production mode.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// Timestamp format used by every layer
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Default directory for production log files
pub const DEFAULT_LOG_DIR: &str = "logs";

/// File output for production deployments
#[derive(Debug, Clone)]
pub struct ProductionLog {
    pub dir: PathBuf,
    /// Append to existing files instead of truncating them
    pub append: bool,
}

impl Default for ProductionLog {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            append: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub no_color: bool,
    pub level: Level,
    pub production: Option<ProductionLog>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            no_color: false,
            level: Level::DEBUG,
            production: None,
        }
    }
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to open log file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log path {} is a directory", .0.display())]
    IsDirectory(PathBuf),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Paths of the files opened in production mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    pub json: PathBuf,
    pub text: PathBuf,
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `options.level` when set.
pub fn init(options: &LogOptions) -> Result<Option<LogFiles>, LoggingError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(options.level).into())
        .from_env_lossy();

    let console = fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_file(true)
        .with_line_number(true)
        .with_ansi(!options.no_color);

    let (json_layer, text_layer, files) = match &options.production {
        Some(production) => {
            let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
            let files = LogFiles {
                json: production.dir.join(format!("{stamp}.jsonl")),
                text: production.dir.join(format!("{stamp}.log")),
            };
            let json = open_log_file(&files.json, production.append)?;
            let text = open_log_file(&files.text, production.append)?;

            let json_layer = fmt::layer()
                .json()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_file(true)
                .with_line_number(true)
                .with_writer(Mutex::new(json));
            let text_layer = fmt::layer()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(Mutex::new(text));

            (Some(json_layer), Some(text_layer), Some(files))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(files)
}

/// Open (or create) a log file, creating its directory first
fn open_log_file(path: &Path, append: bool) -> Result<File, LoggingError> {
    if path.is_dir() {
        return Err(LoggingError::IsDirectory(path.to_path_buf()));
    }

    let io_err = |source| LoggingError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path).map_err(io_err)
}
