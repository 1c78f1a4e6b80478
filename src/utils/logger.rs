use crate::utils::{AppError, Result};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_FILE_SUFFIX: &str = "log";

static WORKER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static LOGGER: OnceCell<Logger> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

/// Where and how much the back office logs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_output: bool,
    pub rotation: LogRotation,
    /// Rolled files kept on disk; `None` keeps everything.
    pub max_files: Option<usize>,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("menu-admin")
            .join("logs");

        // Dev builds log to the console, release builds to rolling JSON files
        let (console_output, file_output) = if cfg!(debug_assertions) {
            (true, false)
        } else {
            (false, true)
        };

        Self {
            level: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            },
            log_dir,
            console_output,
            file_output,
            rotation: LogRotation::Daily,
            max_files: Some(30),
            file_prefix: "menu-admin".to_string(),
        }
    }
}

impl LogConfig {
    /// Console-only logging at `level`, as used by the command line tool.
    pub fn console(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            console_output: true,
            file_output: false,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| AppError::Configuration(format!("Invalid log level: {}", e)))
    }

    /// Rolling appender for the JSON log files, pruned to `max_files`.
    fn file_appender(&self) -> Result<RollingFileAppender> {
        let mut builder = RollingFileAppender::builder()
            .rotation(self.rotation.into())
            .filename_prefix(&self.file_prefix)
            .filename_suffix(LOG_FILE_SUFFIX);
        if let Some(max_files) = self.max_files {
            builder = builder.max_log_files(max_files);
        }
        builder
            .build(&self.log_dir)
            .map_err(|e| AppError::Configuration(format!("Failed to open log directory: {}", e)))
    }
}

#[derive(Debug)]
pub struct Logger {
    config: LogConfig,
}

impl Logger {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    fn setup_logging(&self) -> Result<()> {
        let mut layers = Vec::new();

        if self.config.console_output {
            let filter = self.config.env_filter()?;
            let console_layer = if cfg!(debug_assertions) {
                fmt::layer()
                    .with_target(false)
                    .with_ansi(true)
                    .with_line_number(true)
                    .with_file(true)
                    .compact()
                    .with_filter(filter)
                    .boxed()
            } else {
                fmt::layer()
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_ansi(false)
                    .with_filter(filter)
                    .boxed()
            };
            layers.push(console_layer);
        }

        if self.config.file_output {
            std::fs::create_dir_all(&self.config.log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(self.config.file_appender()?);
            // Dropping the guard stops the background writer
            let _ = WORKER_GUARD.set(guard);

            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(false)
                .json()
                .with_filter(self.config.env_filter()?)
                .boxed();
            layers.push(file_layer);
        }

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| {
                AppError::Configuration(format!("Failed to initialize tracing subscriber: {}", e))
            })?;

        tracing::info!(
            level = %self.config.level,
            console = self.config.console_output,
            file = self.config.file_output,
            log_dir = %self.config.log_dir.display(),
            "Logger initialized"
        );
        Ok(())
    }
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logger(config: Option<LogConfig>) -> Result<()> {
    let mut outcome = Ok(());
    LOGGER.get_or_init(|| {
        let logger = Logger::new(config.unwrap_or_default());
        outcome = logger.setup_logging();
        logger
    });
    outcome
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*);
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*);
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*);
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*);
    };
}

#[macro_export]
macro_rules! log_timing {
    ($block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration = start.elapsed();
        tracing::debug!(
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
        result
    }};
    ($block:block, $operation:expr) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration = start.elapsed();
        tracing::debug!(
            operation = $operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
        result
    }};
}
