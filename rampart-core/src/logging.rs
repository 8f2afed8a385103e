//! Logging setup for applications embedding the pipeline.
//!
//! Every layer emits structured `tracing` events carrying its name. This
//! module installs a subscriber for them: JSON to STDOUT by default, with
//! `RUST_LOG` taking precedence over the configured level.
//!
//! # Examples
//!
//! ```no_run
//! use rampart_core::logging::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let _guard = LogConfig::new()
//!         .level(LogLevel::Debug)
//!         .format(LogFormat::Compact)
//!         .output(LogOutput::Stderr)
//!         .init();
//!
//!     info!("Pipeline logging ready");
//! }
//! ```
//!
//! ## Rolling files
//!
//! ```no_run
//! use rampart_core::logging::*;
//!
//! let _guard = LogConfig::new()
//!     .output(LogOutput::RollingFile {
//!         directory: "logs".to_string(),
//!         prefix: "rampart".to_string(),
//!         rotation: Rotation::Daily,
//!     })
//!     .init();
//! ```

use std::fmt as std_fmt;
use std::io;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use tracing::{debug, error, info, trace, warn};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Directive string for EnvFilter
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std_fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Output format for log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured, machine-readable (default)
    Json,
    /// Single-line human-readable text
    Plain,
    /// Multi-line, for development
    Pretty,
    /// Minimal single-line output
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Output destination for logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Append to a single file
    File(String),
    /// Write to rotating log files
    RollingFile {
        directory: String,
        prefix: String,
        rotation: Rotation,
    },
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Minutely,
    Hourly,
    Daily,
    Never,
}

impl Rotation {
    fn to_tracing_rotation(self) -> tracing_appender::rolling::Rotation {
        match self {
            Rotation::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
            Rotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
            Rotation::Daily => tracing_appender::rolling::Rotation::DAILY,
            Rotation::Never => tracing_appender::rolling::Rotation::NEVER,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Output destination
    pub output: LogOutput,
    /// Include thread IDs
    pub thread_ids: bool,
    /// Include target (module path)
    pub targets: bool,
    /// Include file and line numbers
    pub file_line: bool,
    /// Emit span close events
    pub spans: bool,
    /// Enable ANSI colors (ignored for JSON)
    pub colors: bool,
    /// Custom filter directives (overrides level and `RUST_LOG`)
    pub env_filter: Option<String>,
}

impl LogConfig {
    /// Create a new logging configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set log level
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set output format
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set output destination
    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Enable or disable thread IDs
    pub fn with_thread_ids(mut self, enable: bool) -> Self {
        self.thread_ids = enable;
        self
    }

    /// Enable or disable target (module path)
    pub fn with_targets(mut self, enable: bool) -> Self {
        self.targets = enable;
        self
    }

    /// Enable or disable file and line numbers
    pub fn with_file_line(mut self, enable: bool) -> Self {
        self.file_line = enable;
        self
    }

    /// Enable or disable span events
    pub fn with_spans(mut self, enable: bool) -> Self {
        self.spans = enable;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_colors(mut self, enable: bool) -> Self {
        self.colors = enable;
        self
    }

    /// Set custom filter directives, e.g. `"rampart_core::circuit_breaker=debug"`
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter built from the custom directives, `RUST_LOG`, or the level.
    pub fn build_filter(&self) -> EnvFilter {
        match &self.env_filter {
            Some(directives) => {
                EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
            }
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
        }
    }

    /// Install the global subscriber.
    ///
    /// Returns the guard flushing the background writer; keep it alive for
    /// the lifetime of the program. Returns `None` if a global subscriber was
    /// already installed. A log file that cannot be opened falls back to
    /// STDERR.
    pub fn init(self) -> Option<WorkerGuard> {
        let filter = self.build_filter();

        let (layer, guard) = match &self.output {
            LogOutput::Stdout => self.non_blocking_layer(io::stdout()),
            LogOutput::Stderr => self.non_blocking_layer(io::stderr()),
            LogOutput::File(path) => {
                match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                    Ok(file) => self.non_blocking_layer(file),
                    Err(e) => {
                        eprintln!("failed to open log file {}: {}, logging to stderr", path, e);
                        self.non_blocking_layer(io::stderr())
                    }
                }
            }
            LogOutput::RollingFile {
                directory,
                prefix,
                rotation,
            } => {
                let appender = tracing_appender::rolling::RollingFileAppender::builder()
                    .rotation(rotation.to_tracing_rotation())
                    .filename_prefix(prefix)
                    .build(directory);
                match appender {
                    Ok(appender) => self.non_blocking_layer(appender),
                    Err(e) => {
                        eprintln!("failed to open log directory {}: {}, logging to stderr", directory, e);
                        self.non_blocking_layer(io::stderr())
                    }
                }
            }
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
            .ok()
            .map(|()| guard)
    }

    fn non_blocking_layer<W>(&self, writer: W) -> (Box<dyn Layer<Registry> + Send + Sync>, WorkerGuard)
    where
        W: io::Write + Send + 'static,
    {
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        (self.fmt_layer(non_blocking), guard)
    }

    fn fmt_layer<W>(&self, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let span_events = if self.spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(self.targets)
            .with_thread_ids(self.thread_ids)
            .with_span_events(span_events);

        match self.format {
            LogFormat::Json => layer
                .json()
                .with_current_span(self.spans)
                .with_span_list(self.spans)
                .with_file(self.file_line)
                .with_line_number(self.file_line)
                .boxed(),
            LogFormat::Plain => layer
                .with_ansi(self.colors)
                .with_file(self.file_line)
                .with_line_number(self.file_line)
                .boxed(),
            LogFormat::Pretty => layer
                .pretty()
                .with_ansi(self.colors)
                .with_file(self.file_line)
                .with_line_number(self.file_line)
                .boxed(),
            LogFormat::Compact => layer.compact().with_ansi(self.colors).boxed(),
        }
    }
}

impl Default for LogConfig {
    /// JSON to STDOUT at INFO level
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            thread_ids: false,
            targets: true,
            file_line: false,
            spans: false,
            colors: false,
            env_filter: None,
        }
    }
}
