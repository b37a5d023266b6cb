//! Logging initialisation via tracing-subscriber.
//!
//! [`LoggingConfig::new`] describes the usual setup: everything at `level`
//! goes to stdout and to `error.log`, capped at 1 GiB. Call [`init`] once
//! at startup.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::MakeWriter, layer::SubscriberExt, registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::error::AppError;

pub const DEFAULT_LOG_FILE: &str = "error.log";
pub const DEFAULT_MAX_BYTES: u64 = 1_073_741_824;

/// Line layout of emitted events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

/// Size-capped log file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSink {
    pub path: PathBuf,
    pub max_bytes: u64,
    /// Number of rolled-over files kept as `path.1` … `path.N`.
    /// `0` disables rollover entirely.
    pub backup_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    /// When `true` the configured level wins over `RUST_LOG`.
    pub prefer_level: bool,
    pub format: LogFormat,
    pub show_target: bool,
    pub console: bool,
    pub file: Option<FileSink>,
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            prefer_level: true,
            format: LogFormat::Full,
            show_target: true,
            console: true,
            file: Some(FileSink {
                path: PathBuf::from(DEFAULT_LOG_FILE),
                max_bytes: DEFAULT_MAX_BYTES,
                backup_count: 0,
            }),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn without_file(mut self) -> Self {
        self.file = None;
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by `config`.
///
/// Fails if a global subscriber is already set or the log file cannot be
/// opened.
pub fn init(config: &LoggingConfig) -> Result<(), AppError> {
    let filter = build_filter(&config.level, config.prefer_level)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.console {
        layers.push(fmt_layer(config, io::stdout, true));
    }
    if let Some(sink) = &config.file {
        let writer = RotatingFile::open(sink).map_err(|e| {
            AppError::Logger(format!(
                "failed to open log file '{}': {e}",
                sink.path.display()
            ))
        })?;
        layers.push(fmt_layer(config, writer, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

fn fmt_layer<S, W>(config: &LoggingConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.show_target);
    match config.format {
        LogFormat::Full => layer.boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// `level` accepts level strings (`"info"`) or full filter directives
/// (`"clint_utilities=debug,reqwest=warn"`).
///
/// If `prefer_level` is `true`, `level` takes precedence and `RUST_LOG` is only
/// used as a fallback when `level` is invalid. If `prefer_level` is `false`,
/// `RUST_LOG` takes precedence and `level` is the fallback.
pub fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    if prefer_level {
        match EnvFilter::try_new(level) {
            Ok(filter) => Ok(filter),
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            }),
        }
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
    }
}

/// Parse a log level string into a [`LevelFilter`], returning an error on
/// unrecognised values. Useful for validating config before initialising.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

// ── Rotating file writer ──────────────────────────────────────────────────────

/// Append-only log file that rolls over once it would grow past
/// `max_bytes`, keeping at most `backup_count` older files.
#[derive(Debug, Clone)]
pub struct RotatingFile {
    inner: Arc<Mutex<RotatingState>>,
}

#[derive(Debug)]
struct RotatingState {
    path: PathBuf,
    max_bytes: u64,
    backup_count: u32,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(sink: &FileSink) -> io::Result<Self> {
        let file = open_append(&sink.path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingState {
                path: sink.path.clone(),
                max_bytes: sink.max_bytes,
                backup_count: sink.backup_count,
                file,
                written,
            })),
        })
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

impl RotatingState {
    fn should_roll(&self, incoming: usize) -> bool {
        self.backup_count > 0
            && self.max_bytes > 0
            && self.written > 0
            && self.written.saturating_add(incoming as u64) > self.max_bytes
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for n in (1..self.backup_count).rev() {
            let from = backup_path(&self.path, n);
            if from.exists() {
                fs::rename(&from, backup_path(&self.path, n + 1))?;
            }
        }
        fs::rename(&self.path, backup_path(&self.path, 1))?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.should_roll(buf.len()) {
            state.roll()?;
        }
        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .file
            .flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
