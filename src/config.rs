//! Configuration loading with env-var overrides.
//!
//! Reads the TOML file named by `CLINT_CONFIG`, else `config/default.toml`
//! relative to the current working directory, else the copy of that file
//! compiled into the binary. `CLINT_LOG_LEVEL` and `CLINT_LOG_FILE`
//! override the logging section.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::cli::CliSpec;
use crate::error::AppError;
use crate::logger::{DEFAULT_LOG_FILE, DEFAULT_MAX_BYTES, FileSink, LogFormat, LoggingConfig};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const EMBEDDED_DEFAULT: &str = include_str!("../config/default.toml");

/// Defaults for durable requests made by the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub attempts: u32,
    pub delay_secs: f64,
    /// Per-attempt timeout; `None` waits as long as the server does.
    pub timeout: Option<Duration>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub cli: CliSpec,
}

/// Env-var overrides, collected separately so tests never touch the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("CLINT_LOG_LEVEL").ok(),
            log_file: env::var("CLINT_LOG_FILE").ok(),
        }
    }
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    logging: RawLogging,
    #[serde(default)]
    http: RawHttp,
    cli: CliSpec,
}

#[derive(Deserialize)]
struct RawLogging {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default = "default_true")]
    prefer_level: bool,
    #[serde(default)]
    format: LogFormat,
    #[serde(default = "default_true")]
    target: bool,
    #[serde(default = "default_true")]
    console: bool,
    /// Empty string disables the file sink.
    #[serde(default = "default_log_file")]
    file: String,
    #[serde(default = "default_max_bytes")]
    max_bytes: u64,
    #[serde(default)]
    backup_count: u32,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            prefer_level: true,
            format: LogFormat::default(),
            target: true,
            console: true,
            file: default_log_file(),
            max_bytes: default_max_bytes(),
            backup_count: 0,
        }
    }
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_attempts")]
    attempts: u32,
    #[serde(default = "default_delay_secs")]
    delay_secs: f64,
    /// `0` means no timeout.
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_secs: default_delay_secs(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { DEFAULT_LOG_FILE.to_string() }
fn default_max_bytes() -> u64 { DEFAULT_MAX_BYTES }
fn default_attempts() -> u32 { 3 }
fn default_delay_secs() -> f64 { 1.0 }
fn default_timeout_seconds() -> u64 { 30 }

fn default_true() -> bool {
    true
}

/// Load config from the usual locations, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    if let Ok(path) = env::var("CLINT_CONFIG") {
        return load_from(Path::new(&path), &overrides);
    }
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        load_str(EMBEDDED_DEFAULT, "<embedded default>", &overrides)
    }
}

/// Load from an explicit path with the given overrides.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    load_str(&raw, &path.display().to_string(), overrides)
}

fn load_str(raw: &str, origin: &str, overrides: &Overrides) -> Result<Config, AppError> {
    let parsed: RawConfig = toml::from_str(raw)
        .map_err(|e| AppError::Config(format!("parse error in {origin}: {e}")))?;

    let l = parsed.logging;
    let level = overrides.log_level.clone().unwrap_or(l.level);
    let file = overrides.log_file.clone().unwrap_or(l.file);
    let file = (!file.is_empty()).then(|| FileSink {
        path: expand_home(&file),
        max_bytes: l.max_bytes,
        backup_count: l.backup_count,
    });

    let h = parsed.http;
    if h.attempts == 0 {
        return Err(AppError::Config(format!("{origin}: http.attempts must be greater than 0")));
    }
    if !h.delay_secs.is_finite() || h.delay_secs < 0.0 {
        return Err(AppError::Config(format!(
            "{origin}: http.delay_secs must be greater than or equal to 0"
        )));
    }

    Ok(Config {
        logging: LoggingConfig {
            level,
            prefer_level: l.prefer_level,
            format: l.format,
            show_target: l.target,
            console: l.console,
            file,
        },
        http: HttpConfig {
            attempts: h.attempts,
            delay_secs: h.delay_secs,
            timeout: (h.timeout_seconds > 0).then(|| Duration::from_secs(h.timeout_seconds)),
        },
        cli: parsed.cli,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[cli]
description = "test tool"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.logging.console);
        let sink = cfg.logging.file.unwrap();
        assert_eq!(sink.path, PathBuf::from("error.log"));
        assert_eq!(sink.max_bytes, 1_073_741_824);
        assert_eq!(cfg.http.attempts, 3);
        assert_eq!(cfg.http.delay_secs, 1.0);
        assert_eq!(cfg.http.timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.cli.description, "test tool");
        assert!(cfg.cli.args.is_empty());
    }

    #[test]
    fn embedded_default_parses() {
        let cfg = load_str(EMBEDDED_DEFAULT, "embedded", &Overrides::default()).unwrap();
        assert!(!cfg.cli.args.is_empty());
        crate::cli::build_command(&cfg.cli).unwrap();
    }

    #[test]
    fn log_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            log_level: Some("debug".into()),
            log_file: Some("/tmp/clint-test.log".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(
            cfg.logging.file.unwrap().path,
            PathBuf::from("/tmp/clint-test.log")
        );
    }

    #[test]
    fn empty_file_disables_sink_and_zero_timeout_disables_timeout() {
        let f = write_toml(
            r#"
[logging]
file = ""
format = "compact"

[http]
timeout_seconds = 0

[cli]
description = "d"
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert!(cfg.logging.file.is_none());
        assert_eq!(cfg.logging.format, LogFormat::Compact);
        assert_eq!(cfg.http.timeout, None);
    }

    #[test]
    fn invalid_http_values_error() {
        for section in ["attempts = 0", "delay_secs = -1.0"] {
            let f = write_toml(&format!("[http]\n{section}\n[cli]\ndescription = \"d\"\n"));
            let err = load_from(f.path(), &Overrides::default()).unwrap_err();
            assert!(err.to_string().contains("config error"), "{section}");
        }
    }

    #[test]
    fn missing_cli_section_errors() {
        let f = write_toml("[logging]\nlevel = \"info\"\n");
        let msg = load_from(f.path(), &Overrides::default())
            .unwrap_err()
            .to_string();
        assert!(msg.contains("parse error"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/logs/error.log");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with("error.log"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn relative_path_unchanged() {
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }
}
