//! Command-line parsing and settings loading.
//!
//! The command line only says where the settings live and how to log. Everything
//! the monitor needs comes from a base TOML document, an optional user override,
//! and environment references resolved at load time.

mod defaults;
mod load;
#[cfg(test)]
mod tests;
mod validation;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Deserializer};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use defaults::{default_alert_timeout_ms, default_ffmpeg_cmd, default_reconnect_delay_ms};
pub use defaults::{
    DEFAULT_ALERT_TIMEOUT_MS, DEFAULT_BASE_CONFIG, DEFAULT_FFMPEG_CMD, DEFAULT_LOG_LEVEL,
    DEFAULT_RECONNECT_DELAY_MS, DEFAULT_USER_CONFIG,
};
pub use load::{load_settings, ConfigPaths};

/// CLI options for the Winston daemon.
#[derive(Debug, Parser, Clone)]
#[command(about = "Winston stream silence monitor", author, version)]
pub struct AppConfig {
    /// Base settings file (required)
    #[arg(
        long = "default-config",
        env = "WINSTON_DEFAULT_CONFIG",
        default_value = DEFAULT_BASE_CONFIG
    )]
    pub default_config: PathBuf,

    /// User settings file merged over the base (optional)
    #[arg(long = "config", env = "WINSTON_CONFIG", default_value = DEFAULT_USER_CONFIG)]
    pub user_config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level", env = "WINSTON_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Log line format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long = "log-file", env = "WINSTON_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the resolved settings and exit
    #[arg(long = "check", default_value_t = false)]
    pub check: bool,
}

impl AppConfig {
    pub fn config_paths(&self) -> ConfigPaths {
        ConfigPaths {
            defaults: self.default_config.clone(),
            user: self.user_config.clone(),
        }
    }

    /// Load, merge, resolve and validate settings against the process environment.
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        let mut settings =
            load_settings(&self.config_paths(), |name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Failures raised while building [`Settings`]. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} is missing", .0.display())]
    MissingDefaults(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config is missing section '{0}'")]
    MissingSection(String),
    #[error(
        "required config option '{key}' in '{section}' is missing, either set the environment \
         variable {var} or override it in your config.toml file"
    )]
    MissingEnv {
        section: String,
        key: String,
        var: String,
    },
    #[error("invalid '{section}' section: {source}")]
    Invalid {
        section: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Validation(String),
}

/// Fully resolved, read-only settings shared by every worker.
#[derive(Debug, Clone)]
pub struct Settings {
    pub general: GeneralSettings,
    pub zetta: ZettaSettings,
    pub audio: AudioSettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSettings {
    pub stream_url: String,
}

/// Downstream controller (Zetta) endpoint and delivery discipline.
#[derive(Debug, Clone, Deserialize)]
pub struct ZettaSettings {
    pub host: String,
    #[serde(deserialize_with = "native_or_text")]
    pub port: u16,
    pub silence_message: String,
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(
        default = "default_reconnect_delay_ms",
        deserialize_with = "native_or_text"
    )]
    pub reconnect_delay_ms: u64,
    #[serde(default, deserialize_with = "optional_native_or_text")]
    pub write_timeout_ms: Option<u64>,
}

impl ZettaSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Analyzer invocation and silence window parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioSettings {
    #[serde(default = "default_ffmpeg_cmd")]
    pub ffmpeg_cmd: String,
    /// Extra analyzer input options, split with shell-word rules (e.g. `-reconnect 1`).
    #[serde(default)]
    pub input_args: Option<String>,
    #[serde(deserialize_with = "native_or_text")]
    pub ambient_db: f64,
    /// Window size `N`.
    #[serde(deserialize_with = "native_or_text")]
    pub samples: usize,
    /// Seconds of stream analyzed per cycle.
    #[serde(deserialize_with = "native_or_text")]
    pub sample_dur: f64,
    /// Hard wall-clock limit for one analyzer run, in seconds.
    #[serde(deserialize_with = "native_or_text")]
    pub timeout: f64,
    /// Fraction of the window that must be quiet.
    #[serde(deserialize_with = "native_or_text")]
    pub threshold: f64,
}

impl AudioSettings {
    pub fn sample_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_dur)
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Split `input_args` into argv entries.
    pub fn input_argv(&self) -> Result<Vec<String>, ConfigError> {
        match self.input_args.as_deref().map(str::trim) {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => shell_words::split(raw).map_err(|err| {
                ConfigError::Validation(format!(
                    "audio.input_args is not valid shell words: {err}"
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    /// Operator channel webhook; alerts are only logged when unset.
    #[serde(default)]
    pub discord: Option<String>,
    #[serde(
        default = "default_alert_timeout_ms",
        deserialize_with = "native_or_text"
    )]
    pub timeout_ms: u64,
}

impl NotificationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How the transport worker talks to the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One connection for the process lifetime; messages end with `\n`.
    #[default]
    Persistent,
    /// A fresh connection per event; the message is written bare.
    PerEvent,
}

impl DeliveryMode {
    pub fn label(self) -> &'static str {
        match self {
            DeliveryMode::Persistent => "persistent",
            DeliveryMode::PerEvent => "per_event",
        }
    }
}

// Environment references always resolve to strings, so numeric keys accept both forms.
fn native_or_text<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Native(T),
        Text(String),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Native(value) => Ok(value),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn optional_native_or_text<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    native_or_text(deserializer).map(Some)
}
