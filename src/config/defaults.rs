pub const DEFAULT_BASE_CONFIG: &str = "config-default.toml";
pub const DEFAULT_USER_CONFIG: &str = "config.toml";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_FFMPEG_CMD: &str = "ffmpeg";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;
pub const DEFAULT_ALERT_TIMEOUT_MS: u64 = 5_000;

/// Sections every merged document must carry.
pub(super) const REQUIRED_SECTIONS: &[&str] = &["general", "zetta", "audio", "notifications"];

pub(super) const MIN_AMBIENT_DB: f64 = -120.0;
pub(super) const MAX_AMBIENT_DB: f64 = 0.0;
pub(super) const MAX_WINDOW_SAMPLES: usize = 10_000;
pub(super) const MAX_INPUT_ARGS: usize = 32;
pub(super) const MAX_RECONNECT_DELAY_MS: u64 = 300_000;
/// Upper bound for `sample_dur` and `timeout`, in seconds.
pub(super) const MAX_ANALYZER_SECS: f64 = 3_600.0;

pub(super) fn default_ffmpeg_cmd() -> String {
    DEFAULT_FFMPEG_CMD.to_string()
}

pub(super) const fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

pub(super) const fn default_alert_timeout_ms() -> u64 {
    DEFAULT_ALERT_TIMEOUT_MS
}
