use super::defaults::{
    MAX_AMBIENT_DB, MAX_ANALYZER_SECS, MAX_INPUT_ARGS, MAX_RECONNECT_DELAY_MS, MAX_WINDOW_SAMPLES,
    MIN_AMBIENT_DB,
};
use super::{ConfigError, Settings};
use std::fs;
use std::path::Path;

macro_rules! invalid {
    ($($arg:tt)*) => {
        return Err(ConfigError::Validation(format!($($arg)*)))
    };
}

impl Settings {
    /// Check loaded values and normalize the analyzer binary path.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.general.stream_url.trim().is_empty() {
            invalid!("general.stream_url must not be empty");
        }

        let audio = &self.audio;
        if !(1..=MAX_WINDOW_SAMPLES).contains(&audio.samples) {
            invalid!(
                "audio.samples must be between 1 and {MAX_WINDOW_SAMPLES}, got {}",
                audio.samples
            );
        }
        // quiet_count must strictly exceed samples * threshold, so 1.0 could never fire.
        if !(0.0..1.0).contains(&audio.threshold) {
            invalid!(
                "audio.threshold must be a fraction in [0, 1), got {}",
                audio.threshold
            );
        }
        if !(MIN_AMBIENT_DB..=MAX_AMBIENT_DB).contains(&audio.ambient_db) {
            invalid!(
                "audio.ambient_db must be between {MIN_AMBIENT_DB} and {MAX_AMBIENT_DB} dB, got {}",
                audio.ambient_db
            );
        }
        if !(audio.sample_dur.is_finite() && audio.sample_dur > 0.0) {
            invalid!(
                "audio.sample_dur must be a positive number of seconds, got {}",
                audio.sample_dur
            );
        }
        // The analyzer needs at least the sampled duration to finish on its own.
        if !(audio.timeout.is_finite() && audio.timeout > audio.sample_dur) {
            invalid!(
                "audio.timeout ({}) must exceed audio.sample_dur ({})",
                audio.timeout,
                audio.sample_dur
            );
        }
        if audio.timeout > MAX_ANALYZER_SECS {
            invalid!(
                "audio.timeout must be at most {MAX_ANALYZER_SECS} seconds, got {}",
                audio.timeout
            );
        }
        let input_args = audio.input_argv()?;
        if input_args.len() > MAX_INPUT_ARGS {
            invalid!(
                "audio.input_args has too many entries (max {MAX_INPUT_ARGS}, got {})",
                input_args.len()
            );
        }
        self.audio.ffmpeg_cmd =
            sanitize_binary(&self.audio.ffmpeg_cmd, "audio.ffmpeg_cmd", &["ffmpeg"])?;

        let zetta = &self.zetta;
        if zetta.host.trim().is_empty() {
            invalid!("zetta.host must not be empty");
        }
        if zetta.port == 0 {
            invalid!("zetta.port must be between 1 and 65535");
        }
        if zetta.silence_message.is_empty() {
            invalid!("zetta.silence_message must not be empty");
        }
        if zetta.silence_message.contains(['\n', '\r']) {
            invalid!("zetta.silence_message must be a single line");
        }
        if zetta.reconnect_delay_ms > MAX_RECONNECT_DELAY_MS {
            invalid!(
                "zetta.reconnect_delay_ms must be at most {MAX_RECONNECT_DELAY_MS}, got {}",
                zetta.reconnect_delay_ms
            );
        }

        if let Some(url) = &self.notifications.discord {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                invalid!("notifications.discord must be an http(s) URL");
            }
        }
        if self.notifications.timeout_ms == 0 {
            invalid!("notifications.timeout_ms must be greater than zero");
        }

        Ok(())
    }
}

/// Allow either a known binary name or an existing executable path.
pub(super) fn sanitize_binary(
    value: &str,
    key: &str,
    allowlist: &[&str],
) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        invalid!("{key} cannot be empty");
    }
    if let Some(allowed) = allowlist
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(trimmed))
    {
        return Ok((*allowed).to_string());
    }

    let path = Path::new(trimmed);
    if path.is_absolute() || trimmed.contains(std::path::MAIN_SEPARATOR) {
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(err) => invalid!("failed to canonicalize {key} '{trimmed}': {err}"),
        };
        let metadata = match fs::metadata(&canonical) {
            Ok(metadata) => metadata,
            Err(err) => invalid!("failed to inspect {key} '{}': {err}", canonical.display()),
        };
        if !metadata.is_file() {
            invalid!("{key} '{}' is not a file", canonical.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                invalid!(
                    "{key} '{}' exists but is not executable (mode {:o})",
                    canonical.display(),
                    mode
                );
            }
        }
        return match canonical.to_str() {
            Some(text) => Ok(text.to_string()),
            None => invalid!("{key} must be valid UTF-8"),
        };
    }

    invalid!("{key} must be one of {allowlist:?} or an existing binary path");
}
