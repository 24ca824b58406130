use super::load::{deep_merge, resolve_env_refs};
use super::validation::sanitize_binary;
use super::{
    load_settings, AppConfig, ConfigError, ConfigPaths, DeliveryMode, LogFormat, Settings,
};
use clap::Parser;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use toml::{Table, Value};

const BASE: &str = r#"
[general]
stream_url = { env = "WINSTON_STREAM_URL" }

[zetta]
host = { env = "ZETTA_HOST" }
port = 10001
silence_message = "SILENCE"

[audio]
ambient_db = -50.0
samples = 10
sample_dur = 5
timeout = 15.0
threshold = 0.6

[notifications]
discord = { env = "WINSTON_DISCORD_WEBHOOK", optional = true }
"#;

fn write_files(base: &str, user: Option<&str>) -> (TempDir, ConfigPaths) {
    let dir = tempfile::tempdir().expect("tempdir");
    let defaults = dir.path().join("config-default.toml");
    fs::write(&defaults, base).expect("write base");
    let user_path = dir.path().join("config.toml");
    if let Some(user) = user {
        fs::write(&user_path, user).expect("write user");
    }
    (
        dir,
        ConfigPaths {
            defaults,
            user: user_path,
        },
    )
}

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

fn standard_env() -> impl Fn(&str) -> Option<String> {
    env_of(&[
        ("WINSTON_STREAM_URL", "https://radio.example/live.mp3"),
        ("ZETTA_HOST", "10.0.0.5"),
    ])
}

fn load(base: &str, user: Option<&str>) -> Result<Settings, ConfigError> {
    let (_dir, paths) = write_files(base, user);
    load_settings(&paths, standard_env())
}

#[test]
fn loads_base_document_with_env_references() {
    let settings = load(BASE, None).expect("settings");
    assert_eq!(settings.general.stream_url, "https://radio.example/live.mp3");
    assert_eq!(settings.zetta.host, "10.0.0.5");
    assert_eq!(settings.zetta.port, 10001);
    assert_eq!(settings.zetta.mode, DeliveryMode::Persistent);
    assert_eq!(settings.audio.samples, 10);
    assert_eq!(settings.audio.sample_dur, 5.0);
    assert_eq!(settings.audio.ffmpeg_cmd, "ffmpeg");
    assert!(settings.notifications.discord.is_none());
    assert_eq!(settings.notifications.timeout_ms, super::DEFAULT_ALERT_TIMEOUT_MS);
}

#[test]
fn missing_base_document_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = ConfigPaths {
        defaults: dir.path().join("nope.toml"),
        user: dir.path().join("config.toml"),
    };
    let err = load_settings(&paths, standard_env()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingDefaults(_)));
    assert!(err.to_string().contains("nope.toml is missing"));
}

#[test]
fn user_document_overrides_single_keys() {
    let user = r#"
[zetta]
port = 9000
mode = "per_event"

[audio]
threshold = 0.8
"#;
    let settings = load(BASE, Some(user)).expect("settings");
    assert_eq!(settings.zetta.port, 9000);
    assert_eq!(settings.zetta.mode, DeliveryMode::PerEvent);
    assert_eq!(settings.zetta.silence_message, "SILENCE");
    assert_eq!(settings.audio.threshold, 0.8);
    assert_eq!(settings.audio.samples, 10);
}

#[test]
fn user_document_can_replace_env_reference_with_literal() {
    let user = r#"
[general]
stream_url = "http://local/stream"
"#;
    let (_dir, paths) = write_files(BASE, Some(user));
    let settings = load_settings(&paths, env_of(&[("ZETTA_HOST", "zetta")])).expect("settings");
    assert_eq!(settings.general.stream_url, "http://local/stream");
}

#[test]
fn missing_required_env_names_the_variable() {
    let (_dir, paths) = write_files(BASE, None);
    let err = load_settings(&paths, env_of(&[("ZETTA_HOST", "zetta")])).unwrap_err();
    match &err {
        ConfigError::MissingEnv { section, key, var } => {
            assert_eq!(section, "general");
            assert_eq!(key, "stream_url");
            assert_eq!(var, "WINSTON_STREAM_URL");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("WINSTON_STREAM_URL"));
}

#[test]
fn empty_env_value_counts_as_unset() {
    let (_dir, paths) = write_files(BASE, None);
    let env = env_of(&[("WINSTON_STREAM_URL", ""), ("ZETTA_HOST", "zetta")]);
    assert!(matches!(
        load_settings(&paths, env),
        Err(ConfigError::MissingEnv { .. })
    ));
}

#[test]
fn optional_env_reference_resolves_when_set() {
    let (_dir, paths) = write_files(BASE, None);
    let env = env_of(&[
        ("WINSTON_STREAM_URL", "http://s"),
        ("ZETTA_HOST", "zetta"),
        ("WINSTON_DISCORD_WEBHOOK", "https://discord.example/hook"),
    ]);
    let settings = load_settings(&paths, env).expect("settings");
    assert_eq!(
        settings.notifications.discord.as_deref(),
        Some("https://discord.example/hook")
    );
}

#[test]
fn numeric_settings_accept_env_strings() {
    let base = BASE.replace("port = 10001", "port = { env = \"ZETTA_PORT\" }");
    let (_dir, paths) = write_files(&base, None);
    let env = env_of(&[
        ("WINSTON_STREAM_URL", "http://s"),
        ("ZETTA_HOST", "zetta"),
        ("ZETTA_PORT", "7001"),
    ]);
    let settings = load_settings(&paths, env).expect("settings");
    assert_eq!(settings.zetta.port, 7001);
}

#[test]
fn non_numeric_env_string_is_invalid() {
    let base = BASE.replace("port = 10001", "port = { env = \"ZETTA_PORT\" }");
    let (_dir, paths) = write_files(&base, None);
    let env = env_of(&[
        ("WINSTON_STREAM_URL", "http://s"),
        ("ZETTA_HOST", "zetta"),
        ("ZETTA_PORT", "seven"),
    ]);
    match load_settings(&paths, env) {
        Err(ConfigError::Invalid { section, .. }) => assert_eq!(section, "zetta"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn missing_section_is_reported() {
    let base = BASE.replace("[notifications]", "[other]");
    match load(&base, None) {
        Err(ConfigError::MissingSection(name)) => assert_eq!(name, "notifications"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn missing_key_is_invalid_section() {
    let base = BASE.replace("silence_message = \"SILENCE\"\n", "");
    match load(&base, None) {
        Err(ConfigError::Invalid { section, .. }) => assert_eq!(section, "zetta"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn malformed_toml_reports_path() {
    let err = load("[general\n", None).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config-default.toml"));
}

#[test]
fn deep_merge_recurses_into_tables_and_replaces_scalars() {
    let mut base: Table = "a = 1\n[t]\nx = 1\ny = [1, 2]\n".parse().unwrap();
    let overlay: Table = "a = \"s\"\n[t]\ny = [3]\nz = true\n".parse().unwrap();
    deep_merge(&mut base, overlay);
    assert_eq!(base["a"], Value::String("s".into()));
    let t = base["t"].as_table().unwrap();
    assert_eq!(t["x"], Value::Integer(1));
    assert_eq!(t["y"], Value::Array(vec![Value::Integer(3)]));
    assert_eq!(t["z"], Value::Boolean(true));
}

#[test]
fn plain_tables_without_env_key_are_left_alone() {
    let mut table: Table = "nested = { value = 3 }\n".parse().unwrap();
    resolve_env_refs("general", &mut table, &|_: &str| None).expect("resolve");
    assert_eq!(table["nested"]["value"], Value::Integer(3));
}

#[test]
fn validate_accepts_defaults() {
    let mut settings = load(BASE, None).expect("settings");
    assert!(settings.validate().is_ok());
}

#[test]
fn validate_rejects_timeout_not_exceeding_sample_duration() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.timeout = settings.audio.sample_dur;
    assert!(settings.validate().is_err());
}

#[test]
fn validate_rejects_analyzer_durations_past_an_hour() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.timeout = 1e20;
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("audio.timeout"), "{err}");

    let mut settings = load(BASE, None).expect("settings");
    settings.audio.sample_dur = 1e20;
    settings.audio.timeout = 2e20;
    assert!(settings.validate().is_err());

    let mut settings = load(BASE, None).expect("settings");
    settings.audio.sample_dur = 3_000.0;
    settings.audio.timeout = 3_600.0;
    settings.validate().expect("an hour is allowed");
    assert_eq!(settings.audio.analyzer_timeout(), Duration::from_secs(3_600));
    assert_eq!(settings.audio.sample_duration(), Duration::from_secs(3_000));
}

#[test]
fn validate_rejects_threshold_out_of_range() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.threshold = -0.1;
    assert!(settings.validate().is_err());
    settings.audio.threshold = 1.0;
    assert!(settings.validate().is_err());
    settings.audio.threshold = 0.0;
    assert!(settings.validate().is_ok());
}

#[test]
fn validate_rejects_empty_window() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.samples = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn validate_rejects_ambient_level_above_full_scale() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.ambient_db = 3.0;
    assert!(settings.validate().is_err());
}

#[test]
fn validate_rejects_zero_port_and_multiline_message() {
    let mut settings = load(BASE, None).expect("settings");
    settings.zetta.port = 0;
    assert!(settings.validate().is_err());

    let mut settings = load(BASE, None).expect("settings");
    settings.zetta.silence_message = "A\nB".into();
    assert!(settings.validate().is_err());
}

#[test]
fn validate_rejects_non_http_webhook() {
    let mut settings = load(BASE, None).expect("settings");
    settings.notifications.discord = Some("ftp://nope".into());
    assert!(settings.validate().is_err());
}

#[test]
fn validate_rejects_unbalanced_input_args() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.input_args = Some("-headers \"X: y".into());
    assert!(settings.validate().is_err());
}

#[test]
fn input_argv_splits_shell_words() {
    let mut settings = load(BASE, None).expect("settings");
    settings.audio.input_args = Some("-reconnect 1 -user_agent \"Winston Monitor\"".into());
    assert_eq!(
        settings.audio.input_argv().unwrap(),
        vec!["-reconnect", "1", "-user_agent", "Winston Monitor"]
    );
    settings.audio.input_args = Some("   ".into());
    assert!(settings.audio.input_argv().unwrap().is_empty());
}

#[test]
fn sanitize_binary_accepts_allowlisted_name() {
    assert_eq!(
        sanitize_binary("FFMPEG", "audio.ffmpeg_cmd", &["ffmpeg"]).unwrap(),
        "ffmpeg"
    );
}

#[test]
fn sanitize_binary_rejects_unknown_name() {
    assert!(sanitize_binary("avconv", "audio.ffmpeg_cmd", &["ffmpeg"]).is_err());
    assert!(sanitize_binary("  ", "audio.ffmpeg_cmd", &["ffmpeg"]).is_err());
}

#[cfg(unix)]
#[test]
fn sanitize_binary_checks_executable_bit() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("fake-ffmpeg");
    fs::write(&script, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
    let value = script.to_str().unwrap();
    assert!(sanitize_binary(value, "audio.ffmpeg_cmd", &["ffmpeg"]).is_err());

    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    let sanitized = sanitize_binary(value, "audio.ffmpeg_cmd", &["ffmpeg"]).unwrap();
    assert!(Path::new(&sanitized).is_absolute());
}

#[test]
fn cli_defaults_point_at_working_directory_files() {
    let cfg = AppConfig::parse_from(["winston"]);
    assert_eq!(cfg.default_config, Path::new("config-default.toml"));
    assert_eq!(cfg.user_config, Path::new("config.toml"));
    assert_eq!(cfg.log_format, LogFormat::Text);
    assert!(!cfg.check);
}

#[test]
fn cli_accepts_json_logs_and_check() {
    let cfg = AppConfig::parse_from(["winston", "--log-format", "json", "--check"]);
    assert_eq!(cfg.log_format, LogFormat::Json);
    assert!(cfg.check);
}

#[test]
fn write_timeout_zero_means_disabled() {
    let mut settings = load(BASE, None).expect("settings");
    settings.zetta.write_timeout_ms = Some(0);
    assert!(settings.zetta.write_timeout().is_none());
    settings.zetta.write_timeout_ms = Some(250);
    assert_eq!(
        settings.zetta.write_timeout(),
        Some(Duration::from_millis(250))
    );
}
