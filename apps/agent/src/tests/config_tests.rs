use super::{apply_env, load_settings, parse_settings, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn file_values_override_defaults() {
    let settings = parse_settings(
        r#"
controller_url = "ws://10.0.0.5:16621"
request_timeout_ms = 2500
cast_connections = ["vmix"]
"#,
    )
    .expect("valid toml");

    assert_eq!(settings.controller_url, "ws://10.0.0.5:16621");
    assert_eq!(settings.request_timeout_ms, 2500);
    assert_eq!(settings.reconnect_unit_ms, Settings::default().reconnect_unit_ms);
    assert_eq!(settings.cast_connections, Some(vec!["vmix".to_string()]));
}

#[test]
fn prefixed_env_wins_over_plain_env() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        lookup(&[
            ("CONTROLLER_URL", "ws://plain:1"),
            ("APP__CONTROLLER_URL", "ws://prefixed:2"),
            ("APP__RECONNECT_UNIT_MS", "250"),
            ("APP__LOG_FILTER", "client_core=debug"),
        ]),
    );

    assert_eq!(settings.controller_url, "ws://prefixed:2");
    assert_eq!(settings.reconnect_unit_ms, 250);
    assert_eq!(settings.log_filter, "client_core=debug");
}

#[test]
fn unparsable_numbers_keep_previous_value() {
    let mut settings = Settings::default();
    apply_env(&mut settings, lookup(&[("APP__REQUEST_TIMEOUT_MS", "soon")]));
    assert_eq!(settings.request_timeout_ms, 1000);
}

#[test]
fn client_config_carries_timings() {
    let settings = Settings {
        request_timeout_ms: 300,
        reconnect_unit_ms: 50,
        surface_id: "desk".into(),
        ..Settings::default()
    };
    let config = settings.client_config().expect("valid config");
    assert_eq!(config.request_timeout, Duration::from_millis(300));
    assert_eq!(config.reconnect_unit, Duration::from_millis(50));
    assert_eq!(config.surface_id, "desk");

    let bad = Settings {
        controller_url: "http://example.com".into(),
        ..Settings::default()
    };
    assert!(bad.client_config().is_err());
}

#[test]
fn malformed_file_is_reported() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("agent_settings_test_{suffix}.toml"));
    fs::write(&path, "request_timeout_ms = \"fast\"").expect("write settings");

    let err = load_settings(&path).expect_err("type mismatch");
    assert!(format!("{err:#}").contains("invalid settings file"));

    fs::remove_file(path).expect("cleanup");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let path = env::temp_dir().join("agent_settings_test_does_not_exist.toml");
    let settings = load_settings(&path).expect("defaults");
    assert_eq!(settings.surface_id, Settings::default().surface_id);
}
