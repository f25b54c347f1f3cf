use super::*;

use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/complaints.db"),
        "sqlite://./data/complaints.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:data\\complaints.db"),
        "sqlite://data/complaints.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn creates_parent_dir_for_relative_sqlite_url() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("complaint_desk_server_test_{suffix}"));
    let db_path = temp_root.join("data").join("complaints.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.join("data").exists());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn file_settings_override_defaults() {
    let raw = r#"
bind_addr = "0.0.0.0:9000"
webhook_url = "https://hooks.example.org/whatsapp"
dispatch_delay_ms = "250"
"#;
    let file_cfg: HashMap<String, String> = toml::from_str(raw).expect("toml");
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, &file_cfg);

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.dispatch_delay_ms, 250);
    let webhook = settings.webhook_config().expect("webhook");
    assert_eq!(
        webhook.url.as_ref().map(Url::as_str),
        Some("https://hooks.example.org/whatsapp")
    );
    assert_eq!(webhook.recipient_delay, Duration::from_millis(250));
}

#[test]
fn blank_webhook_url_leaves_dispatch_unconfigured() {
    let settings = Settings {
        webhook_url: Some("   ".into()),
        ..Settings::default()
    };
    assert!(settings.webhook_config().expect("config").url.is_none());
}

#[test]
fn malformed_or_non_http_webhook_url_is_rejected() {
    for raw in ["not a url", "ftp://hooks.example.org/x"] {
        let settings = Settings {
            webhook_url: Some(raw.into()),
            ..Settings::default()
        };
        assert!(settings.webhook_config().is_err(), "{raw} accepted");
    }
}

#[test]
fn dev_jwt_secret_is_detected() {
    assert!(Settings::default().uses_dev_jwt_secret());
    let blank = Settings {
        jwt_secret: "  ".into(),
        ..Settings::default()
    };
    assert!(blank.uses_dev_jwt_secret());
    let configured = Settings {
        jwt_secret: "a-long-random-secret".into(),
        ..Settings::default()
    };
    assert!(!configured.uses_dev_jwt_secret());
}

#[test]
fn utc_offset_is_read_from_file_and_validated() {
    let file_cfg: HashMap<String, String> =
        toml::from_str(r#"utc_offset_minutes = "-180""#).expect("toml");
    let mut settings = Settings::default();
    apply_file_settings(&mut settings, &file_cfg);
    assert_eq!(
        settings.local_offset().expect("offset"),
        FixedOffset::west_opt(3 * 3600).expect("offset")
    );

    let out_of_range = Settings {
        utc_offset_minutes: 24 * 60,
        ..Settings::default()
    };
    assert!(out_of_range.local_offset().is_err());
}
