use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use chrono::FixedOffset;
use notifier::WebhookConfig;
use serde::Deserialize;
use url::Url;

const DEV_JWT_SECRET: &str = "devsecret";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
    pub dispatch_delay_ms: u64,
    /// Offset of the municipality's local day from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/complaints.db".into(),
            jwt_secret: DEV_JWT_SECRET.into(),
            token_ttl_seconds: 8 * 3600,
            webhook_url: None,
            webhook_token: None,
            dispatch_delay_ms: 500,
            utc_offset_minutes: 0,
        }
    }
}

impl Settings {
    /// True while tokens are signed with the published development secret.
    pub fn uses_dev_jwt_secret(&self) -> bool {
        self.jwt_secret.trim().is_empty() || self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn local_offset(&self) -> anyhow::Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("invalid utc offset of {} minutes", self.utc_offset_minutes))
    }

    /// Validates the webhook URL. A missing URL leaves dispatch unconfigured.
    pub fn webhook_config(&self) -> anyhow::Result<WebhookConfig> {
        let url = self
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid webhook url '{raw}'")))
            .transpose()?;
        if let Some(url) = &url {
            anyhow::ensure!(
                matches!(url.scheme(), "http" | "https"),
                "webhook url must use http or https, got '{}'",
                url.scheme()
            );
        }

        Ok(WebhookConfig {
            url,
            bearer_token: self
                .webhook_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            recipient_delay: Duration::from_millis(self.dispatch_delay_ms),
            ..WebhookConfig::default()
        })
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_settings(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Ok(v) = std::env::var("APP__JWT_SECRET") {
        settings.jwt_secret = v;
    }
    if let Ok(v) = std::env::var("APP__TOKEN_TTL_SECONDS") {
        if let Ok(parsed) = v.parse::<i64>() {
            settings.token_ttl_seconds = parsed;
        }
    }

    if let Ok(v) = std::env::var("APP__WEBHOOK_URL") {
        settings.webhook_url = Some(v);
    }
    if let Ok(v) = std::env::var("APP__WEBHOOK_TOKEN") {
        settings.webhook_token = Some(v);
    }
    if let Ok(v) = std::env::var("APP__DISPATCH_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.dispatch_delay_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("APP__UTC_OFFSET_MINUTES") {
        if let Ok(parsed) = v.parse::<i32>() {
            settings.utc_offset_minutes = parsed;
        }
    }

    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("jwt_secret") {
        settings.jwt_secret = v.clone();
    }
    if let Some(v) = file_cfg.get("webhook_url") {
        settings.webhook_url = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("webhook_token") {
        settings.webhook_token = Some(v.clone());
    }
    if let Some(parsed) = file_cfg
        .get("dispatch_delay_ms")
        .and_then(|v| v.parse::<u64>().ok())
    {
        settings.dispatch_delay_ms = parsed;
    }
    if let Some(parsed) = file_cfg
        .get("utc_offset_minutes")
        .and_then(|v| v.parse::<i32>().ok())
    {
        settings.utc_offset_minutes = parsed;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
