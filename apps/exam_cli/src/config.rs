use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::Context;
use client_core::{normalize_api_url, DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT};
use tracing::warn;

pub const CONFIG_FILE: &str = "exam_cli.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub session_path: PathBuf,
    pub request_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            session_path: default_session_path(),
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    /// Command-line flags win over file and environment values.
    pub fn apply_overrides(&mut self, api_url: Option<String>, session_path: Option<PathBuf>) {
        if let Some(v) = api_url {
            self.api_url = v;
        }
        if let Some(v) = session_path {
            self.session_path = v;
        }
    }

    pub fn validated_api_url(&self) -> anyhow::Result<String> {
        normalize_api_url(&self.api_url)
            .with_context(|| format!("invalid API URL '{}'", self.api_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

pub fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("exam_portal")
        .join("session.json")
}

pub fn load_settings() -> Settings {
    let file = fs::read_to_string(CONFIG_FILE).ok();
    settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

fn settings_from(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<HashMap<String, String>>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.get("api_url") {
                    settings.api_url = v.clone();
                }
                if let Some(v) = file_cfg.get("session_path") {
                    settings.session_path = PathBuf::from(v);
                }
                if let Some(v) = file_cfg.get("request_timeout_seconds") {
                    set_timeout(&mut settings, v);
                }
            }
            Err(err) => warn!(file = CONFIG_FILE, error = %err, "config: ignoring unreadable file"),
        }
    }

    if let Some(v) = env("EXAM_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = env("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = env("EXAM_SESSION_PATH") {
        settings.session_path = PathBuf::from(v);
    }
    if let Some(v) = env("APP__SESSION_PATH") {
        settings.session_path = PathBuf::from(v);
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECONDS") {
        set_timeout(&mut settings, &v);
    }

    settings
}

fn set_timeout(settings: &mut Settings, raw: &str) {
    match raw.trim().parse::<u64>() {
        Ok(parsed) => settings.request_timeout_seconds = parsed,
        Err(_) => warn!(value = raw, "config: request timeout is not a whole number of seconds"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
