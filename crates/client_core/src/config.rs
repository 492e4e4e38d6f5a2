use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use url::Url;

const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub ws_url: Option<String>,
    pub reconnect_delay: Duration,
    pub typing_idle: Duration,
    pub delivery_delay: Duration,
    pub health_interval: Duration,
    pub near_bottom_threshold: f64,
    pub state_path: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".into(),
            ws_url: None,
            reconnect_delay: Duration::from_millis(3000),
            typing_idle: Duration::from_millis(2000),
            delivery_delay: Duration::from_millis(1000),
            health_interval: Duration::from_millis(3000),
            near_bottom_threshold: 100.0,
            state_path: PathBuf::from("./texter-session.json"),
        }
    }
}

impl ClientSettings {
    /// Base address of the real-time channel: the explicit override, or the
    /// REST base with its scheme swapped to `ws`/`wss`.
    pub fn websocket_base(&self) -> Result<Url> {
        if let Some(ws_url) = &self.ws_url {
            return Url::parse(ws_url).with_context(|| format!("invalid ws_url: {ws_url}"));
        }
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url: {}", self.server_url))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(anyhow!("server_url must use http or https, got {other}")),
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot switch {} to {scheme}", self.server_url))?;
        Ok(url)
    }

    /// `/ws/{token}`; the credential travels in the address, not a header.
    pub fn channel_url(&self, token: &str) -> Result<Url> {
        let mut url = self.websocket_base()?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("websocket base cannot carry a path"))?
            .pop_if_empty()
            .push("ws")
            .push(token);
        Ok(url)
    }
}

pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_overrides(&mut settings, &raw);
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file_overrides(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        tracing::warn!(file = SETTINGS_FILE, "ignoring unparsable settings file");
        return;
    };
    for (key, value) in file_cfg {
        let value = match value {
            toml::Value::String(text) => text,
            other => other.to_string(),
        };
        apply_setting(settings, &key, &value);
    }
}

pub(crate) fn apply_env_overrides(
    settings: &mut ClientSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    const KEYS: [&str; 8] = [
        "server_url",
        "ws_url",
        "reconnect_delay_ms",
        "typing_idle_ms",
        "delivery_delay_ms",
        "health_interval_ms",
        "near_bottom_threshold",
        "state_path",
    ];

    for key in KEYS {
        let upper = key.to_ascii_uppercase();
        if let Some(v) = lookup(&format!("TEXTER_{upper}")) {
            apply_setting(settings, key, &v);
        }
        if let Some(v) = lookup(&format!("APP__{upper}")) {
            apply_setting(settings, key, &v);
        }
    }
}

fn apply_setting(settings: &mut ClientSettings, key: &str, value: &str) {
    let millis = || value.trim().parse::<u64>().ok().map(Duration::from_millis);
    match key {
        "server_url" => settings.server_url = value.trim_end_matches('/').to_string(),
        "ws_url" => settings.ws_url = Some(value.trim_end_matches('/').to_string()),
        "reconnect_delay_ms" => {
            if let Some(v) = millis() {
                settings.reconnect_delay = v;
            }
        }
        "typing_idle_ms" => {
            if let Some(v) = millis() {
                settings.typing_idle = v;
            }
        }
        "delivery_delay_ms" => {
            if let Some(v) = millis() {
                settings.delivery_delay = v;
            }
        }
        "health_interval_ms" => {
            if let Some(v) = millis() {
                settings.health_interval = v;
            }
        }
        "near_bottom_threshold" => {
            if let Ok(v) = value.trim().parse::<f64>() {
                settings.near_bottom_threshold = v;
            }
        }
        "state_path" => settings.state_path = PathBuf::from(value),
        other => tracing::debug!(key = other, "unknown client setting"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
