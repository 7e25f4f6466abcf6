//! Gateway configuration loaded from `config/cardiosense.toml` and the environment.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | API_URL | http://localhost:8000 | Base URL of the prediction/LLM backend. |
//! | API_AVAILABLE | true | Only the literal `false` switches the client to mock mode. |
//! | APP_URL | http://localhost:3000 | Public origin used to build shareable links. |
//! | SUPABASE_URL | (empty) | Auth + table API origin. |
//! | SUPABASE_ANON_KEY | (empty) | Sent as `apikey` on every auth/table call. |
//! | CARDIOSENSE_ENV | development | `production` turns on `Secure` cookies. |
//!
//! Nested keys can also be set as `CARDIOSENSE__<FIELD>` (e.g. `CARDIOSENSE__PORT=9000`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_APP_URL: &str = "http://localhost:3000";

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_app_url() -> String {
    DEFAULT_APP_URL.to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage_path() -> String {
    "./data".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prediction/LLM backend base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// When false every API call returns its mock payload.
    #[serde(default = "default_true")]
    pub api_available: bool,
    /// Public app origin for `/shared/{token}` links.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default)]
    pub supabase_url: String,
    #[serde(default)]
    pub supabase_anon_key: String,
    /// Production mode: `Secure` auth cookies.
    #[serde(default)]
    pub production: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base directory for the sled draft store and the embedded record store.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Use the embedded sled record store instead of the remote table API.
    #[serde(default)]
    pub local_records: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_available: true,
            app_url: default_app_url(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            production: false,
            bind_addr: default_bind_addr(),
            port: default_port(),
            storage_path: default_storage_path(),
            local_records: false,
        }
    }
}

impl AppConfig {
    /// Load from file and environment. Precedence: flat legacy env > `CARDIOSENSE__*` env >
    /// file at `CARDIOSENSE_CONFIG` (default `config/cardiosense`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CARDIOSENSE_CONFIG").unwrap_or_else(|_| "config/cardiosense".to_string());
        let builder = config::Config::builder()
            .set_default("api_url", DEFAULT_API_URL)?
            .set_default("api_available", true)?
            .set_default("app_url", DEFAULT_APP_URL)?
            .set_default("port", i64::from(default_port()))?
            .set_default("storage_path", default_storage_path())?;

        let built = builder
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("CARDIOSENSE").separator("__"))
            .build()?;

        let cfg: AppConfig = built.try_deserialize()?;
        Ok(cfg.with_legacy_env())
    }

    /// Overlay the flat variables (`API_URL`, `API_AVAILABLE`, ...) from the process environment.
    pub fn with_legacy_env(self) -> Self {
        self.overlay_from(|name| std::env::var(name).ok())
    }

    /// Overlay flat variables from an arbitrary lookup. Unset or blank values keep the current field.
    pub fn overlay_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = get("API_URL") {
            self.api_url = v;
        }
        if let Some(v) = get("API_AVAILABLE") {
            self.api_available = v != "false";
        }
        if let Some(v) = get("APP_URL") {
            self.app_url = v;
        }
        if let Some(v) = get("SUPABASE_URL") {
            self.supabase_url = v;
        }
        if let Some(v) = get("SUPABASE_ANON_KEY") {
            self.supabase_anon_key = v;
        }
        if let Some(v) = get("CARDIOSENSE_ENV") {
            self.production = v.eq_ignore_ascii_case("production");
        }
        self
    }

    /// Backend base URL without a trailing slash.
    pub fn api_base(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn drafts_path(&self) -> PathBuf {
        Path::new(&self.storage_path).join("drafts")
    }

    pub fn records_path(&self) -> PathBuf {
        Path::new(&self.storage_path).join("records")
    }
}
