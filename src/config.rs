//! Service configuration.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables. Every section has defaults, so running without a
//! file is valid:
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [rate_limit]
//! requests = 100
//! window_secs = 60
//!
//! [auth]
//! mode = "strict"
//! api_key = "secret"
//!
//! [tracker]
//! project_root = "/srv/project"
//! default_max_files = 200
//! ```
//!
//! Environment overrides are applied by [`Config::apply_env`], which takes a
//! lookup function instead of reading the process environment directly.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relative location of the campaign directory under the project root.
pub const CAMPAIGNS_SUBDIR: &str = "scenarios/visited-tracker/data/campaigns";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests")]
    pub requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs)
    }
}

fn default_requests() -> usize {
    100
}
/// Upper bound for the rate-limit window: one day.
pub const MAX_WINDOW_SECS: f64 = 86_400.0;

fn default_window_secs() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Disabled,
    Strict,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_ui_port")]
    pub ui_port: u16,
    /// Reflect any request origin back (development only).
    #[serde(default)]
    pub mirror_origin: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            ui_port: default_ui_port(),
            mirror_origin: false,
        }
    }
}

impl CorsConfig {
    /// Configured origins, or the local UI origins when none are configured.
    pub fn origins(&self) -> Vec<String> {
        if !self.allowed_origins.is_empty() {
            return self.allowed_origins.clone();
        }
        vec![
            format!("http://localhost:{}", self.ui_port),
            format!("http://127.0.0.1:{}", self.ui_port),
        ]
    }
}

fn default_ui_port() -> u16 {
    38440
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosticsConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    /// Overrides `<project_root>/scenarios/visited-tracker/data/campaigns`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_max_files")]
    pub default_max_files: usize,
    #[serde(default)]
    pub lifecycle_managed: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            data_dir: None,
            default_max_files: default_max_files(),
            lifecycle_managed: false,
        }
    }
}

impl TrackerConfig {
    pub fn project_root(&self) -> PathBuf {
        match &self.project_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn campaigns_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => self.project_root().join(CAMPAIGNS_SUBDIR),
        }
    }
}

fn default_max_files() -> usize {
    200
}

impl Config {
    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = get("PORT").or_else(|| get("API_PORT")) {
            self.server.port = port
                .parse()
                .with_context(|| format!("invalid port: {}", port))?;
        }

        if let Some(url) = get("DATABASE_URL") {
            self.diagnostics.database_url = Some(url);
        } else if let Some(host) = get("POSTGRES_HOST") {
            let port = get("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string());
            let user = get("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string());
            let db = get("POSTGRES_DB").unwrap_or_else(|| "postgres".to_string());
            let sslmode = get("POSTGRES_SSLMODE").unwrap_or_else(|| "disable".to_string());
            let credentials = match get("POSTGRES_PASSWORD") {
                Some(password) => format!("{}:{}", user, password),
                None => user,
            };
            self.diagnostics.database_url = Some(format!(
                "postgres://{}@{}:{}/{}?sslmode={}",
                credentials, host, port, db, sslmode
            ));
        }

        if let Some(requests) = get("RATE_LIMIT_REQUESTS") {
            self.rate_limit.requests = requests
                .parse()
                .with_context(|| format!("invalid RATE_LIMIT_REQUESTS: {}", requests))?;
        }
        if let Some(secs) = get("RATE_LIMIT_WINDOW_SECONDS") {
            self.rate_limit.window_secs = secs
                .parse()
                .with_context(|| format!("invalid RATE_LIMIT_WINDOW_SECONDS: {}", secs))?;
        } else if let Some(window) = get("RATE_LIMIT_WINDOW") {
            self.rate_limit.window_secs = parse_window(&window)?;
        }

        if let Some(mode) = get("AUTH_MODE") {
            if mode.eq_ignore_ascii_case("strict") {
                self.auth.mode = AuthMode::Strict;
            }
        }
        if let Some(key) = get("NETWORK_TOOLS_API_KEY") {
            self.auth.api_key = Some(key);
        }
        match get("VROOLI_ENV").as_deref() {
            Some("production") => self.auth.mode = AuthMode::Strict,
            Some("development") => {
                self.auth.mode = AuthMode::Disabled;
                self.cors.mirror_origin = true;
            }
            _ => {}
        }

        if let Some(origins) = get("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(port) = get("UI_PORT") {
            self.cors.ui_port = port
                .parse()
                .with_context(|| format!("invalid UI_PORT: {}", port))?;
        }

        if let Some(root) = get("VROOLI_ROOT") {
            self.tracker.project_root = Some(PathBuf::from(root));
        }
        if let Some(managed) = get("VROOLI_LIFECYCLE_MANAGED") {
            self.tracker.lifecycle_managed = managed == "true";
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let window = self.rate_limit.window_secs;
        if !(window > 0.0 && window <= MAX_WINDOW_SECS) {
            bail!(
                "rate_limit.window_secs must be > 0 and at most {} (got {})",
                MAX_WINDOW_SECS,
                window
            );
        }
        if self.tracker.default_max_files == 0 {
            bail!("tracker.default_max_files must be > 0");
        }
        if self.diagnostics.default_timeout_ms == 0 {
            bail!("diagnostics.default_timeout_ms must be > 0");
        }
        Ok(())
    }
}

/// Parses a window given as whole seconds or with an `ms`, `s`, `m` or `h` suffix.
pub fn parse_window(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let (number, scale) = if let Some(n) = raw.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = raw.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (raw, 1.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("invalid rate limit window: {}", raw))?;
    Ok(value * scale)
}

/// Loads configuration from an optional TOML file plus the process environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}
