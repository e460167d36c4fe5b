use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("SERVER_URL must be set when FORCE_SSL is enabled")]
    MissingServerUrl,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub app_env: String,
    pub port: u16,
    /// Public URL of this relay, used in HTTPS redirects and webhook payloads.
    pub server_url: Option<String>,
    pub postgres_url: Option<String>,
    /// Origins allowed to open WebSocket connections. Empty set allows all.
    pub allowed_origins: HashSet<String>,
    pub force_ssl: bool,
    /// Per-frame WebSocket read deadline; a silent connection is dropped.
    pub read_timeout: Duration,
    /// Deadline for each WebSocket write.
    pub write_timeout: Duration,
    /// Directory of static assets to serve for unmatched GETs, if any.
    pub web_root: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config {
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            server_url: env::var("SERVER_URL").ok().filter(|s| !s.is_empty()),
            postgres_url: env::var("POSTGRES_URL").ok().filter(|s| !s.is_empty()),
            allowed_origins: parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default()),
            force_ssl: env::var("FORCE_SSL").map(|v| v == "true").unwrap_or(false),
            read_timeout: seconds_from_env("READ_TIMEOUT_SECS", 30),
            write_timeout: seconds_from_env("WRITE_TIMEOUT_SECS", 30),
            web_root: env::var("WEB_ROOT")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        };

        if config.force_ssl && config.server_url.is_none() {
            return Err(ConfigError::MissingServerUrl);
        }

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    pub fn server_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Split the space-separated ALLOWED_ORIGINS value into a set.
fn parse_origins(raw: &str) -> HashSet<String> {
    raw.split_whitespace().map(ToOwned::to_owned).collect()
}

fn seconds_from_env(name: &str, default_secs: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}
