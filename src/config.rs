//! Environment-driven configuration.
//!
//! Both binaries call `dotenvy::dotenv()` first, so a `.env` file next to the working
//! directory can provide any of these values.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_PROXY_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

const APP_DIR: &str = "image-analyser";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub session_path: PathBuf,
    /// Unset means the transport default (no explicit timeout).
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    /// Reads `API_BASE_URL`, `AUTH_STORE_PATH` and `API_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = non_empty_var("API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let session_path = match non_empty_var("AUTH_STORE_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_session_path()?,
        };

        let timeout = match non_empty_var("API_TIMEOUT_SECS") {
            Some(raw) => Some(parse_secs("API_TIMEOUT_SECS", &raw)?),
            None => None,
        };

        Ok(Self {
            base_url,
            session_path,
            timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub api_key: String,
    pub port: u16,
    pub upstream_base_url: String,
    pub model: String,
    pub static_dir: Option<PathBuf>,
}

impl ProxyConfig {
    /// Reads `OPENAI_API_KEY` (required), `PORT`, `OPENAI_BASE_URL`, `OPENAI_MODEL` and
    /// `STATIC_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = non_empty_var("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let port = match non_empty_var("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PROXY_PORT,
        };

        Ok(Self {
            api_key,
            port,
            upstream_base_url: non_empty_var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: non_empty_var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            static_dir: non_empty_var("STATIC_DIR").map(PathBuf::from),
        })
    }
}

pub fn default_session_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(APP_DIR).join(SESSION_FILE))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_secs(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        }),
    }
}
