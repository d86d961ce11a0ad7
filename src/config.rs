//! Client configuration loaded from the environment.
//!
//! DESIGN
//! ======
//! Every knob has a default so a bare `ClientConfig::from_env()` talks to a
//! local backend. The websocket URL is derived from the HTTP base URL: either
//! the reverse-proxied `/ws/` path on the same host, or the HTTP port plus a
//! fixed offset when the backend serves websockets on its own port.

use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:20202";
const DEFAULT_API_ROOT: &str = "/api";
const DEFAULT_WS_PORT_OFFSET: u16 = 1;
const DEFAULT_FLUSH_DELAY_MS: u64 = 200;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 15;

/// How the websocket endpoint is reached relative to the HTTP base URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WsMode {
    /// `ws://<host>/ws/` behind the same reverse proxy as HTTP.
    Proxied,
    /// `ws://<hostname>:<http port + offset>`.
    PortOffset(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP base URL of the backend, e.g. `"http://127.0.0.1:20202"`.
    pub base_url: String,
    /// Path prefix of the REST API under `base_url`.
    pub api_root: String,
    pub ws_mode: WsMode,
    /// Fixed delay of the coalescing timer for live deltas.
    pub flush_delay: Duration,
    pub http_timeout: Duration,
    /// How long `send_and_wait` waits for a correlated reply.
    pub reply_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_root: DEFAULT_API_ROOT.to_owned(),
            ws_mode: WsMode::Proxied,
            flush_delay: Duration::from_millis(DEFAULT_FLUSH_DELAY_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            reply_timeout: Duration::from_secs(DEFAULT_REPLY_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load config from `RUNBOARD_*` environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("RUNBOARD_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let api_root = std::env::var("RUNBOARD_API_ROOT")
            .ok()
            .unwrap_or_else(|| DEFAULT_API_ROOT.to_owned());
        let offset = env_parse("RUNBOARD_WS_PORT_OFFSET", DEFAULT_WS_PORT_OFFSET);
        let ws_mode = parse_ws_mode(
            std::env::var("RUNBOARD_WS_MODE").ok().as_deref(),
            offset,
        );

        Self {
            base_url,
            api_root,
            ws_mode,
            flush_delay: Duration::from_millis(env_parse(
                "RUNBOARD_FLUSH_DELAY_MS",
                DEFAULT_FLUSH_DELAY_MS,
            )),
            http_timeout: Duration::from_secs(env_parse(
                "RUNBOARD_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            reply_timeout: Duration::from_secs(env_parse(
                "RUNBOARD_REPLY_TIMEOUT_SECS",
                DEFAULT_REPLY_TIMEOUT_SECS,
            )),
        }
    }

    /// Base URL of the REST API, without a trailing slash.
    #[must_use]
    pub fn api_base(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_root.trim_end_matches('/')
        )
    }

    /// Websocket URL derived from the base URL and [`WsMode`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] when the base URL is not
    /// `http(s)://host[:port]`.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let trimmed = self.base_url.trim_end_matches('/');
        let (scheme, rest) = if let Some(rest) = trimmed.strip_prefix("http://") {
            ("ws", rest)
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            ("wss", rest)
        } else {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        };
        let host = rest.split('/').next().unwrap_or_default();
        if host.is_empty() {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }

        match self.ws_mode {
            WsMode::Proxied => Ok(format!("{scheme}://{host}/ws/")),
            WsMode::PortOffset(offset) => {
                let (hostname, port) = split_host_port(host, scheme)
                    .ok_or_else(|| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
                let port = port
                    .checked_add(offset)
                    .ok_or_else(|| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
                Ok(format!("{scheme}://{hostname}:{port}"))
            }
        }
    }
}

fn parse_ws_mode(raw: Option<&str>, offset: u16) -> WsMode {
    match raw.map(str::trim) {
        Some("port-offset" | "port_offset" | "offset") => WsMode::PortOffset(offset),
        _ => WsMode::Proxied,
    }
}

fn split_host_port<'a>(host: &'a str, scheme: &str) -> Option<(&'a str, u16)> {
    match host.rsplit_once(':') {
        Some((name, port)) => Some((name, port.parse().ok()?)),
        None => Some((host, if scheme == "wss" { 443 } else { 80 })),
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
