use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub clickhouse: ClickHouseConfig,
    pub api_key: Option<String>,
    pub default_limit: u64,
    pub max_limit: u64,
    pub adhoc_default_limit: u64,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    chmon_listen_addr: Option<String>,
    #[serde(default)]
    chmon_listen_host: Option<String>,
    #[serde(default)]
    chmon_listen_port: Option<u16>,
    #[serde(default)]
    chmon_clickhouse_url: Option<String>,
    #[serde(default)]
    clickhouse_url: Option<String>,
    #[serde(default = "default_user")]
    chmon_clickhouse_user: String,
    #[serde(default)]
    chmon_clickhouse_password: Option<String>,
    #[serde(default = "default_database")]
    chmon_clickhouse_database: String,
    #[serde(default)]
    chmon_api_key: Option<String>,
    #[serde(default = "default_limit")]
    chmon_default_limit: u64,
    #[serde(default = "default_max_limit")]
    chmon_max_limit: u64,
    #[serde(default = "default_adhoc_limit")]
    chmon_adhoc_default_limit: u64,
    #[serde(default = "default_timeout_secs")]
    chmon_request_timeout_secs: u64,
}

fn default_user() -> String {
    "default".to_string()
}

fn default_database() -> String {
    "system".to_string()
}

const fn default_limit() -> u64 {
    100
}

const fn default_max_limit() -> u64 {
    1000
}

const fn default_adhoc_limit() -> u64 {
    1000
}

const fn default_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse CHMON_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.chmon_listen_addr,
            raw.chmon_listen_host,
            raw.chmon_listen_port,
        )?;

        let url = raw
            .chmon_clickhouse_url
            .or(raw.clickhouse_url)
            .or_else(|| env::var("CLICKHOUSE_URL").ok())
            .context("CHMON_CLICKHOUSE_URL or CLICKHOUSE_URL must be set")?;

        let password = raw
            .chmon_clickhouse_password
            .filter(|value| !value.is_empty());

        let default_limit = raw.chmon_default_limit.max(1);

        Ok(Self {
            listen_addr,
            clickhouse: ClickHouseConfig {
                url,
                user: raw.chmon_clickhouse_user,
                password,
                database: raw.chmon_clickhouse_database,
            },
            api_key: raw.chmon_api_key.filter(|key| !key.trim().is_empty()),
            default_limit,
            max_limit: raw.chmon_max_limit.max(default_limit),
            adhoc_default_limit: raw.chmon_adhoc_default_limit.max(1),
            request_timeout: Duration::from_secs(raw.chmon_request_timeout_secs.max(1)),
        })
    }

    /// Configuration for in-process use (tests, tooling) where nothing is read from the
    /// environment and no listener is bound.
    pub fn embedded(clickhouse_url: impl Into<String>) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            clickhouse: ClickHouseConfig {
                url: clickhouse_url.into(),
                user: default_user(),
                password: None,
                database: default_database(),
            },
            api_key: None,
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            adhoc_default_limit: default_adhoc_limit(),
            request_timeout: Duration::from_secs(default_timeout_secs()),
        }
    }

    /// Clamps a requested page size into `1..=max_limit`, falling back to the default.
    pub fn clamp_limit(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid CHMON_LISTEN_ADDR value")?
            .next()
            .context("CHMON_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8490);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
