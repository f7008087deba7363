//! Process configuration read from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::commands::music::utils::music_manager::MusicLimits;
use crate::utils::statistics::StatsPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid audio node address: {0}")]
    NodeUrl(#[from] url::ParseError),
}

/// Which shard of how many this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub id: u32,
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct LavalinkConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
}

impl LavalinkConfig {
    /// Base URL for the node's REST API.
    pub fn rest_url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.secure { "https" } else { "http" };
        Ok(Url::parse(&format!("{}://{}:{}", scheme, self.host, self.port))?)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_path: String,
    pub lavalink: LavalinkConfig,
    pub redis_url: Option<String>,
    pub shards: Option<ShardRange>,
    pub limits: MusicLimits,
    pub settings_ttl: Duration,
    pub stats: StatsPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let discord_token = var("DISCORD_TOKEN").ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let lavalink = LavalinkConfig {
            host: var("LAVALINK_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse_or(&var, "LAVALINK_PORT", 2333)?,
            password: var("LAVALINK_PASSWORD").unwrap_or_else(|| "youshallnotpass".to_string()),
            secure: parse_or(&var, "LAVALINK_SECURE", false)?,
        };
        lavalink.rest_url()?;

        let shards = match (var("SHARD_ID"), var("SHARD_COUNT")) {
            (Some(id), Some(count)) => {
                let id: u32 = parse_value("SHARD_ID", &id)?;
                let count: u32 = parse_value("SHARD_COUNT", &count)?;
                if count == 0 || id >= count {
                    return Err(ConfigError::Invalid {
                        name: "SHARD_ID",
                        value: id.to_string(),
                    });
                }
                Some(ShardRange { id, count })
            }
            _ => None,
        };

        let limits = MusicLimits {
            max_volume: parse_or(&var, "MAX_VOLUME", 100)?,
            search_results: parse_or(&var, "SEARCH_RESULTS", 5)?,
            resolve_attempts: parse_or(&var, "RESOLVE_ATTEMPTS", 3)?,
            vote_url: var("VOTE_URL"),
        };
        if limits.max_volume == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_VOLUME",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            discord_token,
            database_path: var("DATABASE_PATH").unwrap_or_else(|| "ensemble.db".to_string()),
            lavalink,
            redis_url: var("REDIS_URL"),
            shards,
            limits,
            settings_ttl: Duration::from_secs(parse_or(&var, "SETTINGS_CACHE_TTL_SECS", 60)?),
            stats: StatsPolicy {
                batch_size: parse_or(&var, "STATS_BATCH_SIZE", 50)?,
                flush_interval: Duration::from_secs(parse_or(&var, "STATS_FLUSH_SECS", 60)?),
                buffer_cap: parse_or(&var, "STATS_BUFFER_CAP", 1000)?,
            },
        })
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}
