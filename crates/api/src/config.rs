//! Process configuration, read once at startup from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

use lotsync_core::{TeamId, UserId};
use lotsync_infra::{StatsCacheConfig, TransferConfig};
use lotsync_observability::LogFormat;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_REDIS_CHANNEL: &str = "lotsync:mutations";

/// Cross-instance relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    /// Origin stamped on hub events; distinguishes instances behind the relay.
    pub instance_id: String,
    pub log_format: LogFormat,
    pub stats: StatsCacheConfig,
    pub transfer: TransferConfig,
    /// Postgres store when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub redis: Option<RedisConfig>,
    /// Explicit approvers per source team; empty means anyone but the requester.
    pub approvers: Vec<(TeamId, UserId)>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            instance_id: Uuid::now_v7().to_string(),
            log_format: LogFormat::default(),
            stats: StatsCacheConfig::default(),
            transfer: TransferConfig::default(),
            database_url: None,
            redis: None,
            approvers: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind = get("LOTSYNC_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .context("LOTSYNC_BIND must be a socket address such as 0.0.0.0:8080")?;

        let mut stats = StatsCacheConfig::default();
        if let Some(raw) = get("LOTSYNC_STATS_TTL_SECS") {
            let secs: u64 = raw.parse().context("LOTSYNC_STATS_TTL_SECS must be a number of seconds")?;
            stats.ttl = Duration::from_secs(secs);
        }

        let mut transfer = TransferConfig::default();
        if let Some(raw) = get("LOTSYNC_APPROVE_TIMEOUT_MS") {
            let ms: u64 = raw
                .parse()
                .context("LOTSYNC_APPROVE_TIMEOUT_MS must be a number of milliseconds")?;
            anyhow::ensure!(ms > 0, "LOTSYNC_APPROVE_TIMEOUT_MS must be positive");
            transfer.approve_timeout = Duration::from_millis(ms);
        }

        let log_format = match get("LOTSYNC_LOG_FORMAT") {
            Some(raw) => raw.parse::<LogFormat>().context("invalid LOTSYNC_LOG_FORMAT")?,
            None => LogFormat::default(),
        };

        let redis = get("REDIS_URL").map(|url| RedisConfig {
            url,
            channel: get("LOTSYNC_REDIS_CHANNEL").unwrap_or_else(|| DEFAULT_REDIS_CHANNEL.to_string()),
        });

        let approvers = match get("LOTSYNC_APPROVERS") {
            Some(raw) => parse_approvers(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            bind,
            instance_id: get("LOTSYNC_INSTANCE_ID").unwrap_or_else(|| Uuid::now_v7().to_string()),
            log_format,
            stats,
            transfer,
            database_url: get("DATABASE_URL"),
            redis,
            approvers,
        })
    }
}

/// `team:user` pairs separated by commas.
fn parse_approvers(raw: &str) -> Result<Vec<(TeamId, UserId)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (team, user) = entry
                .split_once(':')
                .with_context(|| format!("LOTSYNC_APPROVERS entry {entry:?} must be team_id:user_id"))?;
            let team = team
                .trim()
                .parse::<TeamId>()
                .with_context(|| format!("invalid team id in LOTSYNC_APPROVERS entry {entry:?}"))?;
            let user = user
                .trim()
                .parse::<UserId>()
                .with_context(|| format!("invalid user id in LOTSYNC_APPROVERS entry {entry:?}"))?;
            Ok((team, user))
        })
        .collect()
}
