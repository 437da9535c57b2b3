use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::Result;
use chrono::{FixedOffset, Weekday};

use crate::{
    indexer::{ChainFilter, IndexOptions, DEFAULT_MIN_EPISODES},
    parser::EpisodeCountMode,
    schedule::RefreshAnchor,
};

pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/bangumi/Archive/refs/heads/master/aux/latest.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub cache_dir: PathBuf,
    pub manifest_url: String,
    pub http_timeout: Duration,
    pub refresh_anchor: RefreshAnchor,
    pub retry_delay: Duration,
    pub refresh_on_start: bool,
    pub index_options: IndexOptions,
    pub episode_count_mode: EpisodeCountMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cache_dir: PathBuf::from("./cache"),
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            http_timeout: Duration::from_secs(600),
            refresh_anchor: RefreshAnchor::default(),
            retry_delay: Duration::from_secs(60),
            refresh_on_start: true,
            index_options: IndexOptions::default(),
            episode_count_mode: EpisodeCountMode::All,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = env_value("RELATIONS_BIND_ADDR")
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .unwrap_or(defaults.bind_addr);

        let cache_dir = env_value("RELATIONS_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let manifest_url = env_value("RELATIONS_MANIFEST_URL").unwrap_or(defaults.manifest_url);

        let http_timeout = env_parse::<u64>("RELATIONS_HTTP_TIMEOUT_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let anchor_defaults = defaults.refresh_anchor;
        let weekday = env_parse::<Weekday>("RELATIONS_REFRESH_WEEKDAY")
            .unwrap_or(anchor_defaults.weekday);
        let hour = env_parse::<u32>("RELATIONS_REFRESH_HOUR")
            .filter(|h| *h < 24)
            .unwrap_or(anchor_defaults.hour);
        let utc_offset = env_parse::<i32>("RELATIONS_REFRESH_UTC_OFFSET_HOURS")
            .and_then(|h| FixedOffset::east_opt(h * 3600))
            .unwrap_or(anchor_defaults.utc_offset);
        let grace = env_parse::<u64>("RELATIONS_REFRESH_GRACE_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(anchor_defaults.grace);

        let retry_delay = env_parse::<u64>("RELATIONS_RETRY_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_delay);

        let refresh_on_start =
            env_flag("RELATIONS_REFRESH_ON_START").unwrap_or(defaults.refresh_on_start);

        let min_episodes =
            env_parse::<u32>("RELATIONS_MIN_EPISODES").unwrap_or(DEFAULT_MIN_EPISODES);

        let chain_filter = env_value("RELATIONS_CHAIN_FILTER")
            .and_then(|v| match v.to_ascii_lowercase().as_str() {
                "stop_at_short" | "per_edge" => Some(ChainFilter::StopAtShort),
                "skip_short" | "per_path" => Some(ChainFilter::SkipShort),
                _ => None,
            })
            .unwrap_or_default();

        let episode_count_mode = env_value("RELATIONS_EPISODE_COUNT_MODE")
            .and_then(|v| match v.to_ascii_lowercase().as_str() {
                "all" => Some(EpisodeCountMode::All),
                "main_only" | "main" => Some(EpisodeCountMode::MainOnly),
                _ => None,
            })
            .unwrap_or(defaults.episode_count_mode);

        Ok(Self {
            bind_addr,
            cache_dir,
            manifest_url,
            http_timeout,
            refresh_anchor: RefreshAnchor {
                weekday,
                hour,
                utc_offset,
                grace,
            },
            retry_delay,
            refresh_on_start,
            index_options: IndexOptions {
                min_episodes,
                chain_filter,
            },
            episode_count_mode,
        })
    }
}

fn env_value(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let normalized = raw.trim().trim_matches('"').trim_matches('\'').to_string();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|v| v.parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env_value(key).map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
