//! Runtime settings gathered from the environment (and `.env`).
use std::time::Duration;

use anyhow::Result;

use crate::steam::session::SessionConfig;
use crate::util::env::{env_flag, env_opt, env_parse, env_parse_opt, env_req, preflight_check};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/promotions.db";
pub const DEFAULT_SCHEDULE: &str = "0 */15 * * * *";

const LOGGED_KEYS: &[&str] = &[
    "DATABASE_URL",
    "SCRAPE_SCHEDULE",
    "SCRAPE_RUN_ON_START",
    "SCRAPE_INITIAL_DELAY_SECS",
    "STEAM_BRIDGE_URL",
    "STEAM_BRIDGE_TIMEOUT_SECS",
    "STEAM_WAIT_TIMEOUT_SECS",
    "STEAM_RECONNECT_SECS",
    "HTTP_ADDR",
    "DB_MAX_CONNS",
];

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub schedule: String,
    /// `None` disables the extra run after startup.
    pub initial_delay: Option<Duration>,
    pub bridge_url: String,
    pub bridge_timeout: Duration,
    pub wait_timeout: Option<Duration>,
    pub reconnect_every: Duration,
    pub http_addr: Option<String>,
}

impl ScraperConfig {
    pub fn from_env() -> Result<Self> {
        preflight_check("steam-promo-scraper", &["STEAM_BRIDGE_URL"], LOGGED_KEYS)?;
        Ok(Self {
            database_url: env_opt("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            db_max_connections: env_parse("DB_MAX_CONNS", 5u32),
            schedule: env_opt("SCRAPE_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            initial_delay: startup_run_delay(),
            bridge_url: env_req("STEAM_BRIDGE_URL")?,
            bridge_timeout: Duration::from_secs(env_parse("STEAM_BRIDGE_TIMEOUT_SECS", 30u64)),
            wait_timeout: env_parse_opt::<u64>("STEAM_WAIT_TIMEOUT_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            reconnect_every: Duration::from_secs(env_parse("STEAM_RECONNECT_SECS", 30u64).max(1)),
            http_addr: env_opt("HTTP_ADDR"),
        })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            wait_timeout: self.wait_timeout,
        }
    }
}

/// `SCRAPE_RUN_ON_START=false` or a negative `SCRAPE_INITIAL_DELAY_SECS` turns the
/// startup run off.
fn startup_run_delay() -> Option<Duration> {
    if !env_flag("SCRAPE_RUN_ON_START", true) {
        return None;
    }
    match env_parse("SCRAPE_INITIAL_DELAY_SECS", 15i64) {
        secs if secs < 0 => None,
        secs => Some(Duration::from_secs(secs as u64)),
    }
}
