use clap::Parser;
use std::time::Duration;

use crate::monitor::MonitorLimits;

pub const KNOWN_LEAGUES: &[&str] = &["nhl", "mlb"];

/// Live goal detection and broadcast service
#[derive(Parser, Debug, Clone)]
#[command(name = "goalfeed", version, about)]
pub struct Config {
    /// SQLite database path for goal history
    #[arg(long, env = "DATABASE_PATH", default_value = "goalfeed.db")]
    pub database_path: String,

    /// SQLite file for the active-game registry (in-memory when unset)
    #[arg(long, env = "REGISTRY_PATH")]
    pub registry_path: Option<String>,

    /// Seconds a stored game stays readable in the registry without a rewrite
    #[arg(long, env = "REGISTRY_TTL_SECS", default_value = "21600")]
    pub registry_ttl_secs: u64,

    /// HTTP listen address (subscriber socket + API)
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Leagues to monitor, comma separated
    #[arg(long, env = "LEAGUES", value_delimiter = ',', default_value = "nhl,mlb")]
    pub leagues: Vec<String>,

    /// NHL web API base URL
    #[arg(long, env = "NHL_API_URL", default_value = "https://api-web.nhle.com/v1")]
    pub nhl_api_url: String,

    /// MLB Stats API base URL
    #[arg(long, env = "MLB_API_URL", default_value = "https://statsapi.mlb.com/api")]
    pub mlb_api_url: String,

    /// Seconds between active-game discovery runs
    #[arg(long, env = "DISCOVERY_INTERVAL_SECS", default_value = "60")]
    pub discovery_interval_secs: u64,

    /// Seconds between polls of each active game
    #[arg(long, env = "WATCH_INTERVAL_SECS", default_value = "1")]
    pub watch_interval_secs: u64,

    /// Seconds between checks for an out-of-cycle discovery request
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value = "5")]
    pub refresh_interval_secs: u64,

    /// Seconds between self-test goal broadcasts
    #[arg(long, env = "TEST_GOAL_INTERVAL_SECS", default_value = "60")]
    pub test_goal_interval_secs: u64,

    /// Do not broadcast self-test goals
    #[arg(long, env = "DISABLE_TEST_GOAL", default_value = "false")]
    pub disable_test_goal: bool,

    /// Timeout for each provider request, in seconds
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "10")]
    pub provider_timeout_secs: u64,

    /// Maximum games polled at once
    #[arg(long, env = "MAX_CONCURRENT_GAMES", default_value = "64")]
    pub max_concurrent_games: usize,

    /// Maximum league discoveries in flight at once
    #[arg(long, env = "MAX_CONCURRENT_DISCOVERY", default_value = "8")]
    pub max_concurrent_discovery: usize,

    /// Optional endpoint that receives every event as a JSON POST
    #[arg(long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Buffered events per WebSocket subscriber before it starts lagging
    #[arg(long, env = "SUBSCRIBER_BUFFER", default_value = "256")]
    pub subscriber_buffer: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("discovery_interval_secs", self.discovery_interval_secs),
            ("watch_interval_secs", self.watch_interval_secs),
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("test_goal_interval_secs", self.test_goal_interval_secs),
            ("provider_timeout_secs", self.provider_timeout_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }
        if self.max_concurrent_games == 0 || self.max_concurrent_discovery == 0 {
            anyhow::bail!("concurrency limits must be positive");
        }
        if self.subscriber_buffer == 0 {
            anyhow::bail!("subscriber_buffer must be positive");
        }
        if self.leagues.is_empty() {
            anyhow::bail!("at least one league must be enabled");
        }
        for league in &self.leagues {
            if !KNOWN_LEAGUES.contains(&league.trim().to_lowercase().as_str()) {
                anyhow::bail!(
                    "unknown league '{}' (expected one of {:?})",
                    league,
                    KNOWN_LEAGUES
                );
            }
        }
        if let Some(url) = &self.webhook_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| anyhow::anyhow!("invalid WEBHOOK_URL '{}': {}", url, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("WEBHOOK_URL must be http(s)");
            }
        }
        Ok(())
    }

    pub fn league_enabled(&self, league: &str) -> bool {
        self.leagues
            .iter()
            .any(|l| l.trim().eq_ignore_ascii_case(league))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    pub fn monitor_limits(&self) -> MonitorLimits {
        MonitorLimits {
            call_timeout: self.provider_timeout(),
            max_concurrent_games: self.max_concurrent_games,
            max_concurrent_discovery: self.max_concurrent_discovery,
        }
    }
}
