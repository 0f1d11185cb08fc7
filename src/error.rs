use thiserror::Error;

use crate::db::models::LeagueId;

/// Errors the monitoring engine distinguishes. None of them are fatal:
/// each is recovered inside the unit of work that hit it.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{league} provider unavailable: {reason}")]
    ProviderUnavailable { league: String, reason: String },

    #[error("game not found in registry: {0}")]
    GameNotFound(String),

    #[error("team {team_code} is not playing in game {game_key}")]
    DataConsistency { team_code: String, game_key: String },

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("registry write failed: {0}")]
    RegistryWrite(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("no league service registered for league {0}")]
    UnknownLeague(LeagueId),
}

impl MonitorError {
    pub fn provider(league: &str, err: impl std::fmt::Display) -> Self {
        MonitorError::ProviderUnavailable {
            league: league.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn registry_read(err: impl std::fmt::Display) -> Self {
        MonitorError::RegistryUnavailable(err.to_string())
    }

    pub fn registry_write(err: impl std::fmt::Display) -> Self {
        MonitorError::RegistryWrite(err.to_string())
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
