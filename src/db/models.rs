use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Sentinel used in every field of the self-test event.
pub const TEST_MARKER: &str = "TEST";
/// Placeholder team hash carried by the self-test event.
pub const TEST_TEAM_HASH: &str = "TESTTEST";

/// Numeric league identifier; keys the league service map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeagueId(pub u32);

impl LeagueId {
    pub const TEST: LeagueId = LeagueId(0);
    pub const NHL: LeagueId = LeagueId(1);
    pub const MLB: LeagueId = LeagueId(2);
}

impl fmt::Display for LeagueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A team as reported by a league provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Short code, e.g. "BOS"
    pub team_code: String,
    pub team_name: String,
    /// Provider-assigned team id
    pub ext_id: String,
    pub league_id: LeagueId,
}

impl Team {
    /// Stable identifier subscribers use to filter events by team.
    pub fn team_hash(&self) -> String {
        team_hash(self.league_id, &self.team_code)
    }
}

pub fn team_hash(league_id: LeagueId, team_code: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", league_id, team_code.to_uppercase()).as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamState {
    pub team: Team,
    pub score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Ended,
}

impl GameStatus {
    pub fn is_ended(self) -> bool {
        self == GameStatus::Ended
    }
}

/// Snapshot of a game as last reported by its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub home: TeamState,
    pub away: TeamState,
    pub status: GameStatus,
    /// Period / inning description, provider specific
    pub period: Option<String>,
}

/// A monitored game instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Provider-assigned game id
    pub game_code: String,
    pub league_id: LeagueId,
    pub current_state: GameState,
    /// Set while a watch cycle is polling this game. Advisory only.
    pub is_fetching: bool,
}

impl Game {
    pub fn new(league_id: LeagueId, game_code: impl Into<String>, state: GameState) -> Self {
        Game {
            game_code: game_code.into(),
            league_id,
            current_state: state,
            is_fetching: false,
        }
    }

    pub fn game_key(&self) -> String {
        game_key(self.league_id, &self.game_code)
    }

    /// "AWY @ HOM" for log lines.
    pub fn matchup(&self) -> String {
        format!(
            "{} @ {}",
            self.current_state.away.team.team_code, self.current_state.home.team.team_code
        )
    }
}

pub fn game_key(league_id: LeagueId, game_code: &str) -> String {
    format!("{}-{}", league_id, game_code)
}

/// Result of one provider poll: the state we had and the state we now see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameUpdate {
    pub old_state: GameState,
    pub new_state: GameState,
}

/// A detected goal, as pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub team_code: String,
    pub team_name: String,
    pub league_id: LeagueId,
    pub league_name: String,
    pub team_hash: String,
}

impl Event {
    pub fn for_team(team: &Team, league_name: &str) -> Self {
        Event {
            team_code: team.team_code.clone(),
            team_name: team.team_name.clone(),
            league_id: team.league_id,
            league_name: league_name.to_string(),
            team_hash: team.team_hash(),
        }
    }

    /// Synthetic heartbeat event; never matches a real team code or hash.
    pub fn test_goal() -> Self {
        Event {
            team_code: TEST_MARKER.to_string(),
            team_name: TEST_MARKER.to_string(),
            league_id: LeagueId::TEST,
            league_name: TEST_MARKER.to_string(),
            team_hash: TEST_TEAM_HASH.to_string(),
        }
    }

    pub fn is_test(&self) -> bool {
        self.team_code == TEST_MARKER && self.team_hash == TEST_TEAM_HASH
    }
}

/// A persisted goal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalRecord {
    pub id: i64,
    pub team_code: String,
    pub team_name: String,
    pub team_ext_id: String,
    pub league_id: u32,
    pub team_hash: String,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalCount {
    pub team_code: String,
    pub league_id: u32,
    pub goals: i64,
}
