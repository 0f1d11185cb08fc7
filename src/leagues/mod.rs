pub mod mlb;
pub mod nhl;

pub use mlb::MlbService;
pub use nhl::NhlService;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::models::{Event, Game, GameStatus, GameUpdate, LeagueId, TeamState};

/// Trait that every league data provider must implement.
#[async_trait]
pub trait LeagueService: Send + Sync {
    fn league_id(&self) -> LeagueId;

    /// Human-readable league name for logging and event payloads.
    fn name(&self) -> &str;

    /// Games that are live or about to start.
    async fn discover_active_games(&self) -> Result<Vec<Game>>;

    /// Freshest state for `game`, paired with the state we already had.
    async fn fetch_game_update(&self, game: &Game) -> Result<GameUpdate>;

    /// Goals scored between `update.old_state` and `update.new_state`.
    async fn derive_events(&self, update: &GameUpdate) -> Result<Vec<Event>> {
        Ok(score_diff_events(update, self.name()))
    }
}

/// Read-only map of league id to provider, built once at startup.
#[derive(Clone, Default)]
pub struct LeagueServices {
    services: Arc<HashMap<LeagueId, Arc<dyn LeagueService>>>,
}

impl LeagueServices {
    pub fn new(services: Vec<Arc<dyn LeagueService>>) -> Self {
        let services = services
            .into_iter()
            .map(|s| (s.league_id(), s))
            .collect::<HashMap<_, _>>();
        LeagueServices {
            services: Arc::new(services),
        }
    }

    pub fn get(&self, league_id: LeagueId) -> Option<Arc<dyn LeagueService>> {
        self.services.get(&league_id).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn LeagueService>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// One event per goal added on each side. A score that went down (provider
/// correction) yields nothing.
pub fn score_diff_events(update: &GameUpdate, league_name: &str) -> Vec<Event> {
    let sides: [(&TeamState, &TeamState); 2] = [
        (&update.old_state.home, &update.new_state.home),
        (&update.old_state.away, &update.new_state.away),
    ];
    sides
        .into_iter()
        .flat_map(|(old, new)| {
            let goals = new.score.saturating_sub(old.score).max(0) as usize;
            std::iter::repeat_with(move || Event::for_team(&new.team, league_name)).take(goals)
        })
        .collect()
}

/// Score field helper shared by the provider parsers: accepts numbers and
/// numeric strings. Negative or out-of-range values are not scores.
pub(crate) fn json_i32(v: &serde_json::Value) -> Option<i32> {
    v.as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|n| *n >= 0)
}

/// Score of one side. Only a game that has not started may lack one; for a
/// live or finished game a missing score would reset the goal baseline.
pub(crate) fn side_score(v: &serde_json::Value, status: GameStatus) -> Option<i32> {
    match json_i32(v) {
        Some(score) => Some(score),
        None if status == GameStatus::Scheduled => Some(0),
        None => None,
    }
}

/// Id helper: providers send ids as numbers or strings.
pub(crate) fn json_id(v: &serde_json::Value) -> Option<String> {
    v.as_str()
        .map(|s| s.to_string())
        .or_else(|| v.as_u64().map(|n| n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{GameState, Team};

    fn state(home: i32, away: i32) -> GameState {
        let side = |code: &str, score| TeamState {
            team: Team {
                team_code: code.into(),
                team_name: code.into(),
                ext_id: code.into(),
                league_id: LeagueId::NHL,
            },
            score,
        };
        GameState {
            home: side("BOS", home),
            away: side("TOR", away),
            status: GameStatus::InProgress,
            period: None,
        }
    }

    fn update(old: (i32, i32), new: (i32, i32)) -> GameUpdate {
        GameUpdate {
            old_state: state(old.0, old.1),
            new_state: state(new.0, new.1),
        }
    }

    #[test]
    fn test_no_change_no_events() {
        assert!(score_diff_events(&update((1, 1), (1, 1)), "NHL").is_empty());
    }

    #[test]
    fn test_one_event_per_goal() {
        let events = score_diff_events(&update((0, 0), (2, 1)), "NHL");
        let codes: Vec<_> = events.iter().map(|e| e.team_code.as_str()).collect();
        assert_eq!(codes, vec!["BOS", "BOS", "TOR"]);
        assert!(events.iter().all(|e| e.league_name == "NHL"));
    }

    #[test]
    fn test_score_correction_is_ignored() {
        let events = score_diff_events(&update((2, 0), (1, 1)), "NHL");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].team_code, "TOR");
    }

    #[test]
    fn test_extreme_scores_do_not_overflow() {
        assert!(score_diff_events(&update((i32::MAX, 0), (-1, 0)), "NHL").is_empty());
    }

    #[test]
    fn test_json_i32_rejects_non_scores() {
        assert_eq!(json_i32(&serde_json::json!(4294967298u64)), None);
        assert_eq!(json_i32(&serde_json::json!(-1)), None);
        assert_eq!(json_i32(&serde_json::json!("-3")), None);
    }

    #[test]
    fn test_side_score_requires_score_once_started() {
        let missing = serde_json::Value::Null;
        assert_eq!(side_score(&missing, GameStatus::Scheduled), Some(0));
        assert_eq!(side_score(&missing, GameStatus::InProgress), None);
        assert_eq!(side_score(&missing, GameStatus::Ended), None);
        assert_eq!(side_score(&serde_json::json!(2), GameStatus::InProgress), Some(2));
    }

    #[test]
    fn test_json_helpers() {
        assert_eq!(json_i32(&serde_json::json!(3)), Some(3));
        assert_eq!(json_i32(&serde_json::json!("4")), Some(4));
        assert_eq!(json_i32(&serde_json::json!(null)), None);
        assert_eq!(json_id(&serde_json::json!(2024020001u64)).as_deref(), Some("2024020001"));
        assert_eq!(json_id(&serde_json::json!("abc")).as_deref(), Some("abc"));
    }
}
