use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{json_id, side_score, LeagueService};
use crate::db::models::{Game, GameState, GameStatus, GameUpdate, LeagueId, Team, TeamState};

/// NHL provider backed by the public `api-web.nhle.com` endpoints.
pub struct NhlService {
    http: Client,
    /// Base URL for overriding in tests
    base_url: String,
}

impl NhlService {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(NhlService {
            http,
            base_url: base_url
                .unwrap_or("https://api-web.nhle.com/v1")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("Fetching {}", url);

        let resp = self.http.get(&url).send().await.context("NHL request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("NHL API error: {}", resp.status());
        }
        resp.json().await.context("Failed to parse NHL response")
    }

    fn status_from_game_state(s: &str) -> GameStatus {
        match s.to_uppercase().as_str() {
            "LIVE" | "CRIT" => GameStatus::InProgress,
            "FINAL" | "OFF" => GameStatus::Ended,
            _ => GameStatus::Scheduled,
        }
    }

    /// PRE counts as active so the game is tracked from puck drop.
    fn is_active_game_state(s: &str) -> bool {
        matches!(s.to_uppercase().as_str(), "PRE" | "LIVE" | "CRIT")
    }
}

#[async_trait]
impl LeagueService for NhlService {
    fn league_id(&self) -> LeagueId {
        LeagueId::NHL
    }

    fn name(&self) -> &str {
        "NHL"
    }

    async fn discover_active_games(&self) -> Result<Vec<Game>> {
        let raw = self.get_json("score/now").await?;
        Ok(parse_score_now(&raw))
    }

    async fn fetch_game_update(&self, game: &Game) -> Result<GameUpdate> {
        let raw = self
            .get_json(&format!("gamecenter/{}/landing", game.game_code))
            .await?;
        let new_state = parse_game_state(&raw)
            .with_context(|| format!("Unparsable NHL game {}", game.game_code))?;
        Ok(GameUpdate {
            old_state: game.current_state.clone(),
            new_state,
        })
    }
}

fn parse_score_now(raw: &serde_json::Value) -> Vec<Game> {
    let games = match raw["games"].as_array() {
        Some(a) => a,
        None => return vec![],
    };

    games
        .iter()
        .filter(|g| {
            g["gameState"]
                .as_str()
                .map(NhlService::is_active_game_state)
                .unwrap_or(false)
        })
        .filter_map(|g| {
            let id = json_id(&g["id"])?;
            let state = parse_game_state(g)?;
            Some(Game::new(LeagueId::NHL, id, state))
        })
        .collect()
}

/// Works on both `score/now` game entries and `gamecenter/{id}/landing`.
fn parse_game_state(g: &serde_json::Value) -> Option<GameState> {
    let status = NhlService::status_from_game_state(g["gameState"].as_str().unwrap_or("FUT"));
    let home = parse_team(&g["homeTeam"], status)?;
    let away = parse_team(&g["awayTeam"], status)?;
    let period = g["periodDescriptor"]["number"]
        .as_i64()
        .or_else(|| g["period"].as_i64())
        .map(|n| match n {
            1..=3 => format!("P{}", n),
            _ => "OT".to_string(),
        });

    Some(GameState {
        home,
        away,
        status,
        period,
    })
}

fn parse_team(t: &serde_json::Value, status: GameStatus) -> Option<TeamState> {
    let team_code = t["abbrev"].as_str()?.to_string();
    // score/now carries `name`, landing carries `commonName` (+ `placeName`)
    let team_name = t["name"]["default"]
        .as_str()
        .or_else(|| t["commonName"]["default"].as_str())
        .map(|n| match t["placeName"]["default"].as_str() {
            Some(place) if !n.starts_with(place) => format!("{} {}", place, n),
            _ => n.to_string(),
        })
        .unwrap_or_else(|| team_code.clone());
    let ext_id = json_id(&t["id"]).unwrap_or_default();
    let score = side_score(&t["score"], status)?;

    Some(TeamState {
        team: Team {
            team_code,
            team_name,
            ext_id,
            league_id: LeagueId::NHL,
        },
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORE_NOW: &str = r#"{
        "games": [
            {
                "id": 2024020101,
                "gameState": "LIVE",
                "period": 2,
                "homeTeam": {"id": 6, "abbrev": "BOS", "name": {"default": "Bruins"}, "score": 2},
                "awayTeam": {"id": 10, "abbrev": "TOR", "name": {"default": "Maple Leafs"}, "score": 1}
            },
            {
                "id": 2024020102,
                "gameState": "FUT",
                "homeTeam": {"id": 8, "abbrev": "MTL", "name": {"default": "Canadiens"}},
                "awayTeam": {"id": 9, "abbrev": "OTT", "name": {"default": "Senators"}}
            },
            {
                "id": 2024020103,
                "gameState": "OFF",
                "homeTeam": {"id": 1, "abbrev": "NJD", "name": {"default": "Devils"}, "score": 4},
                "awayTeam": {"id": 2, "abbrev": "NYI", "name": {"default": "Islanders"}, "score": 0}
            },
            {
                "id": 2024020104,
                "gameState": "PRE",
                "homeTeam": {"id": 3, "abbrev": "NYR", "name": {"default": "Rangers"}, "score": 0},
                "awayTeam": {"id": 4, "abbrev": "PHI", "name": {"default": "Flyers"}, "score": 0}
            }
        ]
    }"#;

    #[test]
    fn test_parse_score_now_keeps_live_and_pregame() {
        let raw: serde_json::Value = serde_json::from_str(SCORE_NOW).unwrap();
        let games = parse_score_now(&raw);
        assert_eq!(games.len(), 2);

        let live = &games[0];
        assert_eq!(live.game_code, "2024020101");
        assert_eq!(live.game_key(), "1-2024020101");
        assert_eq!(live.current_state.status, GameStatus::InProgress);
        assert_eq!(live.current_state.home.team.team_code, "BOS");
        assert_eq!(live.current_state.home.team.team_name, "Bruins");
        assert_eq!(live.current_state.home.team.ext_id, "6");
        assert_eq!(live.current_state.home.score, 2);
        assert_eq!(live.current_state.away.score, 1);
        assert_eq!(live.current_state.period.as_deref(), Some("P2"));
        assert!(!live.is_fetching);

        assert_eq!(games[1].current_state.status, GameStatus::Scheduled);
    }

    #[test]
    fn test_parse_landing() {
        let raw = serde_json::json!({
            "id": 2024020101,
            "gameState": "FINAL",
            "periodDescriptor": {"number": 4},
            "homeTeam": {"id": 6, "abbrev": "BOS", "commonName": {"default": "Bruins"},
                         "placeName": {"default": "Boston"}, "score": 3},
            "awayTeam": {"id": 10, "abbrev": "TOR", "commonName": {"default": "Maple Leafs"},
                         "placeName": {"default": "Toronto"}, "score": 2}
        });
        let state = parse_game_state(&raw).unwrap();
        assert_eq!(state.status, GameStatus::Ended);
        assert_eq!(state.home.team.team_name, "Boston Bruins");
        assert_eq!(state.home.score, 3);
        assert_eq!(state.period.as_deref(), Some("OT"));
    }

    #[test]
    fn test_missing_teams_is_unparsable() {
        let raw = serde_json::json!({"gameState": "LIVE"});
        assert!(parse_game_state(&raw).is_none());
        assert!(parse_score_now(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn test_live_game_without_score_is_unparsable() {
        let mut raw = serde_json::json!({
            "gameState": "LIVE",
            "homeTeam": {"id": 6, "abbrev": "BOS", "commonName": {"default": "Bruins"}, "score": 2},
            "awayTeam": {"id": 10, "abbrev": "TOR", "commonName": {"default": "Maple Leafs"}, "score": 1}
        });
        assert_eq!(parse_game_state(&raw).unwrap().home.score, 2);

        raw["homeTeam"].as_object_mut().unwrap().remove("score");
        assert!(parse_game_state(&raw).is_none());

        raw["gameState"] = serde_json::json!("OFF");
        assert!(parse_game_state(&raw).is_none());
    }

    #[test]
    fn test_scheduled_game_without_score_defaults_to_zero() {
        let raw = serde_json::json!({
            "gameState": "FUT",
            "homeTeam": {"id": 8, "abbrev": "MTL"},
            "awayTeam": {"id": 9, "abbrev": "OTT"}
        });
        let state = parse_game_state(&raw).unwrap();
        assert_eq!(state.status, GameStatus::Scheduled);
        assert_eq!((state.home.score, state.away.score), (0, 0));
    }

    #[test]
    fn test_status_from_game_state() {
        assert_eq!(NhlService::status_from_game_state("LIVE"), GameStatus::InProgress);
        assert_eq!(NhlService::status_from_game_state("CRIT"), GameStatus::InProgress);
        assert_eq!(NhlService::status_from_game_state("OFF"), GameStatus::Ended);
        assert_eq!(NhlService::status_from_game_state("FINAL"), GameStatus::Ended);
        assert_eq!(NhlService::status_from_game_state("PRE"), GameStatus::Scheduled);
    }
}
