use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{json_id, side_score, LeagueService};
use crate::db::models::{Game, GameState, GameStatus, GameUpdate, LeagueId, Team, TeamState};

/// MLB provider backed by the public Stats API.
/// Docs: <https://statsapi.mlb.com/docs/>
pub struct MlbService {
    http: Client,
    base_url: String,
}

impl MlbService {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(MlbService {
            http,
            base_url: base_url
                .unwrap_or("https://statsapi.mlb.com/api")
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("Fetching {}", url);

        let resp = self.http.get(&url).send().await.context("MLB request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("MLB API error: {}", resp.status());
        }
        resp.json().await.context("Failed to parse MLB response")
    }

    fn status_from_abstract_state(s: &str) -> GameStatus {
        match s {
            "Live" => GameStatus::InProgress,
            "Final" => GameStatus::Ended,
            _ => GameStatus::Scheduled,
        }
    }

    fn is_active(status: &serde_json::Value) -> bool {
        status["abstractGameState"].as_str() == Some("Live")
            || matches!(
                status["detailedState"].as_str(),
                Some("Warmup") | Some("Pre-Game")
            )
    }
}

#[async_trait]
impl LeagueService for MlbService {
    fn league_id(&self) -> LeagueId {
        LeagueId::MLB
    }

    fn name(&self) -> &str {
        "MLB"
    }

    async fn discover_active_games(&self) -> Result<Vec<Game>> {
        let raw = self.get_json("v1/schedule?sportId=1&hydrate=team").await?;
        Ok(parse_schedule(&raw))
    }

    async fn fetch_game_update(&self, game: &Game) -> Result<GameUpdate> {
        let raw = self
            .get_json(&format!("v1.1/game/{}/feed/live", game.game_code))
            .await?;
        let new_state = parse_live_feed(&raw)
            .with_context(|| format!("Unparsable MLB game {}", game.game_code))?;
        Ok(GameUpdate {
            old_state: game.current_state.clone(),
            new_state,
        })
    }
}

fn parse_schedule(raw: &serde_json::Value) -> Vec<Game> {
    let dates = match raw["dates"].as_array() {
        Some(d) => d,
        None => return vec![],
    };

    dates
        .iter()
        .filter_map(|d| d["games"].as_array())
        .flatten()
        .filter(|g| MlbService::is_active(&g["status"]))
        .filter_map(|g| {
            let game_pk = json_id(&g["gamePk"])?;
            let status = MlbService::status_from_abstract_state(
                g["status"]["abstractGameState"].as_str().unwrap_or("Preview"),
            );
            let home = schedule_team(&g["teams"]["home"], status)?;
            let away = schedule_team(&g["teams"]["away"], status)?;
            let state = GameState {
                home,
                away,
                status,
                period: g["linescore"]["currentInningOrdinal"]
                    .as_str()
                    .map(|s| s.to_string()),
            };
            Some(Game::new(LeagueId::MLB, game_pk, state))
        })
        .collect()
}

fn schedule_team(side: &serde_json::Value, status: GameStatus) -> Option<TeamState> {
    let team = &side["team"];
    Some(TeamState {
        team: mlb_team(team)?,
        score: side_score(&side["score"], status)?,
    })
}

fn mlb_team(team: &serde_json::Value) -> Option<Team> {
    let team_name = team["name"].as_str()?.to_string();
    let team_code = team["abbreviation"]
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| team_name.clone());
    Some(Team {
        team_code,
        team_name,
        ext_id: json_id(&team["id"]).unwrap_or_default(),
        league_id: LeagueId::MLB,
    })
}

fn parse_live_feed(raw: &serde_json::Value) -> Option<GameState> {
    let game_data = &raw["gameData"];
    let linescore = &raw["liveData"]["linescore"];

    let status = MlbService::status_from_abstract_state(
        game_data["status"]["abstractGameState"]
            .as_str()
            .unwrap_or("Preview"),
    );
    let side = |which: &str| -> Option<TeamState> {
        Some(TeamState {
            team: mlb_team(&game_data["teams"][which])?,
            score: side_score(&linescore["teams"][which]["runs"], status)?,
        })
    };
    let period = linescore["currentInningOrdinal"].as_str().map(|inning| {
        match linescore["inningHalf"].as_str() {
            Some(half) => format!("{} {}", half, inning),
            None => inning.to_string(),
        }
    });

    Some(GameState {
        home: side("home")?,
        away: side("away")?,
        status,
        period,
    })
}
