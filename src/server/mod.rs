use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::db::models::{Event, Game};
use crate::db::Database;
use crate::dispatch::ChannelBroadcaster;
use crate::registry::ActiveGameRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<dyn ActiveGameRegistry>,
    pub events: ChannelBroadcaster,
}

/// Build the Axum router for subscribers and the read-only API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(ws_handler))
        .route("/api/active-games", get(active_games_handler))
        .route("/api/goals", get(goals_handler))
        .route("/api/goal-counts", get(goal_counts_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    /// Only deliver events for this team hash (test events always pass)
    team: Option<String>,
}

/// GET /ws?team=<hash>
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SubscribeParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx, params.team))
}

async fn stream_events(socket: WebSocket, mut rx: broadcast::Receiver<Event>, team: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    debug!("Subscriber connected (team filter: {:?})", team);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    if !wants(&event, team.as_deref()) {
                        continue;
                    }
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagging, {} event(s) skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
        }
    }
    debug!("Subscriber disconnected");
}

fn wants(event: &Event, team: Option<&str>) -> bool {
    match team {
        None => true,
        Some(hash) => event.is_test() || event.team_hash == hash,
    }
}

/// GET /api/active-games
async fn active_games_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let keys = state
        .registry
        .list_active_keys()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let mut games: Vec<Game> = Vec::with_capacity(keys.len());
    for key in keys {
        // a missing blob is handled by the next watch cycle
        if let Ok(game) = state.registry.get_game(&key).await {
            games.push(game);
        }
    }
    Ok(Json(games))
}

/// GET /api/goals
async fn goals_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .list_recent_goals(50)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/goal-counts
async fn goal_counts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .goal_counts()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{team_hash, LeagueId};
    use crate::registry::tests::sample_game;
    use crate::registry::MemoryRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            db: Database::open(":memory:").unwrap(),
            registry: Arc::new(MemoryRegistry::new(Duration::from_secs(60))),
            events: ChannelBroadcaster::new(16),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let resp = router(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_active_games_skips_missing_blobs() {
        let state = state();
        let live = sample_game("1", "BOS", "TOR");
        let orphan = sample_game("2", "MTL", "OTT");
        state.registry.set_game(&live).await.unwrap();
        state.registry.append_active_game(&live).await.unwrap();
        state.registry.append_active_game(&orphan).await.unwrap();

        let (status, body) = get_json(router(state), "/api/active-games").await;
        assert_eq!(status, StatusCode::OK);
        let games = body.as_array().unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0]["game_code"], "1");
    }

    #[tokio::test]
    async fn test_goal_endpoints() {
        let state = state();
        let game = sample_game("1", "BOS", "TOR");
        state.db.insert_goal(&game.current_state.home.team).unwrap();
        state.db.insert_goal(&game.current_state.home.team).unwrap();

        let (status, goals) = get_json(router(state.clone()), "/api/goals").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(goals.as_array().unwrap().len(), 2);
        assert_eq!(goals[0]["team_code"], "BOS");

        let (_, counts) = get_json(router(state), "/api/goal-counts").await;
        assert_eq!(counts[0]["goals"], 2);
    }

    #[test]
    fn test_team_filter() {
        let bos = Event {
            team_code: "BOS".into(),
            team_name: "Bruins".into(),
            league_id: LeagueId::NHL,
            league_name: "NHL".into(),
            team_hash: team_hash(LeagueId::NHL, "BOS"),
        };
        let bos_hash = bos.team_hash.clone();
        let tor_hash = team_hash(LeagueId::NHL, "TOR");

        assert!(wants(&bos, None));
        assert!(wants(&bos, Some(&bos_hash)));
        assert!(!wants(&bos, Some(&tor_hash)));
        assert!(wants(&Event::test_goal(), Some(&tor_hash)));
    }
}
