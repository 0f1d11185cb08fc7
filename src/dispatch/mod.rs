pub mod broadcast;

pub use broadcast::{ChannelBroadcaster, FanoutBroadcaster, WebhookBroadcaster};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::models::{Event, Game, GameState, Team};
use crate::error::MonitorError;

/// Push-side collaborator: fan an event out to subscribers.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn send_event(&self, event: &Event) -> Result<()>;
}

/// Append-only goal history.
#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn insert_goal(&self, team: &Team) -> Result<()>;
}

/// What happened to a batch of events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub broadcast: usize,
    pub persisted: usize,
}

/// Sends each goal to the broadcaster and records it against the scoring team.
#[derive(Clone)]
pub struct GoalDispatcher {
    broadcaster: Arc<dyn Broadcaster>,
    store: Arc<dyn GoalStore>,
}

impl GoalDispatcher {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, store: Arc<dyn GoalStore>) -> Self {
        GoalDispatcher { broadcaster, store }
    }

    /// Dispatch every event concurrently. Failures are logged per event and
    /// never retried here; the report counts what succeeded.
    pub async fn fire_goal_events(&self, events: &[Event], game: &Game) -> DispatchReport {
        let outcomes = join_all(events.iter().map(|ev| self.dispatch(ev, game))).await;
        outcomes
            .into_iter()
            .fold(DispatchReport::default(), |mut acc, (sent, stored)| {
                acc.broadcast += sent as usize;
                acc.persisted += stored as usize;
                acc
            })
    }

    /// Broadcast and persist one event side by side. Returns
    /// `(broadcast_ok, persisted_ok)`.
    async fn dispatch(&self, event: &Event, game: &Game) -> (bool, bool) {
        info!("[{}] Goal {} ({})", game.matchup(), event.team_code, event.league_name);

        let persist = async {
            let team = match scoring_team(&game.current_state, &event.team_code) {
                Some(team) => team,
                None => {
                    let fault = MonitorError::DataConsistency {
                        team_code: event.team_code.clone(),
                        game_key: game.game_key(),
                    };
                    warn!("Skipping goal persistence: {}", fault);
                    return false;
                }
            };
            match self.store.insert_goal(team).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to record goal for {}: {}", team.team_code, e);
                    false
                }
            }
        };

        tokio::join!(self.broadcast(event), persist)
    }

    /// Fire-and-forget push of one event; `false` when the broadcaster failed.
    pub async fn broadcast(&self, event: &Event) -> bool {
        match self.broadcaster.send_event(event).await {
            Ok(()) => true,
            Err(e) => {
                error!("{}", MonitorError::Dispatch(format!("{} goal: {}", event.team_code, e)));
                false
            }
        }
    }

    /// Heartbeat through the broadcast path only. Nothing is persisted.
    pub async fn send_test_goal(&self) -> bool {
        info!("Sending test goal");
        self.broadcast(&Event::test_goal()).await
    }
}

/// The team in `state` whose code is `team_code`, if either side matches.
pub fn scoring_team<'a>(state: &'a GameState, team_code: &str) -> Option<&'a Team> {
    if state.home.team.team_code == team_code {
        Some(&state.home.team)
    } else if state.away.team.team_code == team_code {
        Some(&state.away.team)
    } else {
        None
    }
}
