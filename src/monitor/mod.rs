//! Active-game monitoring engine.
//!
//! Discovery admits newly live games from every league service into the
//! registry. Watch re-polls each registered game, forwards whatever goals
//! the provider derives from the fresh state, and retires the game once it
//! has ended. Both fan out one unit of work per provider / per game, bounded
//! by a semaphore, so a slow upstream only stalls its own unit.

pub mod refresh;

pub use refresh::RefreshSignal;

use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::db::models::{Event, Game, GameUpdate};
use crate::dispatch::GoalDispatcher;
use crate::error::{MonitorError, MonitorResult};
use crate::leagues::{LeagueService, LeagueServices};
use crate::registry::ActiveGameRegistry;

/// Concurrency and timeout bounds for the engine's units of work.
#[derive(Debug, Clone, Copy)]
pub struct MonitorLimits {
    /// Upper bound on every provider round trip
    pub call_timeout: Duration,
    pub max_concurrent_games: usize,
    pub max_concurrent_discovery: usize,
}

impl Default for MonitorLimits {
    fn default() -> Self {
        MonitorLimits {
            call_timeout: Duration::from_secs(10),
            max_concurrent_games: 64,
            max_concurrent_discovery: 8,
        }
    }
}

/// Result of one watch cycle for one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Registry had no state for the key; it was dropped and a refresh requested.
    Stale,
    /// Game still live; `events` goals were forwarded.
    Updated { events: usize },
    /// Game ended and left the active set.
    Ended { events: usize },
}

pub struct Monitor {
    services: LeagueServices,
    registry: Arc<dyn ActiveGameRegistry>,
    dispatcher: GoalDispatcher,
    refresh: RefreshSignal,
    watch_permits: Arc<Semaphore>,
    discovery_permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl Monitor {
    pub fn new(
        services: LeagueServices,
        registry: Arc<dyn ActiveGameRegistry>,
        dispatcher: GoalDispatcher,
        limits: MonitorLimits,
    ) -> Self {
        Monitor {
            services,
            registry,
            dispatcher,
            refresh: RefreshSignal::default(),
            watch_permits: Arc::new(Semaphore::new(limits.max_concurrent_games)),
            discovery_permits: Arc::new(Semaphore::new(limits.max_concurrent_discovery)),
            call_timeout: limits.call_timeout,
        }
    }

    pub fn refresh_signal(&self) -> &RefreshSignal {
        &self.refresh
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Ask every league service for its active games and admit the new ones.
    /// Returns the number of games admitted across all leagues.
    pub async fn check_leagues_for_active_games(self: &Arc<Self>) -> usize {
        info!("Updating active games");
        let handles: Vec<_> = self
            .services
            .all()
            .map(|service| {
                let monitor = Arc::clone(self);
                let service = Arc::clone(service);
                tokio::spawn(async move {
                    let Ok(_permit) = monitor.discovery_permits.clone().acquire_owned().await
                    else {
                        return 0;
                    };
                    match monitor.check_for_new_active_games(service.as_ref()).await {
                        Ok(admitted) => admitted,
                        Err(e) => {
                            warn!("{} discovery skipped this cycle: {}", service.name(), e);
                            0
                        }
                    }
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    error!("Discovery task panicked: {}", e);
                    0
                })
            })
            .sum()
    }

    async fn check_for_new_active_games(&self, service: &dyn LeagueService) -> MonitorResult<usize> {
        info!("Checking for active {} games", service.name());
        let games = self
            .provider_call(service.name(), service.discover_active_games())
            .await?;
        let monitored = self.registry.list_active_keys().await?;

        let mut admitted = 0;
        for game in games {
            if monitored.contains(&game.game_key()) {
                continue;
            }
            if game.current_state.status.is_ended() {
                debug!("Ignoring ended {} game {}", service.name(), game.game_key());
                continue;
            }
            info!(
                "Adding {} game ({}) to active monitored games",
                service.name(),
                game.matchup()
            );
            if let Err(e) = self.admit(&game).await {
                error!("[{}] Could not admit game: {}", game.game_key(), e);
                continue;
            }
            admitted += 1;
        }
        Ok(admitted)
    }

    async fn admit(&self, game: &Game) -> MonitorResult<()> {
        self.registry.set_game(game).await?;
        self.registry.append_active_game(game).await
    }

    /// Housekeeping tick: run discovery now if a watch unit asked for it.
    pub async fn run_pending_refresh(self: &Arc<Self>) -> bool {
        if !self.refresh.take() {
            return false;
        }
        info!("Refreshing active games ahead of schedule");
        self.check_leagues_for_active_games().await;
        true
    }

    // ── Watch ─────────────────────────────────────────────────────────────────

    /// Poll every active game once, each in its own task. Returns how many
    /// games were polled.
    pub async fn watch_active_games(self: &Arc<Self>) -> usize {
        let keys = match self.registry.list_active_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!("Cannot list active games: {}", e);
                return 0;
            }
        };

        let handles: Vec<_> = keys
            .into_iter()
            .map(|game_key| {
                let monitor = Arc::clone(self);
                tokio::spawn(async move {
                    let Ok(_permit) = monitor.watch_permits.clone().acquire_owned().await else {
                        return;
                    };
                    if let Err(e) = monitor.check_game(&game_key).await {
                        warn!("[{}] Watch cycle failed: {}", game_key, e);
                    }
                })
            })
            .collect();

        let polled = handles.len();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Watch task panicked: {}", e);
            }
        }
        polled
    }

    /// One watch cycle for one game.
    pub async fn check_game(&self, game_key: &str) -> MonitorResult<WatchOutcome> {
        let mut game = match self.registry.get_game(game_key).await {
            Ok(game) => game,
            Err(MonitorError::GameNotFound(_)) => {
                warn!("[{}] Game not found, dropping it from active games", game_key);
                if let Err(e) = self.registry.delete_active_game_key(game_key).await {
                    error!("[{}] {}", game_key, e);
                }
                self.refresh.request();
                return Ok(WatchOutcome::Stale);
            }
            Err(e) => return Err(e),
        };

        let Some(service) = self.services.get(game.league_id) else {
            // nothing can ever advance this game
            self.registry.delete_active_game(&game).await?;
            return Err(MonitorError::UnknownLeague(game.league_id));
        };

        let label = format!("{} - {}", service.name(), game.matchup());
        if game.is_fetching {
            debug!("[{}] Previous poll still in flight", label);
        }
        debug!("[{}] Checking", label);
        game.is_fetching = true;
        self.write_game(&label, &game).await;

        let polled = async {
            let update = self
                .provider_call(service.name(), service.fetch_game_update(&game))
                .await?;
            let events = self
                .provider_call(service.name(), service.derive_events(&update))
                .await?;
            Ok::<_, MonitorError>((update, events))
        }
        .await;
        let (update, events) = match polled {
            Ok(polled) => polled,
            Err(e) => {
                // keep the previous state so the next cycle derives the same goals again
                game.is_fetching = false;
                self.write_game(&label, &game).await;
                return Err(e);
            }
        };

        let GameUpdate { new_state, .. } = update;
        game.current_state = new_state;

        let (_, ended) = tokio::join!(
            self.fire_goal_events(&label, &events, &game),
            self.advance(&label, &game)
        );

        Ok(if ended {
            WatchOutcome::Ended {
                events: events.len(),
            }
        } else {
            WatchOutcome::Updated {
                events: events.len(),
            }
        })
    }

    async fn fire_goal_events(&self, label: &str, events: &[Event], game: &Game) {
        if events.is_empty() {
            return;
        }
        let report = self.dispatcher.fire_goal_events(events, game).await;
        debug!(
            "[{}] {} goal(s): {} broadcast, {} recorded",
            label,
            events.len(),
            report.broadcast,
            report.persisted
        );
    }

    /// Store the advanced state, or retire the game if it has ended.
    /// Returns whether the game ended.
    async fn advance(&self, label: &str, game: &Game) -> bool {
        if game.current_state.status.is_ended() {
            info!("[{}] Game has ended", label);
            if let Err(e) = self.registry.delete_active_game(game).await {
                error!("[{}] {}", label, e);
            }
            return true;
        }
        let mut idle = game.clone();
        idle.is_fetching = false;
        self.write_game(label, &idle).await;
        false
    }

    /// Registry writes are best effort: the next tick rewrites from current state.
    async fn write_game(&self, label: &str, game: &Game) {
        if let Err(e) = self.registry.set_game(game).await {
            error!("[{}] {}", label, e);
        }
    }

    // ── Self test ─────────────────────────────────────────────────────────────

    pub async fn send_test_goal(&self) {
        if !self.dispatcher.send_test_goal().await {
            warn!("Test goal could not be broadcast");
        }
    }

    async fn provider_call<T, F>(&self, league: &str, call: F) -> MonitorResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(MonitorError::provider(league, format!("{:#}", e))),
            Err(_) => Err(MonitorError::provider(
                league,
                format!("timed out after {:?}", self.call_timeout),
            )),
        }
    }
}
