//! Active game registry: the set of monitored game keys plus the last known
//! state of each game.
//!
//! The active set and the per-game state blob are separate pieces of data.
//! Callers keep them consistent: a key is admitted with `set_game` followed
//! by `append_active_game`, and removed with `delete_active_game(_key)`.
//! Every write is a full-value overwrite, so overlapping writers converge on
//! last-write-wins without any per-key locking.

pub mod sqlite;

pub use sqlite::SqliteRegistry;

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::db::models::Game;
use crate::error::{MonitorError, MonitorResult};

#[async_trait]
pub trait ActiveGameRegistry: Send + Sync {
    /// All currently monitored game keys. Empty when nothing is live.
    async fn list_active_keys(&self) -> MonitorResult<BTreeSet<String>>;

    /// Stored state for `game_key`; `GameNotFound` when the blob is missing,
    /// expired or unreadable.
    async fn get_game(&self, game_key: &str) -> MonitorResult<Game>;

    async fn set_game(&self, game: &Game) -> MonitorResult<()>;

    async fn append_active_game(&self, game: &Game) -> MonitorResult<()>;

    async fn delete_active_game_key(&self, game_key: &str) -> MonitorResult<()>;

    async fn delete_active_game(&self, game: &Game) -> MonitorResult<()> {
        self.delete_active_game_key(&game.game_key()).await
    }
}

struct StoredGame {
    game: Game,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    games: HashMap<String, StoredGame>,
    active: BTreeSet<String>,
}

impl MemoryState {
    /// Ended games are never read again, so expiry has to be swept on write.
    fn evict_expired(&mut self, now: Instant) {
        self.games.retain(|_, stored| stored.expires_at > now);
    }
}

/// Process-local registry. Stored blobs expire after `ttl`, the same way a
/// key-value store with per-key expiry would evict them.
pub struct MemoryRegistry {
    ttl: Duration,
    state: RwLock<MemoryState>,
}

impl MemoryRegistry {
    pub fn new(ttl: Duration) -> Self {
        MemoryRegistry {
            ttl,
            state: RwLock::new(MemoryState::default()),
        }
    }
}

#[async_trait]
impl ActiveGameRegistry for MemoryRegistry {
    async fn list_active_keys(&self) -> MonitorResult<BTreeSet<String>> {
        Ok(self.state.read().await.active.clone())
    }

    async fn get_game(&self, game_key: &str) -> MonitorResult<Game> {
        let mut state = self.state.write().await;
        match state.games.get(game_key) {
            Some(stored) if stored.expires_at > Instant::now() => Ok(stored.game.clone()),
            Some(_) => {
                state.games.remove(game_key);
                Err(MonitorError::GameNotFound(game_key.to_string()))
            }
            None => Err(MonitorError::GameNotFound(game_key.to_string())),
        }
    }

    async fn set_game(&self, game: &Game) -> MonitorResult<()> {
        let now = Instant::now();
        let stored = StoredGame {
            game: game.clone(),
            expires_at: now + self.ttl,
        };
        let mut state = self.state.write().await;
        state.evict_expired(now);
        state.games.insert(game.game_key(), stored);
        Ok(())
    }

    async fn append_active_game(&self, game: &Game) -> MonitorResult<()> {
        self.state.write().await.active.insert(game.game_key());
        Ok(())
    }

    async fn delete_active_game_key(&self, game_key: &str) -> MonitorResult<()> {
        let mut state = self.state.write().await;
        state.active.remove(game_key);
        state.evict_expired(Instant::now());
        Ok(())
    }
}
