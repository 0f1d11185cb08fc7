use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

use super::ActiveGameRegistry;
use crate::db::models::Game;
use crate::error::{MonitorError, MonitorResult};

/// Registry persisted to a SQLite file so monitored games survive restarts.
/// Game state is stored as a JSON blob with an expiry timestamp.
#[derive(Clone)]
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
    ttl: chrono::Duration,
}

impl SqliteRegistry {
    pub fn open(path: &str, ttl: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(REGISTRY_SCHEMA_SQL)?;
        Ok(SqliteRegistry {
            conn: Arc::new(Mutex::new(conn)),
            ttl: chrono::Duration::from_std(ttl)?,
        })
    }

    fn conn(&self) -> MonitorResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MonitorError::registry_read("registry mutex poisoned"))
    }
}

#[async_trait]
impl ActiveGameRegistry for SqliteRegistry {
    async fn list_active_keys(&self) -> MonitorResult<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT game_key FROM registry_active")
            .map_err(MonitorError::registry_read)?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(MonitorError::registry_read)?
            .collect::<rusqlite::Result<BTreeSet<_>>>()
            .map_err(MonitorError::registry_read)?;
        Ok(keys)
    }

    async fn get_game(&self, game_key: &str) -> MonitorResult<Game> {
        let conn = self.conn()?;
        let row: Option<(String, DateTime<Utc>)> = conn
            .query_row(
                "SELECT body, expires_at FROM registry_games WHERE game_key = ?1",
                params![game_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(MonitorError::registry_read)?;

        let not_found = || MonitorError::GameNotFound(game_key.to_string());
        let (body, expires_at) = row.ok_or_else(not_found)?;
        if expires_at <= Utc::now() {
            return Err(not_found());
        }
        serde_json::from_str(&body).map_err(|e| {
            warn!("[{}] Stored game is unreadable: {}", game_key, e);
            not_found()
        })
    }

    async fn set_game(&self, game: &Game) -> MonitorResult<()> {
        let body = serde_json::to_string(game).map_err(MonitorError::registry_write)?;
        let now = Utc::now();
        let conn = self.conn()?;
        prune_expired(&conn, now)?;
        conn.execute(
            "INSERT INTO registry_games (game_key, body, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(game_key) DO UPDATE SET
                body=excluded.body,
                expires_at=excluded.expires_at",
            params![game.game_key(), body, now + self.ttl],
        )
        .map_err(MonitorError::registry_write)?;
        Ok(())
    }

    async fn append_active_game(&self, game: &Game) -> MonitorResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO registry_active (game_key) VALUES (?1)",
            params![game.game_key()],
        )
        .map_err(MonitorError::registry_write)?;
        Ok(())
    }

    async fn delete_active_game_key(&self, game_key: &str) -> MonitorResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM registry_active WHERE game_key = ?1",
            params![game_key],
        )
        .map_err(MonitorError::registry_write)?;
        prune_expired(&conn, Utc::now())
    }
}

/// Ended games are never read again, so expiry has to be swept on write.
fn prune_expired(conn: &Connection, now: DateTime<Utc>) -> MonitorResult<()> {
    conn.execute(
        "DELETE FROM registry_games WHERE expires_at <= ?1",
        params![now],
    )
    .map_err(MonitorError::registry_write)?;
    Ok(())
}

const REGISTRY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS registry_games (
    game_key   TEXT PRIMARY KEY,
    body       TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS registry_active (
    game_key TEXT PRIMARY KEY
);
"#;
