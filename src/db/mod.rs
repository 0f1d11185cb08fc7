use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::dispatch::GoalStore;

/// Goal history store (single SQLite connection behind a mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Goals ────────────────────────────────────────────────────────────────

    /// Append a goal attributed to `team`
    pub fn insert_goal(&self, team: &Team) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO goals (team_code, team_name, team_ext_id, league_id, team_hash, scored_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                team.team_code,
                team.team_name,
                team.ext_id,
                team.league_id.0,
                team.team_hash(),
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent goals first
    pub fn list_recent_goals(&self, limit: i64) -> Result<Vec<GoalRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, team_code, team_name, team_ext_id, league_id, team_hash, scored_at
             FROM goals ORDER BY id DESC LIMIT ?1",
        )?;
        let goals = stmt
            .query_map(params![limit], map_goal)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(goals)
    }

    /// Total goals per team
    pub fn goal_counts(&self) -> Result<Vec<GoalCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT team_code, league_id, COUNT(*) FROM goals
             GROUP BY league_id, team_code ORDER BY COUNT(*) DESC, team_code",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(GoalCount {
                    team_code: row.get(0)?,
                    league_id: row.get(1)?,
                    goals: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

#[async_trait]
impl GoalStore for Database {
    async fn insert_goal(&self, team: &Team) -> Result<()> {
        Database::insert_goal(self, team).map(|_| ())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_goal(row: &rusqlite::Row) -> rusqlite::Result<GoalRecord> {
    Ok(GoalRecord {
        id: row.get(0)?,
        team_code: row.get(1)?,
        team_name: row.get(2)?,
        team_ext_id: row.get(3)?,
        league_id: row.get(4)?,
        team_hash: row.get(5)?,
        scored_at: row.get(6)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS goals (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    team_code   TEXT    NOT NULL,
    team_name   TEXT    NOT NULL,
    team_ext_id TEXT    NOT NULL,
    league_id   INTEGER NOT NULL,
    team_hash   TEXT    NOT NULL,
    scored_at   TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_goals_team ON goals(league_id, team_code);
CREATE INDEX IF NOT EXISTS idx_goals_scored_at ON goals(scored_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn team(code: &str) -> Team {
        Team {
            team_code: code.into(),
            team_name: format!("{} Team", code),
            ext_id: "6".into(),
            league_id: LeagueId::NHL,
        }
    }

    #[test]
    fn test_insert_and_list_goals() {
        let db = Database::open(":memory:").unwrap();
        db.insert_goal(&team("BOS")).unwrap();
        db.insert_goal(&team("TOR")).unwrap();

        let goals = db.list_recent_goals(10).unwrap();
        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].team_code, "TOR");
        assert_eq!(goals[0].team_hash, team("TOR").team_hash());
        assert_eq!(goals[1].league_id, 1);
    }

    #[test]
    fn test_goal_counts_group_by_team() {
        let db = Database::open(":memory:").unwrap();
        db.insert_goal(&team("BOS")).unwrap();
        db.insert_goal(&team("BOS")).unwrap();
        db.insert_goal(&team("TOR")).unwrap();

        let counts = db.goal_counts().unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].team_code, "BOS");
        assert_eq!(counts[0].goals, 2);
        assert_eq!(counts[1].goals, 1);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        assert!(db.list_recent_goals(5).unwrap().is_empty());
    }
}
