//! SQLite database connection and schema management
//!
//! Owns the engine database (definitions, progress, snapshots, ledger and
//! raw activity tables) with automatic schema migration.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Database wrapper shared by all engine components
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open or create the engine database at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open engine db: {}", path.display()))?;

        // WAL so background recomputes don't starve request-path reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::from_connection(conn)
    }

    /// Open a private in-memory database (tests, throwaway environments)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory engine db")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Get a guard on the connection (for queries and transactions)
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("Engine DB lock poisoned")
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA_SQL)?;
        drop(conn);
        self.run_migrations()?;
        Ok(())
    }

    /// Run any pending migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn();

        let version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(0);

        // Migration 2: per-user ledger index, added once snapshot refreshes
        // started summing the ledger on every claim
        if version < 2 {
            conn.execute_batch(
                r#"
                CREATE INDEX IF NOT EXISTS idx_ledger_user ON points_ledger(user_id);
                "#,
            )?;
            conn.execute("INSERT OR REPLACE INTO schema_version VALUES (2)", [])?;
        }

        Ok(())
    }
}

/// SQL schema for the engine database
const SCHEMA_SQL: &str = r#"
-- Achievement catalog (managed by admin tooling; the engine only reads
-- active rows)
CREATE TABLE IF NOT EXISTS achievement_definitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    criteria_type TEXT NOT NULL,
    criteria_value INTEGER NOT NULL,
    reward_points INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- Per-user progress toward each achievement. State moves one way:
-- locked -> unlocked -> claimed.
CREATE TABLE IF NOT EXISTS user_achievement_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    achievement_id INTEGER NOT NULL,
    current_progress INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'locked',
    unlocked_at INTEGER,
    claimed_at INTEGER,
    points_awarded INTEGER,
    UNIQUE(user_id, achievement_id),
    FOREIGN KEY (achievement_id) REFERENCES achievement_definitions(id)
);
CREATE INDEX IF NOT EXISTS idx_progress_user ON user_achievement_progress(user_id);

-- One snapshot per user. rank = 0 means "never ranked"; dense ranks >= 1
-- are assigned only by a full recompute, so a freshly updated snapshot can
-- carry a stale rank until the next recompute runs.
CREATE TABLE IF NOT EXISTS leaderboard_snapshots (
    user_id TEXT PRIMARY KEY,
    rank INTEGER NOT NULL DEFAULT 0,
    total_rentals INTEGER NOT NULL DEFAULT 0,
    total_points_earned INTEGER NOT NULL DEFAULT 0,
    referrals_count INTEGER NOT NULL DEFAULT 0,
    timely_returns INTEGER NOT NULL DEFAULT 0,
    last_updated INTEGER NOT NULL
);

-- Append-only points ledger
CREATE TABLE IF NOT EXISTS points_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    source TEXT NOT NULL,
    description TEXT,
    created_at INTEGER NOT NULL
);

-- Raw activity counters (source of truth for progress snapshots)
CREATE TABLE IF NOT EXISTS rentals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    returned_on_time INTEGER NOT NULL DEFAULT 0,
    completed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rentals_user ON rentals(user_id);

CREATE TABLE IF NOT EXISTS referrals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    referrer_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_referrals_referrer ON referrals(referrer_id);

-- Schema version
CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);
INSERT OR IGNORE INTO schema_version VALUES (1);
"#;
