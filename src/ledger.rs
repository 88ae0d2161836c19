//! Points ledger
//!
//! Append-only record of awarded points. Awards execute inside the caller's
//! claim transaction so they commit or roll back together with the claim.

use chrono::Utc;
use rusqlite::{Connection, Transaction};

use crate::error::LedgerError;

/// Ledger source tag for achievement rewards
pub const SOURCE_ACHIEVEMENT: &str = "ACHIEVEMENT";

/// Awards points to users
///
/// The transaction parameter is the claim's own transaction; an `Err` from
/// `award` aborts the entire claim.
pub trait PointsLedger: Send + Sync {
    fn award(
        &self,
        tx: &Transaction<'_>,
        user_id: &str,
        amount: i64,
        source: &str,
        description: &str,
    ) -> Result<(), LedgerError>;
}

/// Ledger backed by the `points_ledger` table in the engine database
#[derive(Default)]
pub struct SqlitePointsLedger;

impl SqlitePointsLedger {
    pub fn new() -> Self {
        Self
    }
}

impl PointsLedger for SqlitePointsLedger {
    fn award(
        &self,
        tx: &Transaction<'_>,
        user_id: &str,
        amount: i64,
        source: &str,
        description: &str,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().timestamp_millis();
        tx.execute(
            "INSERT INTO points_ledger (user_id, amount, source, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![user_id, amount, source, description, now],
        )?;
        Ok(())
    }
}

/// Lifetime points awarded to a user
pub fn total_awarded(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM points_ledger WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )
}
