//! Leaderboard snapshots and global ranking
//!
//! Per-user snapshot refreshes are cheap and run inline after a claim; the
//! full rank recompute is O(N log N) and only ever runs out-of-band.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use tracing::debug;

use crate::db::Db;
use crate::ledger;
use crate::models::{LeaderboardCategory, LeaderboardSnapshot, LeaderboardView};

/// Maintains per-user snapshots and the global rank ordering
#[derive(Clone)]
pub struct LeaderboardRanker {
    db: Db,
    /// Full recomputes never overlap
    recompute_gate: Arc<Mutex<()>>,
}

impl LeaderboardRanker {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            recompute_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Recompute one user's counters from the source-of-truth tables.
    /// Synchronous and O(1); never touches rank, so the stored rank can be
    /// stale until the next full recompute.
    pub fn update_snapshot(&self, user_id: &str) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        Self::refresh_snapshot(&tx, user_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Same refresh against a caller-owned connection or transaction
    /// (the claim path runs it inside the claim transaction)
    pub(crate) fn refresh_snapshot(conn: &Connection, user_id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        let (total_rentals, timely_returns) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(returned_on_time), 0) FROM rentals WHERE user_id = ?1",
            [user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let referrals_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM referrals WHERE referrer_id = ?1 AND status = 'completed'",
            [user_id],
            |row| row.get(0),
        )?;
        let total_points = ledger::total_awarded(conn, user_id)?;

        conn.execute(
            r#"INSERT INTO leaderboard_snapshots
                   (user_id, rank, total_rentals, total_points_earned, referrals_count, timely_returns, last_updated)
               VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(user_id) DO UPDATE SET
                   total_rentals = ?2, total_points_earned = ?3, referrals_count = ?4,
                   timely_returns = ?5, last_updated = ?6"#,
            rusqlite::params![
                user_id,
                total_rentals,
                total_points,
                referrals_count,
                timely_returns,
                now
            ],
        )?;
        Ok(())
    }

    /// Score every snapshot, sort, and assign dense ranks 1..N.
    /// Returns the number of rows whose rank actually changed.
    ///
    /// O(N log N) over all users - run from the background queue, never
    /// inline on a request path.
    pub fn recalculate_all_ranks(&self) -> Result<usize> {
        let _gate = self
            .recompute_gate
            .lock()
            .expect("rank recompute gate poisoned");

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;

        let mut snapshots: Vec<LeaderboardSnapshot> = {
            let mut stmt = tx.prepare(
                "SELECT user_id, rank, total_rentals, total_points_earned, referrals_count, timely_returns, last_updated
                 FROM leaderboard_snapshots",
            )?;
            let rows = stmt.query_map([], LeaderboardSnapshot::from_row)?;
            rows.filter_map(|r| r.ok()).collect()
        };

        // Highest score first; ties broken by user id so the ordering is
        // deterministic
        snapshots.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        let mut changed = 0;
        for (i, snapshot) in snapshots.iter().enumerate() {
            let rank = (i + 1) as i64;
            if snapshot.rank != rank {
                tx.execute(
                    "UPDATE leaderboard_snapshots SET rank = ?1 WHERE user_id = ?2",
                    rusqlite::params![rank, snapshot.user_id],
                )?;
                changed += 1;
            }
        }
        tx.commit()?;

        debug!(
            "rank recompute over {} snapshots changed {} rows",
            snapshots.len(),
            changed
        );
        Ok(changed)
    }

    /// Top-`limit` snapshots for a category, plus the requesting user's own
    /// row when it did not make the page. Read-only.
    pub fn leaderboard(
        &self,
        category: LeaderboardCategory,
        limit: usize,
        include_user: Option<&str>,
    ) -> Result<LeaderboardView> {
        let conn = self.db.conn();

        // Never-ranked rows (rank 0) sort after ranked ones in the overall
        // view
        let order = match category {
            LeaderboardCategory::Overall => "rank = 0, rank ASC, user_id ASC",
            LeaderboardCategory::Rentals => "total_rentals DESC, user_id ASC",
            LeaderboardCategory::Points => "total_points_earned DESC, user_id ASC",
            LeaderboardCategory::Referrals => "referrals_count DESC, user_id ASC",
            LeaderboardCategory::TimelyReturns => "timely_returns DESC, user_id ASC",
        };
        let sql = format!(
            "SELECT user_id, rank, total_rentals, total_points_earned, referrals_count, timely_returns, last_updated
             FROM leaderboard_snapshots ORDER BY {order} LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries: Vec<LeaderboardSnapshot> = stmt
            .query_map([limit as i64], LeaderboardSnapshot::from_row)?
            .filter_map(|r| r.ok())
            .collect();

        let user_entry = match include_user {
            Some(user_id) if !entries.iter().any(|e| e.user_id == user_id) => {
                Self::fetch_snapshot(&conn, user_id)?
            }
            _ => None,
        };

        Ok(LeaderboardView {
            entries,
            user_entry,
        })
    }

    /// One user's snapshot, if any
    pub fn get_snapshot(&self, user_id: &str) -> Result<Option<LeaderboardSnapshot>> {
        Self::fetch_snapshot(&self.db.conn(), user_id)
    }

    fn fetch_snapshot(conn: &Connection, user_id: &str) -> Result<Option<LeaderboardSnapshot>> {
        let mut stmt = conn
            .prepare(
                "SELECT user_id, rank, total_rentals, total_points_earned, referrals_count, timely_returns, last_updated
                 FROM leaderboard_snapshots WHERE user_id = ?1",
            )
            .context("snapshot query failed")?;
        let mut rows = stmt.query_map([user_id], LeaderboardSnapshot::from_row)?;
        Ok(rows.next().transpose()?)
    }
}
