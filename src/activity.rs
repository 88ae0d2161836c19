//! Raw activity store - rentals and referrals
//!
//! Source of truth for the counters that achievements and leaderboard
//! snapshots are computed from. Writers live in the rental/referral flows;
//! the engine consumes the counters through [`ProgressSource`].

use anyhow::Result;
use chrono::Utc;

use crate::db::Db;
use crate::progress::{ProgressSource, RentalStats};

/// Records and aggregates raw rental/referral activity
#[derive(Clone)]
pub struct ActivityStore {
    db: Db,
}

impl ActivityStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Record a completed rental
    pub fn record_rental(&self, user_id: &str, returned_on_time: bool) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO rentals (user_id, returned_on_time, completed_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, returned_on_time as i32, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record a new (pending) referral
    pub fn record_referral(&self, referrer_id: &str) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO referrals (referrer_id, status, created_at) VALUES (?1, 'pending', ?2)",
            rusqlite::params![referrer_id, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Mark a referral as completed (the referred user converted)
    pub fn complete_referral(&self, referral_id: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.db.conn();
        conn.execute(
            "UPDATE referrals SET status = 'completed', completed_at = ?1 WHERE id = ?2",
            rusqlite::params![now, referral_id],
        )?;
        Ok(())
    }
}

impl ProgressSource for ActivityStore {
    fn rental_stats(&self, user_id: &str) -> Result<RentalStats> {
        let conn = self.db.conn();
        let (total, timely) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(returned_on_time), 0) FROM rentals WHERE user_id = ?1",
            [user_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(RentalStats { total, timely })
    }

    fn completed_referrals(&self, user_id: &str) -> Result<i64> {
        let conn = self.db.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM referrals WHERE referrer_id = ?1 AND status = 'completed'",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rental_and_referral_counters() {
        let db = Db::open_in_memory().unwrap();
        let activity = ActivityStore::new(db);

        activity.record_rental("u1", true).unwrap();
        activity.record_rental("u1", false).unwrap();
        activity.record_rental("u2", true).unwrap();

        let referral = activity.record_referral("u1").unwrap();
        activity.record_referral("u1").unwrap(); // stays pending
        activity.complete_referral(referral).unwrap();

        let stats = activity.rental_stats("u1").unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.timely, 1);

        // Pending referrals don't count
        assert_eq!(activity.completed_referrals("u1").unwrap(), 1);
        assert_eq!(activity.completed_referrals("u2").unwrap(), 0);
    }
}
