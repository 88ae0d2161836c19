//! Claim processing
//!
//! Validates and executes reward claims. The unlocked -> claimed edge is a
//! compare-and-set inside one immediate transaction; the ledger award and
//! the user's snapshot refresh ride in the same transaction, so a failure
//! anywhere rolls the whole claim back and no points are issued.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use rusqlite::{OptionalExtension, TransactionBehavior};
use serde_json::json;
use tracing::debug;

use crate::db::Db;
use crate::error::ClaimError;
use crate::leaderboard::LeaderboardRanker;
use crate::ledger::{PointsLedger, SOURCE_ACHIEVEMENT};
use crate::models::{BulkClaimOutcome, ClaimFailure, ProgressState, UserAchievementProgress};
use crate::notify::{
    BackgroundJob, Notification, TaskQueue, TEMPLATE_ACHIEVEMENTS_CLAIMED,
    TEMPLATE_ACHIEVEMENT_CLAIMED,
};

/// Upper bound on a single bulk claim request
pub const MAX_CLAIM_BATCH: usize = 50;

/// Executes single and bulk reward claims
#[derive(Clone)]
pub struct ClaimProcessor {
    db: Db,
    ledger: Arc<dyn PointsLedger>,
    queue: TaskQueue,
}

impl ClaimProcessor {
    pub fn new(db: Db, ledger: Arc<dyn PointsLedger>, queue: TaskQueue) -> Self {
        Self { db, ledger, queue }
    }

    /// Claim one unlocked achievement, awarding its points exactly once
    pub fn claim(
        &self,
        user_id: &str,
        progress_id: i64,
    ) -> Result<UserAchievementProgress, ClaimError> {
        let (record, name) = self.claim_one(user_id, progress_id)?;

        self.queue.submit(BackgroundJob::RecalculateRanks);
        self.queue.submit(BackgroundJob::Notify(Notification::new(
            user_id,
            TEMPLATE_ACHIEVEMENT_CLAIMED,
            json!({
                "achievement": name,
                "points": record.points_awarded.unwrap_or(0),
            }),
        )));

        Ok(record)
    }

    /// Claim a batch of achievements.
    ///
    /// Items are processed in the given order, each in its own transaction,
    /// so one failure never rolls back earlier successes. Per-item errors
    /// land in the result; only a structurally invalid batch errors out.
    /// The whole batch produces at most one consolidated notification.
    pub fn claim_multiple(
        &self,
        user_id: &str,
        progress_ids: &[i64],
    ) -> Result<BulkClaimOutcome, ClaimError> {
        if progress_ids.is_empty() {
            return Err(ClaimError::Validation(
                "progress id list is empty".to_string(),
            ));
        }
        if progress_ids.len() > MAX_CLAIM_BATCH {
            return Err(ClaimError::Validation(format!(
                "batch of {} exceeds the limit of {MAX_CLAIM_BATCH}",
                progress_ids.len()
            )));
        }

        let mut outcome = BulkClaimOutcome::default();
        let mut claimed_names = Vec::new();

        for &progress_id in progress_ids {
            match self.claim_one(user_id, progress_id) {
                Ok((record, name)) => {
                    outcome.total_points_awarded += record.points_awarded.unwrap_or(0);
                    claimed_names.push(name);
                    outcome.claimed.push(record);
                }
                Err(err) => outcome.failures.push(ClaimFailure {
                    progress_id,
                    code: err.code().to_string(),
                    message: err.to_string(),
                }),
            }
        }

        if !outcome.claimed.is_empty() {
            self.queue.submit(BackgroundJob::RecalculateRanks);
        }

        // One consolidated notification for the batch: singular phrasing
        // for a single success, aggregate phrasing for several, nothing
        // when every item failed
        match outcome.claimed.len() {
            0 => {}
            1 => self.queue.submit(BackgroundJob::Notify(Notification::new(
                user_id,
                TEMPLATE_ACHIEVEMENT_CLAIMED,
                json!({
                    "achievement": claimed_names[0],
                    "points": outcome.total_points_awarded,
                }),
            ))),
            count => self.queue.submit(BackgroundJob::Notify(Notification::new(
                user_id,
                TEMPLATE_ACHIEVEMENTS_CLAIMED,
                json!({
                    "count": count,
                    "total_points": outcome.total_points_awarded,
                }),
            ))),
        }

        Ok(outcome)
    }

    /// One claim in one immediate transaction.
    ///
    /// Returns the claimed row plus the achievement name for notifications.
    fn claim_one(
        &self,
        user_id: &str,
        progress_id: i64,
    ) -> Result<(UserAchievementProgress, String), ClaimError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let found = tx
            .query_row(
                "SELECT p.id, p.user_id, p.achievement_id, p.current_progress, p.state,
                        p.unlocked_at, p.claimed_at, p.points_awarded, d.name, d.reward_points
                 FROM user_achievement_progress p
                 JOIN achievement_definitions d ON d.id = p.achievement_id
                 WHERE p.id = ?1 AND p.user_id = ?2",
                rusqlite::params![progress_id, user_id],
                |row| {
                    let record = UserAchievementProgress::from_row(row)?;
                    Ok((record, row.get::<_, String>(8)?, row.get::<_, i64>(9)?))
                },
            )
            .optional()?;

        let Some((mut record, name, reward_points)) = found else {
            return Err(ClaimError::NotFound(progress_id));
        };

        match record.state {
            ProgressState::Locked => return Err(ClaimError::NotUnlocked(progress_id)),
            ProgressState::Claimed => return Err(ClaimError::AlreadyClaimed(progress_id)),
            ProgressState::Unlocked => {}
        }

        // The compare-and-set: only a request that still observes
        // state = 'unlocked' may move the row. A concurrent winner leaves
        // zero rows for the loser to update.
        let won = tx.execute(
            "UPDATE user_achievement_progress
             SET state = 'claimed', claimed_at = ?1, points_awarded = ?2
             WHERE id = ?3 AND state = 'unlocked'",
            rusqlite::params![now, reward_points, progress_id],
        )?;
        if won == 0 {
            return Err(ClaimError::AlreadyClaimed(progress_id));
        }

        self.ledger.award(
            &tx,
            user_id,
            reward_points,
            SOURCE_ACHIEVEMENT,
            &format!("Achievement: {name}"),
        )?;

        LeaderboardRanker::refresh_snapshot(&tx, user_id)
            .context("leaderboard snapshot refresh failed")?;

        tx.commit()?;

        record.state = ProgressState::Claimed;
        record.claimed_at = Some(now);
        record.points_awarded = Some(reward_points);
        debug!(
            "user {} claimed '{}' (+{} points)",
            user_id, name, reward_points
        );
        Ok((record, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityStore;
    use crate::catalog::{CatalogStore, NewAchievement};
    use crate::error::LedgerError;
    use crate::ledger::{self, SqlitePointsLedger};
    use crate::models::CriteriaType;
    use crate::progress::ProgressCalculator;
    use crate::unlock::UnlockEngine;

    struct Fixture {
        db: Db,
        activity: ActivityStore,
        catalog: CatalogStore,
        unlocker: UnlockEngine,
        claims: ClaimProcessor,
    }

    fn fixture() -> Fixture {
        fixture_with_ledger(Arc::new(SqlitePointsLedger::new()))
    }

    fn fixture_with_ledger(ledger: Arc<dyn PointsLedger>) -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let catalog = CatalogStore::new(db.clone());
        let activity = ActivityStore::new(db.clone());
        let calculator = ProgressCalculator::new(Arc::new(activity.clone()));
        let unlocker = UnlockEngine::new(
            db.clone(),
            catalog.clone(),
            calculator,
            TaskQueue::disabled(),
        );
        let claims = ClaimProcessor::new(db.clone(), ledger, TaskQueue::disabled());
        Fixture {
            db,
            activity,
            catalog,
            unlocker,
            claims,
        }
    }

    /// Seed "5 Rentals" worth 50 points and drive u1 to the unlock
    fn unlock_five_rentals(fx: &Fixture) -> i64 {
        fx.catalog
            .insert(&NewAchievement {
                name: "5 Rentals".to_string(),
                criteria_type: CriteriaType::RentalCount,
                criteria_value: 5,
                reward_points: 50,
            })
            .unwrap();
        for _ in 0..5 {
            fx.activity.record_rental("u1", true).unwrap();
        }
        let outcome = fx.unlocker.reconcile("u1").unwrap();
        outcome.progress[0].id
    }

    #[test]
    fn test_claim_awards_points_exactly_once() {
        let fx = fixture();
        let progress_id = unlock_five_rentals(&fx);

        let record = fx.claims.claim("u1", progress_id).unwrap();
        assert_eq!(record.state, ProgressState::Claimed);
        assert_eq!(record.points_awarded, Some(50));
        assert!(record.claimed_at.is_some());
        assert_eq!(ledger::total_awarded(&fx.db.conn(), "u1").unwrap(), 50);

        // Second claim fails and the balance does not move
        let err = fx.claims.claim("u1", progress_id).unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyClaimed(_)));
        assert_eq!(ledger::total_awarded(&fx.db.conn(), "u1").unwrap(), 50);
    }

    #[test]
    fn test_claim_unknown_or_foreign_row_is_not_found() {
        let fx = fixture();
        let progress_id = unlock_five_rentals(&fx);

        let err = fx.claims.claim("u1", 9999).unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(9999)));

        // Another user cannot claim u1's row
        let err = fx.claims.claim("u2", progress_id).unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)));
    }

    #[test]
    fn test_claim_before_unlock_is_rejected() {
        let fx = fixture();
        fx.catalog
            .insert(&NewAchievement {
                name: "5 Rentals".to_string(),
                criteria_type: CriteriaType::RentalCount,
                criteria_value: 5,
                reward_points: 50,
            })
            .unwrap();
        fx.activity.record_rental("u1", true).unwrap();
        let outcome = fx.unlocker.reconcile("u1").unwrap();
        let progress_id = outcome.progress[0].id;

        let err = fx.claims.claim("u1", progress_id).unwrap_err();
        assert!(matches!(err, ClaimError::NotUnlocked(_)));
        assert_eq!(ledger::total_awarded(&fx.db.conn(), "u1").unwrap(), 0);
    }

    #[test]
    fn test_ledger_failure_rolls_back_the_claim() {
        struct RejectingLedger;

        impl PointsLedger for RejectingLedger {
            fn award(
                &self,
                _tx: &rusqlite::Transaction<'_>,
                _user_id: &str,
                _amount: i64,
                _source: &str,
                _description: &str,
            ) -> Result<(), LedgerError> {
                Err(LedgerError::Rejected("wallet frozen".to_string()))
            }
        }

        let fx = fixture_with_ledger(Arc::new(RejectingLedger));
        let progress_id = unlock_five_rentals(&fx);

        let err = fx.claims.claim("u1", progress_id).unwrap_err();
        assert_eq!(err.code(), "INTERNAL");

        // The compare-and-set was rolled back with the award, so the row is
        // still claimable
        let outcome = fx.unlocker.reconcile("u1").unwrap();
        assert_eq!(outcome.progress[0].state, ProgressState::Unlocked);
        assert_eq!(outcome.unclaimed_count, 1);
    }

    #[test]
    fn test_bulk_claim_partial_failure() {
        let fx = fixture();
        for name in ["A", "B", "C"] {
            fx.catalog
                .insert(&NewAchievement {
                    name: name.to_string(),
                    criteria_type: CriteriaType::RentalCount,
                    criteria_value: 1,
                    reward_points: 10,
                })
                .unwrap();
        }
        fx.activity.record_rental("u1", true).unwrap();
        let outcome = fx.unlocker.reconcile("u1").unwrap();
        let ids: Vec<i64> = outcome.progress.iter().map(|p| p.id).collect();

        // B is already claimed before the batch runs
        fx.claims.claim("u1", ids[1]).unwrap();

        let bulk = fx.claims.claim_multiple("u1", &ids).unwrap();
        assert_eq!(bulk.success_count(), 2);
        assert_eq!(bulk.failure_count(), 1);
        assert_eq!(bulk.total_points_awarded, 20);
        assert_eq!(bulk.claimed[0].id, ids[0]);
        assert_eq!(bulk.claimed[1].id, ids[2]);
        assert_eq!(bulk.failures[0].progress_id, ids[1]);
        assert_eq!(bulk.failures[0].code, "ALREADY_CLAIMED");

        assert_eq!(ledger::total_awarded(&fx.db.conn(), "u1").unwrap(), 30);
    }

    #[test]
    fn test_bulk_claim_validates_batch_shape() {
        let fx = fixture();

        let err = fx.claims.claim_multiple("u1", &[]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let oversized: Vec<i64> = (0..(MAX_CLAIM_BATCH as i64 + 1)).collect();
        let err = fx.claims.claim_multiple("u1", &oversized).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn test_claim_refreshes_leaderboard_snapshot() {
        let fx = fixture();
        let progress_id = unlock_five_rentals(&fx);

        fx.claims.claim("u1", progress_id).unwrap();

        let ranker = LeaderboardRanker::new(fx.db.clone());
        let snapshot = ranker.get_snapshot("u1").unwrap().unwrap();
        assert_eq!(snapshot.total_points_earned, 50);
        assert_eq!(snapshot.total_rentals, 5);
        assert_eq!(snapshot.timely_returns, 5);
        assert_eq!(snapshot.rank, 0, "rank waits for the background recompute");
    }
}
