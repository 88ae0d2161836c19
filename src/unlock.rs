//! Unlock engine
//!
//! Reconciles a user's counter snapshot against the active achievement
//! catalog. Progress is overwritten with the absolute snapshot value, so a
//! reconcile is idempotent; the locked -> unlocked edge fires at most once
//! per row and state never moves backwards, even if a counter later drops.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::catalog::CatalogStore;
use crate::db::Db;
use crate::models::{ProgressState, ReconcileOutcome, UserAchievementProgress};
use crate::notify::{BackgroundJob, Notification, TaskQueue, TEMPLATE_ACHIEVEMENT_UNLOCKED};
use crate::progress::ProgressCalculator;

/// Detects unlocks and keeps per-user progress rows current
#[derive(Clone)]
pub struct UnlockEngine {
    db: Db,
    catalog: CatalogStore,
    calculator: ProgressCalculator,
    queue: TaskQueue,
}

impl UnlockEngine {
    pub fn new(
        db: Db,
        catalog: CatalogStore,
        calculator: ProgressCalculator,
        queue: TaskQueue,
    ) -> Self {
        Self {
            db,
            catalog,
            calculator,
            queue,
        }
    }

    /// Reconcile one user against every active definition.
    ///
    /// Returns the full row set (locked rows included) plus the newly
    /// unlocked subset. A counter-source failure aborts the whole call; no
    /// stale list is returned.
    pub fn reconcile(&self, user_id: &str) -> Result<ReconcileOutcome> {
        let definitions = self.catalog.list_active()?;
        let snapshot = self.calculator.compute(user_id)?;
        let now = Utc::now().timestamp_millis();

        let mut rows = Vec::with_capacity(definitions.len());
        let mut newly_unlocked = Vec::new();
        let mut unlock_notes = Vec::new();

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        for def in &definitions {
            // Lazily create the row on first contact with this achievement
            tx.execute(
                "INSERT OR IGNORE INTO user_achievement_progress
                     (user_id, achievement_id, current_progress, state)
                 VALUES (?1, ?2, 0, 'locked')",
                rusqlite::params![user_id, def.id],
            )?;

            let mut row: UserAchievementProgress = tx.query_row(
                "SELECT id, user_id, achievement_id, current_progress, state,
                        unlocked_at, claimed_at, points_awarded
                 FROM user_achievement_progress
                 WHERE user_id = ?1 AND achievement_id = ?2",
                rusqlite::params![user_id, def.id],
                UserAchievementProgress::from_row,
            )?;

            // Absolute overwrite - recomputation, not increment
            row.current_progress = snapshot.value_for(def.criteria_type);
            tx.execute(
                "UPDATE user_achievement_progress SET current_progress = ?1 WHERE id = ?2",
                rusqlite::params![row.current_progress, row.id],
            )?;

            if row.state == ProgressState::Locked && row.current_progress >= def.criteria_value {
                // The state guard in SQL keeps the edge one-shot even if two
                // reconciles race on the same row
                let unlocked = tx.execute(
                    "UPDATE user_achievement_progress
                     SET state = 'unlocked', unlocked_at = ?1
                     WHERE id = ?2 AND state = 'locked'",
                    rusqlite::params![now, row.id],
                )?;
                if unlocked == 1 {
                    row.state = ProgressState::Unlocked;
                    row.unlocked_at = Some(now);
                    newly_unlocked.push(row.clone());
                    unlock_notes.push(Notification::new(
                        user_id,
                        TEMPLATE_ACHIEVEMENT_UNLOCKED,
                        json!({
                            "achievement": def.name,
                            "reward_points": def.reward_points,
                        }),
                    ));
                }
            }

            rows.push(row);
        }
        tx.commit()?;
        drop(conn);

        if !newly_unlocked.is_empty() {
            debug!(
                "user {} unlocked {} achievements",
                user_id,
                newly_unlocked.len()
            );
        }
        for note in unlock_notes {
            self.queue.submit(BackgroundJob::Notify(note));
        }

        let unclaimed_count = rows
            .iter()
            .filter(|r| r.state == ProgressState::Unlocked)
            .count();

        Ok(ReconcileOutcome {
            progress: rows,
            newly_unlocked,
            unclaimed_count,
        })
    }
}
