//! Engine facade
//!
//! Wires storage, collaborators and the background queue into the surface
//! callers consume: get achievements (always a fresh reconcile), claim one
//! or many, read leaderboards.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::activity::ActivityStore;
use crate::catalog::CatalogStore;
use crate::claim::ClaimProcessor;
use crate::db::Db;
use crate::error::ClaimError;
use crate::leaderboard::LeaderboardRanker;
use crate::ledger::{PointsLedger, SqlitePointsLedger};
use crate::models::{
    BulkClaimOutcome, LeaderboardCategory, LeaderboardView, ReconcileOutcome,
    UserAchievementProgress,
};
use crate::notify::{NotificationDispatcher, TaskQueue, TracingDispatcher};
use crate::progress::{ProgressCalculator, ProgressSource};
use crate::unlock::UnlockEngine;

/// Central entry point for the achievement and leaderboard engine
///
/// Construct inside a Tokio runtime: background jobs (rank recomputes,
/// notification delivery) run on a spawned worker task.
#[derive(Clone)]
pub struct Engine {
    catalog: CatalogStore,
    activity: ActivityStore,
    unlocker: UnlockEngine,
    claims: ClaimProcessor,
    ranker: LeaderboardRanker,
    queue: TaskQueue,
}

impl Engine {
    /// Open with default wiring: in-process activity counters, the SQLite
    /// points ledger, and log-only notifications
    pub fn open(path: &Path) -> Result<Self> {
        let db = Db::open(path)?;
        let activity = ActivityStore::new(db.clone());
        Ok(Self::with_collaborators(
            db,
            Arc::new(activity),
            Arc::new(SqlitePointsLedger::new()),
            Arc::new(TracingDispatcher),
        ))
    }

    /// Wire explicit collaborators: an external counter source, ledger or
    /// notification channel
    pub fn with_collaborators(
        db: Db,
        source: Arc<dyn ProgressSource>,
        ledger: Arc<dyn PointsLedger>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let catalog = CatalogStore::new(db.clone());
        let activity = ActivityStore::new(db.clone());
        let ranker = LeaderboardRanker::new(db.clone());
        let queue = TaskQueue::start(dispatcher, ranker.clone());
        let calculator = ProgressCalculator::new(source);
        let unlocker = UnlockEngine::new(db.clone(), catalog.clone(), calculator, queue.clone());
        let claims = ClaimProcessor::new(db, ledger, queue.clone());

        Self {
            catalog,
            activity,
            unlocker,
            claims,
            ranker,
            queue,
        }
    }

    /// Full progress list for a user, freshly reconciled against the active
    /// catalog, with the count of claimable rows
    pub fn achievements(&self, user_id: &str) -> Result<ReconcileOutcome> {
        self.unlocker.reconcile(user_id)
    }

    /// Claim one unlocked achievement
    pub fn claim(
        &self,
        user_id: &str,
        progress_id: i64,
    ) -> Result<UserAchievementProgress, ClaimError> {
        self.claims.claim(user_id, progress_id)
    }

    /// Claim a batch; partial success is reported per item
    pub fn claim_many(
        &self,
        user_id: &str,
        progress_ids: &[i64],
    ) -> Result<BulkClaimOutcome, ClaimError> {
        self.claims.claim_multiple(user_id, progress_ids)
    }

    /// Leaderboard page for a category, optionally with the requesting
    /// user's own entry appended
    pub fn leaderboard(
        &self,
        category: LeaderboardCategory,
        limit: usize,
        include_user: Option<&str>,
    ) -> Result<LeaderboardView> {
        self.ranker.leaderboard(category, limit, include_user)
    }

    /// Run the full rank recompute inline (normally a background job)
    pub fn recalculate_ranks_now(&self) -> Result<usize> {
        self.ranker.recalculate_all_ranks()
    }

    /// Wait for all previously queued background work (tests, shutdown)
    pub async fn flush_background(&self) {
        self.queue.flush().await
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn activity(&self) -> &ActivityStore {
        &self.activity
    }

    pub fn ranker(&self) -> &LeaderboardRanker {
        &self.ranker
    }
}
