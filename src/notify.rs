//! Notification dispatch and the background task queue
//!
//! Business operations never deliver notifications inline; they enqueue
//! jobs onto a single worker task. Delivery is at-least-once with bounded
//! retries, and every notification carries a dedup key so redelivered jobs
//! are consumed idempotently. Dispatch failures are logged and swallowed;
//! they never fail the triggering operation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::leaderboard::LeaderboardRanker;

pub const TEMPLATE_ACHIEVEMENT_UNLOCKED: &str = "achievement_unlocked";
pub const TEMPLATE_ACHIEVEMENT_CLAIMED: &str = "achievement_claimed";
pub const TEMPLATE_ACHIEVEMENTS_CLAIMED: &str = "achievements_claimed";

/// Delivery attempts before a notification is dropped
const DELIVERY_ATTEMPTS: u32 = 3;

/// A queued notification
#[derive(Debug, Clone)]
pub struct Notification {
    /// Dedup key: the worker skips ids it has already consumed
    pub id: Uuid,
    pub user_id: String,
    pub template_key: String,
    pub data: Value,
}

impl Notification {
    pub fn new(user_id: &str, template_key: &str, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            template_key: template_key.to_string(),
            data,
        }
    }
}

/// Delivers notifications to users (push, SMS, email - not this crate's
/// concern). Best effort: errors are logged by the queue, never propagated.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default dispatcher: one structured log line per notification
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            "notify user={} template={} data={}",
            notification.user_id, notification.template_key, notification.data
        );
        Ok(())
    }
}

/// Work items for the background worker
pub enum BackgroundJob {
    Notify(Notification),
    RecalculateRanks,
    /// Flush marker: acknowledged once every job before it has been processed
    Barrier(oneshot::Sender<()>),
}

/// Handle for submitting background work
///
/// All jobs run on one worker task, which also serializes full-rank
/// recomputes against each other.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<BackgroundJob>,
}

impl TaskQueue {
    /// Spawn the worker task. Must be called inside a Tokio runtime.
    pub fn start(dispatcher: Arc<dyn NotificationDispatcher>, ranker: LeaderboardRanker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, dispatcher, ranker));
        Self { tx }
    }

    /// Queue with no worker behind it; submitted jobs are dropped. For unit
    /// tests of components that only need to enqueue.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Enqueue a job. Never blocks; if the worker is gone the job is
    /// dropped with a log line.
    pub fn submit(&self, job: BackgroundJob) {
        if self.tx.send(job).is_err() {
            debug!("background queue closed, job dropped");
        }
    }

    /// Wait until every job submitted before this call has been processed
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(BackgroundJob::Barrier(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<BackgroundJob>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    ranker: LeaderboardRanker,
) {
    let mut consumed: HashSet<Uuid> = HashSet::new();

    while let Some(job) = rx.recv().await {
        match job {
            BackgroundJob::Notify(notification) => {
                if !consumed.insert(notification.id) {
                    debug!("duplicate notification {} skipped", notification.id);
                    continue;
                }
                deliver(dispatcher.as_ref(), &notification).await;
            }
            BackgroundJob::RecalculateRanks => match ranker.recalculate_all_ranks() {
                Ok(changed) => debug!("rank recompute updated {} rows", changed),
                Err(e) => warn!("rank recompute failed: {}", e),
            },
            BackgroundJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn deliver(dispatcher: &dyn NotificationDispatcher, notification: &Notification) {
    for attempt in 1..=DELIVERY_ATTEMPTS {
        match dispatcher.notify(notification).await {
            Ok(()) => return,
            Err(e) if attempt < DELIVERY_ATTEMPTS => {
                warn!(
                    "notification {} delivery attempt {} failed: {}",
                    notification.template_key, attempt, e
                );
            }
            Err(e) => {
                warn!(
                    "notification {} for user {} dropped after {} attempts: {}",
                    notification.template_key, notification.user_id, DELIVERY_ATTEMPTS, e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::db::Db;

    /// Dispatcher that records everything it delivers
    pub struct RecordingDispatcher {
        pub delivered: Mutex<Vec<Notification>>,
    }

    impl RecordingDispatcher {
        pub fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_duplicate_submissions_are_consumed_once() {
        let db = Db::open_in_memory().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let queue = TaskQueue::start(dispatcher.clone(), LeaderboardRanker::new(db));

        let note = Notification::new("u1", TEMPLATE_ACHIEVEMENT_UNLOCKED, serde_json::json!({}));
        queue.submit(BackgroundJob::Notify(note.clone()));
        // Task-queue redelivery of the same job
        queue.submit(BackgroundJob::Notify(note));
        queue.flush().await;

        assert_eq!(dispatcher.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_swallowed() {
        struct FailingDispatcher;

        #[async_trait]
        impl NotificationDispatcher for FailingDispatcher {
            async fn notify(&self, _notification: &Notification) -> anyhow::Result<()> {
                anyhow::bail!("gateway unavailable")
            }
        }

        let db = Db::open_in_memory().unwrap();
        let queue = TaskQueue::start(Arc::new(FailingDispatcher), LeaderboardRanker::new(db));

        queue.submit(BackgroundJob::Notify(Notification::new(
            "u1",
            TEMPLATE_ACHIEVEMENT_CLAIMED,
            serde_json::json!({"points": 50}),
        )));
        // Worker stays alive and the failure never surfaces
        queue.flush().await;
    }
}
