//! Shared helpers for integration tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use podium::activity::ActivityStore;
use podium::catalog::NewAchievement;
use podium::db::Db;
use podium::ledger::SqlitePointsLedger;
use podium::notify::{Notification, NotificationDispatcher};
use podium::{CriteriaType, Engine};

/// Dispatcher that records every delivered notification
pub struct RecordingDispatcher {
    pub delivered: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_template(&self, template_key: &str) -> Vec<Notification> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.template_key == template_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Opt-in log output for test debugging (`RUST_LOG=debug cargo test`)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// In-memory engine with a recording dispatcher. Must run inside a Tokio
/// runtime (the engine spawns its background worker).
pub fn test_engine() -> (Engine, Arc<RecordingDispatcher>) {
    init_tracing();
    let db = Db::open_in_memory().expect("in-memory db");
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let activity = ActivityStore::new(db.clone());
    let engine = Engine::with_collaborators(
        db,
        Arc::new(activity),
        Arc::new(SqlitePointsLedger::new()),
        dispatcher.clone(),
    );
    (engine, dispatcher)
}

/// Seed a rental-count achievement and return its catalog id
pub fn seed_rental_achievement(engine: &Engine, name: &str, value: i64, points: i64) -> i64 {
    engine
        .catalog()
        .insert(&NewAchievement {
            name: name.to_string(),
            criteria_type: CriteriaType::RentalCount,
            criteria_value: value,
            reward_points: points,
        })
        .expect("seed achievement")
}
