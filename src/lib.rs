//! Podium - achievement and leaderboard engine
//!
//! Tracks progress toward achievements derived from rental activity,
//! unlocks them when their criteria are met, lets users claim rewards
//! exactly once, and maintains a ranked leaderboard.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌───────────────┐
//! │ProgressSource│───▶│ UnlockEngine │───▶│ClaimProcessor │
//! │  (counters)  │    │ (reconcile)  │    │ (CAS + ledger)│
//! └──────────────┘    └──────┬───────┘    └───────┬───────┘
//!                            │                    │
//!                            ▼                    ▼
//!                      TaskQueue ──▶ notifications + rank recompute
//!                                        (LeaderboardRanker)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let engine = Engine::open(&data_dir.join("podium.db"))?;
//!
//! engine.activity().record_rental("u1", true)?;
//!
//! // Reconcile and list achievements
//! let achievements = engine.achievements("u1")?;
//!
//! // Claim an unlocked one
//! let claimed = engine.claim("u1", achievements.progress[0].id)?;
//! ```

pub mod activity;
pub mod catalog;
pub mod claim;
pub mod db;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod progress;
pub mod unlock;

pub use engine::Engine;
pub use error::{ClaimError, LedgerError};
pub use models::{
    AchievementDefinition, BulkClaimOutcome, ClaimFailure, CriteriaType, LeaderboardCategory,
    LeaderboardSnapshot, LeaderboardView, ProgressSnapshot, ProgressState, ReconcileOutcome,
    UserAchievementProgress,
};
