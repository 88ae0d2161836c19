//! Progress computation
//!
//! Turns raw activity counters into an absolute per-criteria snapshot. The
//! engine recomputes truth on every reconcile instead of maintaining
//! incremental deltas, which keeps the computation idempotent.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::models::ProgressSnapshot;

/// Rental counters for one user
#[derive(Debug, Clone, Copy, Default)]
pub struct RentalStats {
    pub total: i64,
    /// Rentals returned within their agreed window
    pub timely: i64,
}

/// Supplies raw activity counters per user
///
/// Implemented by [`crate::activity::ActivityStore`] in-process; external
/// services plug in their own implementation.
pub trait ProgressSource: Send + Sync {
    fn rental_stats(&self, user_id: &str) -> Result<RentalStats>;
    fn completed_referrals(&self, user_id: &str) -> Result<i64>;
}

/// Computes absolute progress snapshots from a [`ProgressSource`]
#[derive(Clone)]
pub struct ProgressCalculator {
    source: Arc<dyn ProgressSource>,
}

impl ProgressCalculator {
    pub fn new(source: Arc<dyn ProgressSource>) -> Self {
        Self { source }
    }

    /// Pure read: query the source and return the current counters.
    ///
    /// A source failure is fatal to the caller; a partial snapshot is never
    /// returned.
    pub fn compute(&self, user_id: &str) -> Result<ProgressSnapshot> {
        let rentals = self
            .source
            .rental_stats(user_id)
            .with_context(|| format!("rental counters unavailable for user {user_id}"))?;
        let referrals = self
            .source
            .completed_referrals(user_id)
            .with_context(|| format!("referral counter unavailable for user {user_id}"))?;

        Ok(ProgressSnapshot {
            rentals: rentals.total,
            timely_returns: rentals.timely,
            referrals,
        })
    }
}
