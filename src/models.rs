//! Data models for the achievement and leaderboard engine
//!
//! These structures represent the data stored in and queried from the
//! engine database.

use serde::{Deserialize, Serialize};

/// Activity counter an achievement is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriteriaType {
    RentalCount,
    TimelyReturnCount,
    ReferralCount,
}

impl CriteriaType {
    /// Get the string code for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RentalCount => "RENTAL_COUNT",
            Self::TimelyReturnCount => "TIMELY_RETURN_COUNT",
            Self::ReferralCount => "REFERRAL_COUNT",
        }
    }

    /// Parse from database string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "RENTAL_COUNT" => Some(Self::RentalCount),
            "TIMELY_RETURN_COUNT" => Some(Self::TimelyReturnCount),
            "REFERRAL_COUNT" => Some(Self::ReferralCount),
            _ => None,
        }
    }

    /// Get all criteria types
    pub fn all() -> &'static [CriteriaType] {
        &[
            Self::RentalCount,
            Self::TimelyReturnCount,
            Self::ReferralCount,
        ]
    }
}

/// Lifecycle state of a user's progress toward one achievement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Locked,
    Unlocked,
    Claimed,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Claimed => "claimed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "locked" => Some(Self::Locked),
            "unlocked" => Some(Self::Unlocked),
            "claimed" => Some(Self::Claimed),
            _ => None,
        }
    }
}

/// Achievement definition from the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: i64,
    pub name: String,
    pub criteria_type: CriteriaType,
    /// Counter value at which the achievement unlocks (>= 1)
    pub criteria_value: i64,
    pub reward_points: i64,
    pub is_active: bool,
}

/// One user's progress toward one achievement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAchievementProgress {
    pub id: i64,
    pub user_id: String,
    pub achievement_id: i64,
    pub current_progress: i64,
    pub state: ProgressState,
    // Timestamps (ms since epoch)
    pub unlocked_at: Option<i64>,
    pub claimed_at: Option<i64>,
    pub points_awarded: Option<i64>,
}

impl UserAchievementProgress {
    /// Map from the canonical progress column order
    /// (id, user_id, achievement_id, current_progress, state, unlocked_at,
    /// claimed_at, points_awarded)
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            achievement_id: row.get(2)?,
            current_progress: row.get(3)?,
            state: ProgressState::from_str(&state).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("unknown progress state: {state}").into(),
                )
            })?,
            unlocked_at: row.get(5)?,
            claimed_at: row.get(6)?,
            points_awarded: row.get(7)?,
        })
    }
}

/// Absolute counter snapshot for one user at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub rentals: i64,
    pub timely_returns: i64,
    pub referrals: i64,
}

impl ProgressSnapshot {
    /// Counter value for a criteria type
    pub fn value_for(&self, criteria: CriteriaType) -> i64 {
        match criteria {
            CriteriaType::RentalCount => self.rentals,
            CriteriaType::TimelyReturnCount => self.timely_returns,
            CriteriaType::ReferralCount => self.referrals,
        }
    }
}

/// Result of reconciling one user against the active catalog
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Progress rows for every active achievement, locked ones included
    pub progress: Vec<UserAchievementProgress>,
    /// Rows that crossed the unlock threshold during this reconcile
    pub newly_unlocked: Vec<UserAchievementProgress>,
    /// Rows currently sitting in the unlocked (claimable) state
    pub unclaimed_count: usize,
}

/// Per-item failure inside a bulk claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimFailure {
    pub progress_id: i64,
    pub code: String,
    pub message: String,
}

/// Result of a bulk claim; callers act on partial success
#[derive(Debug, Clone, Default)]
pub struct BulkClaimOutcome {
    /// Successfully claimed rows, in request order
    pub claimed: Vec<UserAchievementProgress>,
    /// Failed items, in request order
    pub failures: Vec<ClaimFailure>,
    pub total_points_awarded: i64,
}

impl BulkClaimOutcome {
    pub fn success_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Leaderboard snapshot for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub user_id: String,
    /// Dense global rank; 0 until the first full recompute includes this user
    pub rank: i64,
    pub total_rentals: i64,
    pub total_points_earned: i64,
    pub referrals_count: i64,
    pub timely_returns: i64,
    pub last_updated: i64,
}

impl LeaderboardSnapshot {
    /// Weighted composite score used for global ranking
    pub fn score(&self) -> f64 {
        self.total_points_earned as f64 * 0.4
            + self.total_rentals as f64 * 0.3
            + self.referrals_count as f64 * 20.0
            + self.timely_returns as f64 * 0.3
    }
}

impl LeaderboardSnapshot {
    /// Map from the canonical snapshot column order
    /// (user_id, rank, total_rentals, total_points_earned, referrals_count,
    /// timely_returns, last_updated)
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            rank: row.get(1)?,
            total_rentals: row.get(2)?,
            total_points_earned: row.get(3)?,
            referrals_count: row.get(4)?,
            timely_returns: row.get(5)?,
            last_updated: row.get(6)?,
        })
    }
}

/// Which metric a leaderboard view is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardCategory {
    /// Global rank from the last full recompute
    #[default]
    Overall,
    Rentals,
    Points,
    Referrals,
    TimelyReturns,
}

impl LeaderboardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overall => "overall",
            Self::Rentals => "rentals",
            Self::Points => "points",
            Self::Referrals => "referrals",
            Self::TimelyReturns => "timely_returns",
        }
    }
}

/// A leaderboard page plus the requesting user's own entry when it did not
/// make the cut
#[derive(Debug, Clone)]
pub struct LeaderboardView {
    pub entries: Vec<LeaderboardSnapshot>,
    pub user_entry: Option<LeaderboardSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_type_roundtrip() {
        for criteria in CriteriaType::all() {
            assert_eq!(CriteriaType::from_str(criteria.as_str()), Some(*criteria));
        }
        assert_eq!(CriteriaType::from_str("SOMETHING_ELSE"), None);
    }

    #[test]
    fn test_progress_state_roundtrip() {
        for state in [
            ProgressState::Locked,
            ProgressState::Unlocked,
            ProgressState::Claimed,
        ] {
            assert_eq!(ProgressState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(ProgressState::from_str("archived"), None);
    }

    #[test]
    fn test_weighted_score() {
        let snapshot = LeaderboardSnapshot {
            user_id: "u1".to_string(),
            rank: 0,
            total_rentals: 50,
            total_points_earned: 1000,
            referrals_count: 2,
            timely_returns: 40,
            last_updated: 0,
        };
        assert!((snapshot.score() - 467.0).abs() < 1e-9);
    }
}
