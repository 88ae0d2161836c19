//! Achievement catalog store
//!
//! Definitions are created and retired by admin tooling; the engine itself
//! only reads active rows. The write side here exists for that tooling and
//! for seeding test fixtures.

use anyhow::Result;
use rusqlite::Row;

use crate::db::Db;
use crate::models::{AchievementDefinition, CriteriaType};

/// A definition to insert into the catalog
#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub name: String,
    pub criteria_type: CriteriaType,
    pub criteria_value: i64,
    pub reward_points: i64,
}

/// Read/write interface to the achievement catalog
#[derive(Clone)]
pub struct CatalogStore {
    db: Db,
}

impl CatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// All active definitions, in insertion order
    pub fn list_active(&self) -> Result<Vec<AchievementDefinition>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, criteria_type, criteria_value, reward_points, is_active
             FROM achievement_definitions WHERE is_active = 1 ORDER BY id",
        )?;
        let rows = stmt.query_map([], definition_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Fetch one definition regardless of active flag
    pub fn get(&self, id: i64) -> Result<Option<AchievementDefinition>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, criteria_type, criteria_value, reward_points, is_active
             FROM achievement_definitions WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map([id], definition_from_row)?;
        Ok(rows.next().transpose()?)
    }

    /// Insert a definition and return its id
    pub fn insert(&self, def: &NewAchievement) -> Result<i64> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO achievement_definitions (name, criteria_type, criteria_value, reward_points, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            rusqlite::params![
                def.name,
                def.criteria_type.as_str(),
                def.criteria_value,
                def.reward_points,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Activate or retire a definition
    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE achievement_definitions SET is_active = ?1 WHERE id = ?2",
            rusqlite::params![active as i32, id],
        )?;
        Ok(())
    }
}

fn definition_from_row(row: &Row<'_>) -> rusqlite::Result<AchievementDefinition> {
    let criteria: String = row.get(2)?;
    Ok(AchievementDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        criteria_type: CriteriaType::from_str(&criteria).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown criteria type: {criteria}").into(),
            )
        })?,
        criteria_value: row.get(3)?,
        reward_points: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
    })
}
