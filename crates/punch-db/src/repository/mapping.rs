//! # Employee Mapping Repository
//!
//! Associations between terminal-local user ids and central employee ids.
//!
//! ## Resolution Rule
//! A `(terminal_id, terminal_user_id)` pair resolves to at most one employee
//! (enforced by the composite primary key). Events whose pair has no mapping
//! are quarantined by the reconciler - resolution never guesses.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use punch_core::EmployeeMapping;

/// Repository for employee mapping operations.
#[derive(Debug, Clone)]
pub struct MappingRepository {
    pool: SqlitePool,
}

impl MappingRepository {
    /// Creates a new MappingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MappingRepository { pool }
    }

    /// Registers a mapping.
    ///
    /// Fails with [`DbError::UniqueViolation`] if the pair is already
    /// mapped; operators must remove the old mapping first.
    pub async fn register(
        &self,
        terminal_id: &str,
        terminal_user_id: &str,
        employee_id: &str,
    ) -> DbResult<EmployeeMapping> {
        debug!(
            terminal_id = %terminal_id,
            terminal_user_id = %terminal_user_id,
            employee_id = %employee_id,
            "Registering employee mapping"
        );

        let mapping = EmployeeMapping {
            terminal_id: terminal_id.to_string(),
            terminal_user_id: terminal_user_id.to_string(),
            employee_id: employee_id.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO employee_mapping (terminal_id, terminal_user_id, employee_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&mapping.terminal_id)
        .bind(&mapping.terminal_user_id)
        .bind(&mapping.employee_id)
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await?;

        Ok(mapping)
    }

    /// Resolves a single pair to its employee id, if mapped.
    pub async fn resolve(
        &self,
        terminal_id: &str,
        terminal_user_id: &str,
    ) -> DbResult<Option<String>> {
        let employee_id = sqlx::query_scalar::<_, String>(
            r#"
            SELECT employee_id FROM employee_mapping
            WHERE terminal_id = ?1 AND terminal_user_id = ?2
            "#,
        )
        .bind(terminal_id)
        .bind(terminal_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(employee_id)
    }

    /// Loads the full mapping table for one terminal.
    ///
    /// The reconciler resolves a whole batch against this map instead of
    /// issuing one query per event.
    pub async fn map_for_terminal(&self, terminal_id: &str) -> DbResult<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT terminal_user_id, employee_id FROM employee_mapping WHERE terminal_id = ?1",
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            map.insert(row.try_get("terminal_user_id")?, row.try_get("employee_id")?);
        }
        Ok(map)
    }

    /// Lists mappings for one terminal (operator view).
    pub async fn list_for_terminal(&self, terminal_id: &str) -> DbResult<Vec<EmployeeMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT terminal_id, terminal_user_id, employee_id, created_at
            FROM employee_mapping
            WHERE terminal_id = ?1
            ORDER BY terminal_user_id
            "#,
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(EmployeeMapping {
                    terminal_id: row.try_get("terminal_id")?,
                    terminal_user_id: row.try_get("terminal_user_id")?,
                    employee_id: row.try_get("employee_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Removes a mapping.
    pub async fn remove(&self, terminal_id: &str, terminal_user_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "DELETE FROM employee_mapping WHERE terminal_id = ?1 AND terminal_user_id = ?2",
        )
        .bind(terminal_id)
        .bind(terminal_user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(
                "Mapping",
                format!("{}/{}", terminal_id, terminal_user_id),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
