//! Persisted one-shot flags.
//!
//! A flag is a row in `repair_state` keyed by name. A missing row means the
//! flag is unset. Only administrative action clears a flag.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{from_timestamp, to_timestamp};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::UtcDateTime;

#[derive(Debug, Clone)]
pub struct StateTable {
    pool: SqlitePool,
}
impl From<&Database> for StateTable {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl StateTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// When the flag was set, or `None` if it isn't.
    pub async fn completed_at(&self, name: &str) -> Result<Option<UtcDateTime>> {
        let at: Option<i64> = sqlx::query_scalar("SELECT completed_at FROM repair_state WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        at.map(|t| from_timestamp(t, "completed at")).transpose()
    }

    pub async fn is_set(&self, name: &str) -> Result<bool> {
        Ok(self.completed_at(name).await?.is_some())
    }

    /// Set the flag. Setting an already set flag keeps the original time.
    pub async fn set(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO repair_state (name, completed_at) VALUES (?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .bind(to_timestamp(UtcDateTime::now()))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Unset the flag. Returns whether it was set.
    pub async fn clear(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repair_state WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flag_lifecycle() {
        let db = Database::connect_in_memory().await.unwrap();
        let state = StateTable::from(&db);
        assert!(!state.is_set("home_storage_ids").await.unwrap());
        state.set("home_storage_ids").await.unwrap();
        let first = state.completed_at("home_storage_ids").await.unwrap().unwrap();
        state.set("home_storage_ids").await.unwrap();
        assert_eq!(state.completed_at("home_storage_ids").await.unwrap(), Some(first));
        assert!(!state.is_set("something_else").await.unwrap());
        assert!(state.clear("home_storage_ids").await.unwrap());
        assert!(!state.clear("home_storage_ids").await.unwrap());
        assert!(!state.is_set("home_storage_ids").await.unwrap());
    }
}
