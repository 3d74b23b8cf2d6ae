use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use filecache_cache::{Database, StateTable};
use time::UtcDateTime;

/// Persisted "this migration has run" marker.
///
/// Only a fully successful pass sets it. Clearing it is an administrative
/// action and makes the next pass run again over every user.
#[derive(Debug, Clone)]
pub struct CompletionFlag {
    state: StateTable,
    name: String,
}

impl CompletionFlag {
    pub fn new(db: &Database, name: impl Into<String>) -> Self {
        Self { state: StateTable::from(db), name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_set(&self) -> Result<bool> {
        self.state.is_set(&self.name).await.or_raise(|| ErrorKind::Cache)
    }

    pub async fn completed_at(&self) -> Result<Option<UtcDateTime>> {
        self.state.completed_at(&self.name).await.or_raise(|| ErrorKind::Cache)
    }

    pub(crate) async fn set(&self) -> Result<()> {
        self.state.set(&self.name).await.or_raise(|| ErrorKind::Cache)
    }

    pub async fn clear(&self) -> Result<bool> {
        self.state.clear(&self.name).await.or_raise(|| ErrorKind::Cache)
    }
}
