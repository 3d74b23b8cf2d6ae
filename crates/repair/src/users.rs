use crate::error::Result;
use async_trait::async_trait;

/// Enumerates every known user id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn users(&self) -> Result<Vec<String>>;
}

/// A fixed list of users, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers(Vec<String>);

impl StaticUsers {
    pub fn new(users: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(users.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl UserDirectory for StaticUsers {
    async fn users(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}
