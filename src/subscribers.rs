//! Recipient set for notification fan-out. Subscription management itself is
//! a separate bot concern — the radar only reads the current set.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::Result;

#[async_trait]
pub trait SubscriberRegistry: Send + Sync + 'static {
    async fn list_recipients(&self) -> Result<Vec<String>>;
}

pub struct SqliteSubscriberRegistry {
    pool: SqlitePool,
}

impl SqliteSubscriberRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberRegistry for SqliteSubscriberRegistry {
    async fn list_recipients(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>("SELECT chat_id FROM subscribers")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}
