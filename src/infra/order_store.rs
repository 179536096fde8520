use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::app::order_notifier::BacklogLoader;
use crate::domain::order::OrderStatus;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct PgOrderStore {
    db: Db,
}

impl PgOrderStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn pending_order_ids(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE status = $1")
            .bind(OrderStatus::Pending.as_db())
            .fetch_all(self.db.pool())
            .await?;
        Ok(ids)
    }
}

#[async_trait]
impl BacklogLoader for PgOrderStore {
    async fn load_pending(&self) -> Result<Vec<Uuid>> {
        self.pending_order_ids().await
    }
}
