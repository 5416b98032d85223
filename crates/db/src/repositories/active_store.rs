use chrono::Utc;
use sqlx::Row;

use shiftbot_core::domain::profile::LineUserId;
use shiftbot_core::domain::store::StoreId;

use super::{decode_error, ActiveStoreRepository, RepositoryError};
use crate::DbPool;

pub struct SqlActiveStoreRepository {
    pool: DbPool,
}

impl SqlActiveStoreRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ActiveStoreRepository for SqlActiveStoreRepository {
    async fn get(&self, user_id: &LineUserId) -> Result<Option<StoreId>, RepositoryError> {
        let row = sqlx::query("SELECT store_id FROM user_active_store WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.try_get::<String, _>("store_id").map(StoreId).map_err(decode_error))
            .transpose()
    }

    async fn set(&self, user_id: &LineUserId, store_id: &StoreId) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_active_store (user_id, store_id, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 store_id = excluded.store_id,
                 updated_at = excluded.updated_at",
        )
        .bind(user_id.as_str())
        .bind(store_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
