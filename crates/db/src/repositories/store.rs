use chrono::Utc;
use sqlx::Row;

use shiftbot_core::domain::store::{Store, StoreCode, StoreId};

use super::{decode_error, RepositoryError, StoreRepository};
use crate::DbPool;

pub struct SqlStoreRepository {
    pool: DbPool,
}

impl SqlStoreRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_store(row: &sqlx::sqlite::SqliteRow) -> Result<Store, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let name: String = row.try_get("name").map_err(decode_error)?;
    let store_code: String = row.try_get("store_code").map_err(decode_error)?;
    let owner_user_id: Option<String> = row.try_get("owner_user_id").map_err(decode_error)?;
    let address: Option<String> = row.try_get("address").map_err(decode_error)?;

    Ok(Store {
        id: StoreId(id),
        name,
        code: StoreCode::parse(&store_code).map_err(decode_error)?,
        owner_user_id,
        address,
    })
}

#[async_trait::async_trait]
impl StoreRepository for SqlStoreRepository {
    async fn find_by_code(&self, code: &StoreCode) -> Result<Option<Store>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, store_code, owner_user_id, address
             FROM stores WHERE store_code = ? COLLATE NOCASE",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_store).transpose()
    }

    async fn find_by_id(&self, id: &StoreId) -> Result<Option<Store>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, store_code, owner_user_id, address FROM stores WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_store).transpose()
    }

    async fn upsert(&self, store: &Store) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO stores (id, name, store_code, owner_user_id, address, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 store_code = excluded.store_code,
                 owner_user_id = excluded.owner_user_id,
                 address = excluded.address,
                 updated_at = excluded.updated_at",
        )
        .bind(store.id.as_str())
        .bind(&store.name)
        .bind(store.code.as_str())
        .bind(&store.owner_user_id)
        .bind(&store.address)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
