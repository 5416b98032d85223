use chrono::Utc;
use sqlx::Row;

use shiftbot_core::domain::profile::{LineUserId, ProfileRecord};

use super::{decode_error, parse_timestamp, ProfileRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProfileRepository {
    pool: DbPool,
}

impl SqlProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<ProfileRecord, RepositoryError> {
    let line_user_id: String = row.try_get("line_user_id").map_err(decode_error)?;
    let name: Option<String> = row.try_get("name").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(ProfileRecord {
        line_user_id: LineUserId(line_user_id),
        name,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl ProfileRepository for SqlProfileRepository {
    async fn find(&self, user_id: &LineUserId) -> Result<Option<ProfileRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT line_user_id, name, created_at, updated_at
             FROM profiles WHERE line_user_id = ?",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_profile).transpose()
    }

    async fn upsert(
        &self,
        user_id: &LineUserId,
        name: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO profiles (line_user_id, name, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(line_user_id) DO UPDATE SET
                 name = COALESCE(excluded.name, profiles.name),
                 updated_at = excluded.updated_at",
        )
        .bind(user_id.as_str())
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
