use sqlx::Row;

use shiftbot_core::domain::preference::{PreferenceStatus, ShiftDate, ShiftPreference};
use shiftbot_core::domain::profile::LineUserId;
use shiftbot_core::domain::store::StoreId;

use super::{decode_error, parse_timestamp, PreferenceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPreferenceRepository {
    pool: DbPool,
}

impl SqlPreferenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_preference(row: &sqlx::sqlite::SqliteRow) -> Result<ShiftPreference, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let store_id: String = row.try_get("store_id").map_err(decode_error)?;
    let shift_date: String = row.try_get("shift_date").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let time_slot: Option<String> = row.try_get("time_slot").map_err(decode_error)?;
    let note: Option<String> = row.try_get("note").map_err(decode_error)?;
    let submitted_at: String = row.try_get("submitted_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(ShiftPreference {
        user_id: LineUserId(user_id),
        store_id: StoreId(store_id),
        shift_date: ShiftDate::parse(&shift_date).map_err(decode_error)?,
        status: PreferenceStatus::parse(&status).map_err(decode_error)?,
        time_slot,
        note,
        submitted_at: parse_timestamp("submitted_at", &submitted_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl PreferenceRepository for SqlPreferenceRepository {
    async fn upsert(&self, preference: &ShiftPreference) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO shift_preferences (user_id, store_id, shift_date, status, time_slot,
                                            note, submitted_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, store_id, shift_date) DO UPDATE SET
                 status = excluded.status,
                 time_slot = excluded.time_slot,
                 note = excluded.note,
                 submitted_at = excluded.submitted_at,
                 updated_at = excluded.updated_at",
        )
        .bind(preference.user_id.as_str())
        .bind(preference.store_id.as_str())
        .bind(preference.shift_date.to_string())
        .bind(preference.status.as_str())
        .bind(&preference.time_slot)
        .bind(&preference.note)
        .bind(preference.submitted_at.to_rfc3339())
        .bind(preference.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_upcoming(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
        from: ShiftDate,
        limit: u32,
    ) -> Result<Vec<ShiftPreference>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, store_id, shift_date, status, time_slot, note,
                    submitted_at, updated_at
             FROM shift_preferences
             WHERE user_id = ? AND store_id = ? AND shift_date >= ?
             ORDER BY shift_date ASC
             LIMIT ?",
        )
        .bind(user_id.as_str())
        .bind(store_id.as_str())
        .bind(from.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_preference).collect::<Result<Vec<_>, _>>()
    }
}
