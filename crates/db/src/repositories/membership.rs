use sqlx::Row;

use shiftbot_core::domain::profile::LineUserId;
use shiftbot_core::domain::store::{MembershipRole, StoreId, StoreMembership};

use super::{decode_error, parse_timestamp, MembershipRepository, RepositoryError};
use crate::DbPool;

const MEMBERSHIP_COLUMNS: &str = "user_id, store_id, role, max_consecutive_days, max_weekly_days,
     unavailable_days, preferred_time_slots, created_at, updated_at";

pub struct SqlMembershipRepository {
    pool: DbPool,
}

impl SqlMembershipRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn encode_list(values: &Option<Vec<String>>) -> Result<Option<String>, RepositoryError> {
    values
        .as_ref()
        .map(|list| serde_json::to_string(list).map_err(decode_error))
        .transpose()
}

fn decode_list(column: &str, raw: Option<String>) -> Result<Option<Vec<String>>, RepositoryError> {
    raw.map(|text| {
        serde_json::from_str::<Vec<String>>(&text)
            .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
    })
    .transpose()
}

fn decode_day_limit(column: &str, raw: Option<i64>) -> Result<Option<u32>, RepositoryError> {
    raw.map(|value| {
        u32::try_from(value)
            .map_err(|_| RepositoryError::Decode(format!("{column}: out of range value {value}")))
    })
    .transpose()
}

fn row_to_membership(row: &sqlx::sqlite::SqliteRow) -> Result<StoreMembership, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let store_id: String = row.try_get("store_id").map_err(decode_error)?;
    let role: String = row.try_get("role").map_err(decode_error)?;
    let max_consecutive_days: Option<i64> =
        row.try_get("max_consecutive_days").map_err(decode_error)?;
    let max_weekly_days: Option<i64> = row.try_get("max_weekly_days").map_err(decode_error)?;
    let unavailable_days: Option<String> =
        row.try_get("unavailable_days").map_err(decode_error)?;
    let preferred_time_slots: Option<String> =
        row.try_get("preferred_time_slots").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(StoreMembership {
        user_id: LineUserId(user_id),
        store_id: StoreId(store_id),
        role: MembershipRole::parse(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown membership role `{role}`")))?,
        max_consecutive_days: decode_day_limit("max_consecutive_days", max_consecutive_days)?,
        max_weekly_days: decode_day_limit("max_weekly_days", max_weekly_days)?,
        unavailable_days: decode_list("unavailable_days", unavailable_days)?,
        preferred_time_slots: decode_list("preferred_time_slots", preferred_time_slots)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl MembershipRepository for SqlMembershipRepository {
    async fn upsert(&self, membership: &StoreMembership) -> Result<(), RepositoryError> {
        let unavailable_days = encode_list(&membership.unavailable_days)?;
        let preferred_time_slots = encode_list(&membership.preferred_time_slots)?;

        sqlx::query(
            "INSERT INTO user_stores (user_id, store_id, role, max_consecutive_days,
                                      max_weekly_days, unavailable_days, preferred_time_slots,
                                      created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, store_id) DO UPDATE SET
                 updated_at = excluded.updated_at",
        )
        .bind(membership.user_id.as_str())
        .bind(membership.store_id.as_str())
        .bind(membership.role.as_str())
        .bind(membership.max_consecutive_days.map(i64::from))
        .bind(membership.max_weekly_days.map(i64::from))
        .bind(unavailable_days)
        .bind(preferred_time_slots)
        .bind(membership.created_at.to_rfc3339())
        .bind(membership.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
    ) -> Result<Option<StoreMembership>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM user_stores WHERE user_id = ? AND store_id = ?"
        ))
        .bind(user_id.as_str())
        .bind(store_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_membership).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: &LineUserId,
    ) -> Result<Vec<StoreMembership>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM user_stores
             WHERE user_id = ?
             ORDER BY updated_at DESC, created_at DESC, store_id ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_membership).collect::<Result<Vec<_>, _>>()
    }
}
