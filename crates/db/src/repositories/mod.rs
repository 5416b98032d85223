use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use shiftbot_core::domain::preference::{ShiftDate, ShiftPreference};
use shiftbot_core::domain::profile::{LineUserId, ProfileRecord};
use shiftbot_core::domain::store::{Store, StoreCode, StoreId, StoreMembership};

pub mod active_store;
pub mod membership;
pub mod memory;
pub mod preference;
pub mod profile;
pub mod store;

pub use active_store::SqlActiveStoreRepository;
pub use membership::SqlMembershipRepository;
pub use memory::{InMemoryDatastore, InMemoryTable};
pub use preference::SqlPreferenceRepository;
pub use profile::SqlProfileRepository;
pub use store::SqlStoreRepository;

use crate::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &error {
            sqlx::Error::Database(database) => match database.kind() {
                ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
                | ErrorKind::UniqueViolation => Self::Constraint(database.message().to_owned()),
                _ => Self::Database(error),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(error.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Decode(error.to_string())
            }
            _ => Self::Database(error),
        }
    }
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find(&self, user_id: &LineUserId) -> Result<Option<ProfileRecord>, RepositoryError>;

    /// Insert or touch the profile. `None` keeps whatever name is stored.
    async fn upsert(&self, user_id: &LineUserId, name: Option<&str>)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn find_by_code(&self, code: &StoreCode) -> Result<Option<Store>, RepositoryError>;
    async fn find_by_id(&self, id: &StoreId) -> Result<Option<Store>, RepositoryError>;
    async fn upsert(&self, store: &Store) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Conflicts on `(user_id, store_id)` keep the stored role and constraints.
    async fn upsert(&self, membership: &StoreMembership) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
    ) -> Result<Option<StoreMembership>, RepositoryError>;

    /// Most recently touched first.
    async fn list_for_user(
        &self,
        user_id: &LineUserId,
    ) -> Result<Vec<StoreMembership>, RepositoryError>;
}

#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// Last write wins on `(user_id, store_id, shift_date)`.
    async fn upsert(&self, preference: &ShiftPreference) -> Result<(), RepositoryError>;

    async fn list_upcoming(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
        from: ShiftDate,
        limit: u32,
    ) -> Result<Vec<ShiftPreference>, RepositoryError>;
}

#[async_trait]
pub trait ActiveStoreRepository: Send + Sync {
    async fn get(&self, user_id: &LineUserId) -> Result<Option<StoreId>, RepositoryError>;
    async fn set(&self, user_id: &LineUserId, store_id: &StoreId) -> Result<(), RepositoryError>;
}

/// The persistence gateway handed to the workflow.
#[derive(Clone)]
pub struct Repositories {
    pub profiles: Arc<dyn ProfileRepository>,
    pub stores: Arc<dyn StoreRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub preferences: Arc<dyn PreferenceRepository>,
    pub active_stores: Arc<dyn ActiveStoreRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            profiles: Arc::new(SqlProfileRepository::new(pool.clone())),
            stores: Arc::new(SqlStoreRepository::new(pool.clone())),
            memberships: Arc::new(SqlMembershipRepository::new(pool.clone())),
            preferences: Arc::new(SqlPreferenceRepository::new(pool.clone())),
            active_stores: Arc::new(SqlActiveStoreRepository::new(pool)),
        }
    }

    pub fn in_memory(datastore: Arc<InMemoryDatastore>) -> Self {
        Self {
            profiles: datastore.clone(),
            stores: datastore.clone(),
            memberships: datastore.clone(),
            preferences: datastore.clone(),
            active_stores: datastore,
        }
    }
}

/// Bounds a datastore call. Expiry drops the call and reports `Unavailable`.
pub async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(RepositoryError::Unavailable(format!(
            "datastore call exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn parse_timestamp(
    column: &str,
    raw: &str,
) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&chrono::Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{bounded, RepositoryError};

    #[tokio::test]
    async fn bounded_call_times_out_as_unavailable() {
        let result: Result<(), RepositoryError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn bounded_call_passes_through_result() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, RepositoryError>(7) }).await;
        assert_eq!(result.expect("value"), 7);
    }
}
