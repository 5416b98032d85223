use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tokio::sync::RwLock;

use shiftbot_core::domain::preference::{ShiftDate, ShiftPreference};
use shiftbot_core::domain::profile::{LineUserId, ProfileRecord};
use shiftbot_core::domain::store::{Store, StoreCode, StoreId, StoreMembership};

use super::{
    ActiveStoreRepository, MembershipRepository, PreferenceRepository, ProfileRepository,
    RepositoryError, StoreRepository,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InMemoryTable {
    Profiles,
    Stores,
    Memberships,
    Preferences,
    ActiveStores,
}

#[derive(Default)]
struct State {
    profiles: HashMap<LineUserId, ProfileRecord>,
    stores: HashMap<StoreId, Store>,
    memberships: HashMap<(LineUserId, StoreId), StoreMembership>,
    preferences: HashMap<(LineUserId, StoreId, ShiftDate), ShiftPreference>,
    active_stores: HashMap<LineUserId, StoreId>,
    failing: HashSet<InMemoryTable>,
    writes: HashMap<InMemoryTable, usize>,
}

impl State {
    /// Counts the attempted write, then fails it if the table is switched off.
    fn begin_write(&mut self, table: InMemoryTable) -> Result<(), RepositoryError> {
        *self.writes.entry(table).or_default() += 1;
        if self.failing.contains(&table) {
            return Err(RepositoryError::Unavailable(format!("{table:?} is switched to fail")));
        }
        Ok(())
    }

    fn check_user_and_store(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
    ) -> Result<(), RepositoryError> {
        if !self.profiles.contains_key(user_id) {
            return Err(RepositoryError::Constraint(format!(
                "FOREIGN KEY constraint failed: profile `{user_id}`"
            )));
        }
        if !self.stores.contains_key(store_id) {
            return Err(RepositoryError::Constraint(format!(
                "FOREIGN KEY constraint failed: store `{store_id}`"
            )));
        }
        Ok(())
    }
}

/// Test double holding every table behind one lock, so foreign keys and
/// conflict keys behave like the SQLite schema.
#[derive(Default)]
pub struct InMemoryDatastore {
    state: RwLock<State>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_writes_to(&self, table: InMemoryTable) {
        self.state.write().await.failing.insert(table);
    }

    pub async fn restore_writes_to(&self, table: InMemoryTable) {
        self.state.write().await.failing.remove(&table);
    }

    /// Attempted writes, failed ones included.
    pub async fn write_count(&self, table: InMemoryTable) -> usize {
        self.state.read().await.writes.get(&table).copied().unwrap_or(0)
    }

    pub async fn profile(&self, user_id: &LineUserId) -> Option<ProfileRecord> {
        self.state.read().await.profiles.get(user_id).cloned()
    }

    pub async fn memberships(&self) -> Vec<StoreMembership> {
        let mut rows: Vec<_> = self.state.read().await.memberships.values().cloned().collect();
        rows.sort_by(|left, right| {
            (&left.user_id, &left.store_id).cmp(&(&right.user_id, &right.store_id))
        });
        rows
    }

    pub async fn preferences(&self) -> Vec<ShiftPreference> {
        let mut rows: Vec<_> = self.state.read().await.preferences.values().cloned().collect();
        rows.sort_by(|left, right| left.shift_date.cmp(&right.shift_date));
        rows
    }

    pub async fn active_store(&self, user_id: &LineUserId) -> Option<StoreId> {
        self.state.read().await.active_stores.get(user_id).cloned()
    }
}

#[async_trait::async_trait]
impl ProfileRepository for InMemoryDatastore {
    async fn find(&self, user_id: &LineUserId) -> Result<Option<ProfileRecord>, RepositoryError> {
        Ok(self.state.read().await.profiles.get(user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: &LineUserId,
        name: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.begin_write(InMemoryTable::Profiles)?;

        let now = Utc::now();
        let record = state.profiles.entry(user_id.clone()).or_insert_with(|| ProfileRecord {
            line_user_id: user_id.clone(),
            name: None,
            created_at: now,
            updated_at: now,
        });
        if let Some(name) = name {
            record.name = Some(name.to_owned());
        }
        record.updated_at = now;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StoreRepository for InMemoryDatastore {
    async fn find_by_code(&self, code: &StoreCode) -> Result<Option<Store>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .stores
            .values()
            .find(|store| store.code.as_str().eq_ignore_ascii_case(code.as_str()))
            .cloned())
    }

    async fn find_by_id(&self, id: &StoreId) -> Result<Option<Store>, RepositoryError> {
        Ok(self.state.read().await.stores.get(id).cloned())
    }

    async fn upsert(&self, store: &Store) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.begin_write(InMemoryTable::Stores)?;

        let code_taken = state.stores.values().any(|existing| {
            existing.id != store.id && existing.code.as_str().eq_ignore_ascii_case(store.code.as_str())
        });
        if code_taken {
            return Err(RepositoryError::Constraint(format!(
                "UNIQUE constraint failed: stores.store_code `{}`",
                store.code
            )));
        }
        state.stores.insert(store.id.clone(), store.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl MembershipRepository for InMemoryDatastore {
    async fn upsert(&self, membership: &StoreMembership) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.begin_write(InMemoryTable::Memberships)?;
        state.check_user_and_store(&membership.user_id, &membership.store_id)?;

        let key = (membership.user_id.clone(), membership.store_id.clone());
        match state.memberships.get_mut(&key) {
            Some(existing) => existing.updated_at = membership.updated_at,
            None => {
                state.memberships.insert(key, membership.clone());
            }
        }
        Ok(())
    }

    async fn find(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
    ) -> Result<Option<StoreMembership>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.memberships.get(&(user_id.clone(), store_id.clone())).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &LineUserId,
    ) -> Result<Vec<StoreMembership>, RepositoryError> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .memberships
            .values()
            .filter(|membership| &membership.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| right.created_at.cmp(&left.created_at))
                .then_with(|| left.store_id.cmp(&right.store_id))
        });
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl PreferenceRepository for InMemoryDatastore {
    async fn upsert(&self, preference: &ShiftPreference) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.begin_write(InMemoryTable::Preferences)?;
        state.check_user_and_store(&preference.user_id, &preference.store_id)?;

        let key = (
            preference.user_id.clone(),
            preference.store_id.clone(),
            preference.shift_date,
        );
        state.preferences.insert(key, preference.clone());
        Ok(())
    }

    async fn list_upcoming(
        &self,
        user_id: &LineUserId,
        store_id: &StoreId,
        from: ShiftDate,
        limit: u32,
    ) -> Result<Vec<ShiftPreference>, RepositoryError> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .preferences
            .values()
            .filter(|preference| {
                &preference.user_id == user_id
                    && &preference.store_id == store_id
                    && preference.shift_date >= from
            })
            .cloned()
            .collect();
        rows.sort_by(|left, right| left.shift_date.cmp(&right.shift_date));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ActiveStoreRepository for InMemoryDatastore {
    async fn get(&self, user_id: &LineUserId) -> Result<Option<StoreId>, RepositoryError> {
        Ok(self.state.read().await.active_stores.get(user_id).cloned())
    }

    async fn set(&self, user_id: &LineUserId, store_id: &StoreId) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.begin_write(InMemoryTable::ActiveStores)?;
        state.check_user_and_store(user_id, store_id)?;
        state.active_stores.insert(user_id.clone(), store_id.clone());
        Ok(())
    }
}
