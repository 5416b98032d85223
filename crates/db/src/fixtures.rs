use shiftbot_core::domain::store::{Store, StoreCode, StoreId};

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlStoreRepository, StoreRepository};

/// Demo stores for local webhook testing. Codes are what staff type in chat.
const DEMO_STORES: &[DemoStoreContract] = &[
    DemoStoreContract {
        id: "store-demo-shibuya",
        name: "Shiftbot Cafe Shibuya",
        code: "SHIBUYA1",
        address: Some("Tokyo, Shibuya"),
    },
    DemoStoreContract {
        id: "store-demo-umeda",
        name: "Shiftbot Cafe Umeda",
        code: "UMEDA-01",
        address: Some("Osaka, Kita"),
    },
    DemoStoreContract { id: "store-demo-popup", name: "Shiftbot Pop-up", code: "AB12", address: None },
];

pub struct DemoStoreDataset;

impl DemoStoreDataset {
    /// Upsert the demo stores. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let repository = SqlStoreRepository::new(pool.clone());
        let mut stores_seeded = Vec::with_capacity(DEMO_STORES.len());

        for contract in DEMO_STORES {
            repository.upsert(&contract.to_store()?).await?;
            stores_seeded.push(StoreSeedInfo { store_id: contract.id, store_code: contract.code });
        }

        Ok(SeedResult { stores_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let repository = SqlStoreRepository::new(pool.clone());
        let mut checks = Vec::with_capacity(DEMO_STORES.len());

        for contract in DEMO_STORES {
            let lowercase = StoreCode::parse(&contract.code.to_ascii_lowercase())
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            let found = repository.find_by_code(&lowercase).await?;
            let matches = found
                .map(|store| store.id.as_str() == contract.id && store.name == contract.name)
                .unwrap_or(false);
            checks.push((contract.code, matches));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo stores and anything that references them.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        for contract in DEMO_STORES {
            for statement in [
                "DELETE FROM shift_preferences WHERE store_id = ?",
                "DELETE FROM user_active_store WHERE store_id = ?",
                "DELETE FROM user_stores WHERE store_id = ?",
                "DELETE FROM stores WHERE id = ?",
            ] {
                sqlx::query(statement).bind(contract.id).execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub fn codes() -> impl Iterator<Item = &'static str> {
        DEMO_STORES.iter().map(|contract| contract.code)
    }
}

#[derive(Debug, Clone, Copy)]
struct DemoStoreContract {
    id: &'static str,
    name: &'static str,
    code: &'static str,
    address: Option<&'static str>,
}

impl DemoStoreContract {
    fn to_store(self) -> Result<Store, RepositoryError> {
        Ok(Store {
            id: StoreId::new(self.id),
            name: self.name.to_owned(),
            code: StoreCode::parse(self.code)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?,
            owner_user_id: None,
            address: self.address.map(str::to_owned),
        })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub stores_seeded: Vec<StoreSeedInfo>,
}

#[derive(Debug)]
pub struct StoreSeedInfo {
    pub store_id: &'static str,
    pub store_code: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoStoreDataset::load(&pool).await.expect("load demo stores");
        let second = DemoStoreDataset::load(&pool).await.expect("reload demo stores");
        assert_eq!(first.stores_seeded.len(), second.stores_seeded.len());

        let verification = DemoStoreDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stores")
            .fetch_one(&pool)
            .await
            .expect("count stores");
        assert_eq!(count, DEMO_STORES.len() as i64);
    }

    #[tokio::test]
    async fn clean_removes_demo_stores() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        DemoStoreDataset::load(&pool).await.expect("load demo stores");
        DemoStoreDataset::clean(&pool).await.expect("clean");

        let verification = DemoStoreDataset::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|(_, ok)| !ok));
    }
}
