use shiftbot_db::{connect_from_config, migrations, DbPool, DemoStoreDataset, StoreSeedInfo};

use crate::commands::{block_on, load_config, CommandFailure, CommandResult, FailureClass};

pub fn run() -> CommandResult {
    CommandResult::from_result("seed", seed().map(|stores| summary(&stores)))
}

fn seed() -> Result<Vec<StoreSeedInfo>, CommandFailure> {
    let config = load_config()?;

    block_on(async {
        let pool = connect_from_config(&config.database).await.map_err(|error| {
            CommandFailure::new(FailureClass::DbConnectivity, error.to_string())
        })?;
        let outcome = seed_pool(&pool).await;
        pool.close().await;
        outcome
    })
}

async fn seed_pool(pool: &DbPool) -> Result<Vec<StoreSeedInfo>, CommandFailure> {
    migrations::run_pending(pool)
        .await
        .map_err(|error| CommandFailure::new(FailureClass::Migration, error.to_string()))?;

    let seeded = DemoStoreDataset::load(pool)
        .await
        .map_err(|error| CommandFailure::new(FailureClass::SeedExecution, error.to_string()))?;
    let verification = DemoStoreDataset::verify(pool)
        .await
        .map_err(|error| CommandFailure::new(FailureClass::SeedVerification, error.to_string()))?;

    if verification.all_present {
        Ok(seeded.stores_seeded)
    } else {
        Err(CommandFailure::new(
            FailureClass::SeedVerification,
            verification_failure(&verification.checks),
        ))
    }
}

fn summary(stores: &[StoreSeedInfo]) -> String {
    let lines: Vec<String> = stores
        .iter()
        .map(|store| format!("  - {}: send `{}` in chat", store.store_id, store.store_code))
        .collect();
    format!("demo stores ready ({}):\n{}", stores.len(), lines.join("\n"))
}

fn verification_failure(checks: &[(&'static str, bool)]) -> String {
    let failed = checks
        .iter()
        .filter_map(|(code, passed)| (!passed).then_some(*code))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "some demo stores failed to load".to_string()
    } else {
        format!("store codes not resolvable after seeding: {}", failed.join(", "))
    }
}
