use shiftbot_db::{connect_from_config, migrations};

use crate::commands::{block_on, load_config, CommandFailure, CommandResult, FailureClass};

pub fn run() -> CommandResult {
    CommandResult::from_result("migrate", apply())
}

fn apply() -> Result<String, CommandFailure> {
    let config = load_config()?;

    block_on(async {
        let pool = connect_from_config(&config.database).await.map_err(|error| {
            CommandFailure::new(FailureClass::DbConnectivity, error.to_string())
        })?;
        let migrated = migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new(FailureClass::Migration, error.to_string()));
        pool.close().await;
        migrated
    })?;

    Ok(format!("applied pending migrations to {}", config.database.url))
}
