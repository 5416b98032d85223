pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, ping, DbPool};
pub use fixtures::{DemoStoreDataset, SeedResult, StoreSeedInfo, VerificationResult};
pub use repositories::{Repositories, RepositoryError};
