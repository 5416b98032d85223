use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use shiftbot_core::config::{AppConfig, ConfigError, LoadOptions};
use shiftbot_db::{connect_from_config, migrations, DbPool, Repositories};
use shiftbot_line::{
    EventRouter, LineApiError, LineMessagingClient, MenuProvisioner, MessagingApi,
    ProfileFetcher, RegistrationWorkflow,
};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::health::{self, HealthState};
use crate::webhook::{self, InFlight, WebhookState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub events: Arc<EventRouter>,
    pub in_flight: InFlight,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("messaging client setup failed: {0}")]
    MessagingClient(#[source] LineApiError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let client = LineMessagingClient::new(&config.line).map_err(BootstrapError::MessagingClient)?;
    let api: Arc<dyn MessagingApi> = Arc::new(client);
    let events = Arc::new(EventRouter::new(
        Arc::clone(&api),
        Arc::new(workflow(&config, &db_pool, &api).await),
        config.line.immediate_ack,
    ));
    info!(
        event_name = "system.bootstrap.router_ready",
        correlation_id = "bootstrap",
        immediate_ack = config.line.immediate_ack,
        preset_rich_menu = config.line.rich_menu_id.is_some(),
        "event router ready"
    );

    Ok(Application { config, db_pool, events, in_flight: InFlight::default() })
}

async fn workflow(
    config: &AppConfig,
    db_pool: &DbPool,
    api: &Arc<dyn MessagingApi>,
) -> RegistrationWorkflow {
    RegistrationWorkflow::new(
        Repositories::sql(db_pool.clone()),
        ProfileFetcher::from_config(Arc::clone(api), &config.profile),
        MenuProvisioner::from_config(Arc::clone(api), &config.line).await,
        Duration::from_secs(config.database.timeout_secs.max(1)),
    )
}

impl Application {
    pub fn router(&self) -> Router {
        let webhook_state = WebhookState::new(
            self.config.line.channel_secret.clone(),
            Arc::clone(&self.events),
            self.in_flight.clone(),
        );
        webhook::router(webhook_state)
            .merge(health::router(HealthState::new(self.db_pool.clone())))
            .layer(TraceLayer::new_for_http())
    }
}

#[cfg(test)]
mod tests {
    use shiftbot_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some(database_url.to_string()),
            line_channel_secret: Some("secret-for-tests".to_string()),
            line_channel_access_token: Some("token-for-tests".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_channel_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                line_channel_secret: Some("  ".to_string()),
                ..overrides("sqlite::memory:")
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("line.channel_secret"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_exposes_routes() {
        let options =
            LoadOptions { overrides: overrides("sqlite::memory:"), ..LoadOptions::default() };
        let app = bootstrap(options).await.expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('profiles', 'stores', 'user_stores', 'shift_preferences')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables");
        assert_eq!(table_count, 4);

        let _router = app.router();
        app.db_pool.close().await;
    }
}
