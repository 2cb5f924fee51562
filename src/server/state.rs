use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::engine::EngineFactory;
use crate::model::ModelClient;
use crate::notify::LeadNotifier;

/// Shared application state. The engine factory is absent when no model
/// API key is configured; chat requests then fail with a configuration
/// error while the CRUD surface keeps working.
pub struct AppState {
    pub config: Config,
    pub database: Database,
    pub notifier: LeadNotifier,
    pub factory: Option<EngineFactory>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    #[inline]
    pub async fn new(config: Config) -> Result<Self> {
        let database = Database::initialize_from_base_dir(&config.base_dir).await?;

        let factory = match ModelClient::from_config(&config) {
            Ok(model) => Some(EngineFactory::new(config.clone(), model)),
            Err(e) => {
                warn!("Model client unavailable, chat disabled: {}", e);
                None
            }
        };

        Ok(Self {
            config,
            database,
            notifier: LeadNotifier::from_env(),
            factory,
        })
    }
}
