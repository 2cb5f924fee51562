use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{Bot, BotUpdate, Lead, NewBot, NewLead};
use crate::database::sqlite::queries::{BotQueries, LeadQueries};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_base_dir(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).with_context(|| {
            format!("Failed to create data directory: {}", base_dir.display())
        })?;

        Self::new(base_dir.join("botsmith.db")).await
    }

    // Bot operations
    #[inline]
    pub async fn create_bot(&self, new_bot: NewBot) -> Result<Bot> {
        BotQueries::create(&self.pool, new_bot).await
    }

    #[inline]
    pub async fn get_bot(&self, id: &str) -> Result<Option<Bot>> {
        BotQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn list_bots(&self) -> Result<Vec<Bot>> {
        BotQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn update_bot(&self, id: &str, update: BotUpdate) -> Result<Option<Bot>> {
        BotQueries::update(&self.pool, id, update).await
    }

    #[inline]
    pub async fn delete_bot(&self, id: &str) -> Result<bool> {
        BotQueries::delete(&self.pool, id).await
    }

    // Lead operations
    #[inline]
    pub async fn create_lead(&self, new_lead: NewLead) -> Result<Lead> {
        LeadQueries::create(&self.pool, new_lead).await
    }

    #[inline]
    pub async fn list_leads(&self, bot_id: &str) -> Result<Vec<Lead>> {
        LeadQueries::list_for_bot(&self.pool, bot_id).await
    }
}
