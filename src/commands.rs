// CLI commands other than `serve`.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::database::lancedb::BotIndex;
use crate::database::sqlite::Database;

/// Print the effective configuration as TOML.
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    println!("# data directory: {}", config.base_dir.display());
    println!("{rendered}");
    Ok(())
}

/// Write the current (default-merged) configuration to disk so it can be
/// edited by hand.
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    config.save()?;
    println!(
        "Wrote configuration to {}",
        config.base_dir.join("config.toml").display()
    );
    Ok(())
}

/// Print per-bot indexing status: uploaded files vs. indexed chunks.
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    let database = Database::initialize_from_base_dir(&config.base_dir).await?;
    let bots = database.list_bots().await?;

    if bots.is_empty() {
        println!("No bots configured.");
        return Ok(());
    }

    for bot in bots {
        let files_dir = config.bot_files_dir(&bot.id);
        let file_count = std::fs::read_dir(&files_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0);

        let index_dir = config.bot_index_dir(&bot.id);
        let chunk_count = if BotIndex::exists(&index_dir) {
            match BotIndex::open(&index_dir, config.model.embedding_dimension as usize).await {
                Ok(index) => index.count_chunks().await.unwrap_or(0),
                Err(_) => 0,
            }
        } else {
            0
        };

        let status = if bot.active { "active" } else { "inactive" };
        println!(
            "{} ({}) [{}]: {} uploaded files, {} indexed chunks",
            bot.name, bot.id, status, file_count, chunk_count
        );
    }

    Ok(())
}
